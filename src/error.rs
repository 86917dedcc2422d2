//! Error types for medledger.
//!
//! Every variant is a distinct failure mode of the record pipeline. The
//! taxonomy matters more than the message: callers decide whether to retry,
//! re-prompt, or give up by matching on the variant, so a permission problem
//! must never look like a network problem and vice versa.
//!
//! Messages are intentionally minimal. They never include key material,
//! plaintext, or ciphertext.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MedledgerError>;

/// What went wrong on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The call did not complete within its deadline.
    Timeout,
    /// The remote endpoint could not be reached.
    Unreachable,
    /// The endpoint answered, but not with something we could use.
    Protocol,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Protocol => write!(f, "protocol"),
        }
    }
}

/// The single error type for all medledger operations.
#[derive(Debug)]
pub enum MedledgerError {
    /// The request was rejected before any work was done: the account has
    /// no bound address, the role is not allowed, or the account is unknown.
    Precondition(String),

    /// The content store or the ledger could not be reached, or timed out.
    /// The only retriable variant.
    Transport { kind: TransportKind, detail: String },

    /// AES-GCM tag verification failed: wrong key or tampered blob.
    Authentication,

    /// The recovered signer does not match the claimed address, or the
    /// signature could not be parsed at all.
    SignatureMismatch,

    /// The ledger refused a read on authorization grounds.
    AccessDenied(String),

    /// The content store has no object for this handle.
    NotFound(String),

    /// The ledger refused a write (nonce conflict, funds, revert). Terminal
    /// for that submission; blind retry with a stale nonce risks duplicates.
    LedgerRejected(String),

    /// A key was not exactly 256 bits, or was not valid encoding.
    InvalidKey,

    /// Encryption failed inside `ring`.
    EncryptionFailure,

    /// The system's random number generator failed to produce bytes.
    RandomnessFailure,

    /// Bytes that should have been a blob, address, or ABI payload were not.
    Malformed(String),

    /// Configuration could not be loaded or was inconsistent.
    Config(String),

    /// Local shared state is unusable, e.g. a lock poisoned by a panic.
    /// Says nothing about the store or the ledger.
    Internal(String),
}

impl MedledgerError {
    pub(crate) fn transport(kind: TransportKind, detail: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed(detail.into())
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Internal(format!("{} lock poisoned", what))
    }

    /// Whether a caller may reasonably retry the same operation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Whether this is a transport failure caused by a deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                kind: TransportKind::Timeout,
                ..
            }
        )
    }
}

impl fmt::Display for MedledgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition(reason) => write!(f, "precondition failed: {}", reason),
            Self::Transport { kind, detail } => write!(f, "transport error ({}): {}", kind, detail),
            Self::Authentication => write!(f, "authentication failed: corrupted blob or invalid key"),
            Self::SignatureMismatch => write!(f, "signature mismatch"),
            Self::AccessDenied(reason) => write!(f, "access denied: {}", reason),
            Self::NotFound(handle) => write!(f, "not found: {}", handle),
            Self::LedgerRejected(reason) => write!(f, "ledger rejected transaction: {}", reason),
            Self::InvalidKey => write!(f, "invalid key"),
            Self::EncryptionFailure => write!(f, "encryption failed"),
            Self::RandomnessFailure => write!(f, "randomness source failed"),
            Self::Malformed(detail) => write!(f, "malformed data: {}", detail),
            Self::Config(detail) => write!(f, "configuration error: {}", detail),
            Self::Internal(detail) => write!(f, "internal error: {}", detail),
        }
    }
}

impl std::error::Error for MedledgerError {}

impl From<reqwest::Error> for MedledgerError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() || err.is_request() {
            TransportKind::Unreachable
        } else {
            TransportKind::Protocol
        };
        Self::transport(kind, err.to_string())
    }
}

impl From<figment::Error> for MedledgerError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}
