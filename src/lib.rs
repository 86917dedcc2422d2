//! # medledger
//!
//! Encrypted record pipeline.
//!
//! Documents are sealed with a fresh AES-256-GCM key per record, stored as
//! opaque blobs in a content-addressed store, and indexed under their owner's
//! blockchain address on an append-only ledger. The key goes back to the
//! uploader and nowhere else.
//!
//! Accounts are tied to addresses by a wallet signature over a fixed
//! challenge. Reading another identity's index is gated twice: by role here,
//! and by the contract's own access policy on the ledger.
//!
//! The ledger writes go through `addRecord(address owner, string handle)`, so
//! the deployed contract must accept an explicit owner; see [`ledger`].
//!
//! ## Public API
//!
//! The entry point is [`pipeline::RecordPipeline`]. Its collaborators
//! (identity directory, content store, ledger node) are injected as traits so
//! they can be swapped for the in-memory implementations in tests.

pub mod audit;
pub mod blob;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod eth;
pub mod identity;
pub mod keys;
pub mod ledger;
pub mod pipeline;
pub mod retry;
pub mod store;

pub use blob::SealedBlob;
pub use directory::{Account, Role};
pub use error::{MedledgerError, TransportKind};
pub use keys::RecordKey;
pub use pipeline::{RecordPipeline, UploadReceipt};

/// Seal a plaintext under a fresh key. See [`crypto::seal`].
pub fn seal(plaintext: &[u8]) -> Result<(SealedBlob, RecordKey), MedledgerError> {
    crypto::seal(plaintext)
}

/// Open a sealed blob. See [`crypto::open`].
pub fn open(blob: &SealedBlob, key: &RecordKey) -> Result<Vec<u8>, MedledgerError> {
    crypto::open(blob, key)
}
