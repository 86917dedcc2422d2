//! Per-record key ownership.
//!
//! A `RecordKey` is the only secret a caller must keep to read a record back.
//! The pipeline hands it out exactly once, at the end of a successful upload,
//! and never stores it. Nothing in this crate persists, serialises, or logs a
//! `RecordKey`.
//!
//! - Not `Clone`. Duplicating a key is an explicit `from_bytes(...)`.
//! - Not `Serialize`. The only export path is `to_base64()`, which the caller
//!   invokes deliberately.
//! - Zeroised on drop.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_LEN;
use crate::error::MedledgerError;

/// A 256-bit AES-GCM key for a single sealed record.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RecordKey {
    bytes: [u8; KEY_LEN],
}

impl RecordKey {
    /// Construct a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Decode a key handed back by a caller.
    ///
    /// Anything other than exactly 32 bytes of standard base64 is rejected.
    pub fn from_base64(encoded: &str) -> Result<Self, MedledgerError> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| MedledgerError::InvalidKey)?;
        if decoded.len() != KEY_LEN {
            decoded.zeroize();
            return Err(MedledgerError::InvalidKey);
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    /// Encode the key for return to the uploader.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    /// Borrow the raw key bytes for use in seal/open.
    ///
    /// `pub(crate)`: raw bytes never leave the crate except via `to_base64`.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        ring::constant_time::verify_slices_are_equal(&self.bytes, &other.bytes).is_ok()
    }
}

impl Eq for RecordKey {}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecordKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_roundtrip() {
        let key = RecordKey::from_bytes([7u8; KEY_LEN]);
        let decoded = RecordKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn test_rejects_short_key() {
        let short = STANDARD.encode([1u8; 16]);
        assert!(matches!(
            RecordKey::from_base64(&short),
            Err(MedledgerError::InvalidKey)
        ));
        assert!(RecordKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = RecordKey::from_bytes([0xAB; KEY_LEN]);
        let printed = format!("{:?}", key);
        assert!(!printed.contains("171"));
        assert!(printed.contains("redacted"));
    }
}
