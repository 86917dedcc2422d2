//! The sealed blob and its canonical wire encoding.
//!
//! A blob is what the content store holds: ciphertext, nonce, and GCM tag,
//! with no key and no owner. It is encoded as a small JSON object with
//! standard-base64 fields:
//!
//! ```text
//! {"ciphertext":"...","nonce":"...","tag":"..."}
//! ```
//!
//! Field order is fixed by the struct, so the same blob always encodes to the
//! same bytes and therefore to the same content handle.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::{NONCE_LEN, TAG_LEN};
use crate::error::MedledgerError;

/// Authenticated-encryption output for one record. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub auth_tag: [u8; TAG_LEN],
}

/// On-the-wire shape. Kept separate so the in-memory type can use fixed-size
/// arrays while the JSON stays base64 text.
#[derive(Serialize, Deserialize)]
struct WireBlob {
    ciphertext: String,
    nonce: String,
    tag: String,
}

impl SealedBlob {
    /// Encode to canonical JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, MedledgerError> {
        let wire = WireBlob {
            ciphertext: STANDARD.encode(&self.ciphertext),
            nonce: STANDARD.encode(self.nonce),
            tag: STANDARD.encode(self.auth_tag),
        };
        serde_json::to_vec(&wire).map_err(|e| MedledgerError::malformed(e.to_string()))
    }

    /// Decode from JSON bytes fetched from the store.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MedledgerError> {
        let wire: WireBlob =
            serde_json::from_slice(bytes).map_err(|e| MedledgerError::malformed(e.to_string()))?;

        let ciphertext = decode_field("ciphertext", &wire.ciphertext)?;
        let nonce = decode_fixed::<NONCE_LEN>("nonce", &wire.nonce)?;
        let auth_tag = decode_fixed::<TAG_LEN>("tag", &wire.tag)?;

        Ok(Self {
            ciphertext,
            nonce,
            auth_tag,
        })
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, MedledgerError> {
    STANDARD
        .decode(value)
        .map_err(|_| MedledgerError::malformed(format!("blob field `{}` is not base64", name)))
}

fn decode_fixed<const N: usize>(name: &str, value: &str) -> Result<[u8; N], MedledgerError> {
    decode_field(name, value)?
        .try_into()
        .map_err(|_| MedledgerError::malformed(format!("blob field `{}` must be {} bytes", name, N)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SealedBlob {
        SealedBlob {
            ciphertext: b"opaque".to_vec(),
            nonce: [1u8; NONCE_LEN],
            auth_tag: [2u8; TAG_LEN],
        }
    }

    #[test]
    fn test_encoding_is_canonical() {
        let a = sample().to_json().unwrap();
        let b = sample().to_json().unwrap();
        assert_eq!(a, b);

        let text = String::from_utf8(a).unwrap();
        let ct = text.find("\"ciphertext\"").unwrap();
        let nonce = text.find("\"nonce\"").unwrap();
        let tag = text.find("\"tag\"").unwrap();
        assert!(ct < nonce && nonce < tag);
    }

    #[test]
    fn test_decode_known_layout() {
        let json = br#"{"ciphertext":"b3BhcXVl","nonce":"AQEBAQEBAQEBAQEB","tag":"AgICAgICAgICAgICAgICAg=="}"#;
        assert_eq!(SealedBlob::from_json(json).unwrap(), sample());
    }

    #[test]
    fn test_rejects_wrong_nonce_length() {
        let json = br#"{"ciphertext":"b3BhcXVl","nonce":"AQE=","tag":"AgICAgICAgICAgICAgICAg=="}"#;
        assert!(matches!(
            SealedBlob::from_json(json),
            Err(MedledgerError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_missing_field() {
        let json = br#"{"ciphertext":"b3BhcXVl","nonce":"AQEBAQEBAQEBAQEB"}"#;
        assert!(SealedBlob::from_json(json).is_err());
    }
}
