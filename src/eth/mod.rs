//! Ethereum wire primitives.
//!
//! Just enough of the Ethereum encoding stack to talk to a records contract
//! over JSON-RPC without pulling in a full client library: addresses with
//! EIP-55 checksums, RLP for legacy transactions, Solidity ABI for the two
//! contract entry points, and secp256k1 signing/recovery.

pub mod abi;
pub mod address;
pub mod rlp;
pub mod signer;

pub use address::Address;
pub use signer::{Signer, SignedTransaction};

use sha3::{Digest, Keccak256};

/// Keccak-256 (the pre-standard SHA-3 variant Ethereum uses everywhere).
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// Hash of an EIP-191 "personal" message, as produced by wallet
/// `personal_sign` / `eth_sign` implementations.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    prefixed.extend_from_slice(message);
    keccak256(&prefixed)
}

/// Render bytes as `0x`-prefixed lowercase hex.
pub(crate) fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse `0x`-prefixed (or bare) hex.
pub(crate) fn from_hex_prefixed(text: &str) -> Result<Vec<u8>, crate::error::MedledgerError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|_| crate::error::MedledgerError::malformed("invalid hex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_hex_prefix_handling() {
        assert_eq!(from_hex_prefixed("0xdead").unwrap(), vec![0xde, 0xad]);
        assert_eq!(from_hex_prefixed("DEAD").unwrap(), vec![0xde, 0xad]);
        assert!(from_hex_prefixed("0xzz").is_err());
        assert_eq!(to_hex_prefixed(&[0x01, 0xff]), "0x01ff");
    }
}
