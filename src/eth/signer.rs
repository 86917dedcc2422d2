//! secp256k1 signing identities.
//!
//! A `Signer` is a private key plus the address it controls. It signs two
//! kinds of payload:
//! - EIP-191 personal messages (wallet binding challenges), and
//! - EIP-155 legacy transactions (ledger writes).
//!
//! Recovery goes the other way: from a 65-byte `r || s || v` signature and a
//! message hash back to the signing address.

use std::fmt;

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use ring::rand::{SecureRandom, SystemRandom};

use super::address::Address;
use super::{keccak256, personal_message_hash, rlp, to_hex_prefixed};
use crate::error::MedledgerError;

/// Length of a recoverable signature: r (32) || s (32) || v (1).
pub const SIGNATURE_LEN: usize = 65;

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
///
/// The unsigned fields are kept alongside the raw bytes so that a ledger
/// implementation (or a test double) can inspect them without parsing RLP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub from: Address,
    pub nonce: u64,
    pub to: Address,
    pub data: Vec<u8>,
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransaction {
    pub fn hash_hex(&self) -> String {
        to_hex_prefixed(&self.hash)
    }

    pub fn raw_hex(&self) -> String {
        to_hex_prefixed(&self.raw)
    }
}

/// A private key and the address it controls.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl Signer {
    /// Load a signer from a hex-encoded 32-byte private key.
    pub fn from_hex(private_key: &str) -> Result<Self, MedledgerError> {
        let mut bytes = super::from_hex_prefixed(private_key).map_err(|_| MedledgerError::InvalidKey)?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| MedledgerError::InvalidKey);
        zeroize::Zeroize::zeroize(&mut bytes);
        Ok(Self::from_signing_key(key?))
    }

    /// Generate a fresh random signer.
    pub fn random() -> Result<Self, MedledgerError> {
        let rng = SystemRandom::new();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes).map_err(|_| MedledgerError::RandomnessFailure)?;
            // Out-of-range scalars are astronomically rare; draw again.
            if let Ok(key) = SigningKey::from_slice(&bytes) {
                return Ok(Self::from_signing_key(key));
            }
        }
    }

    fn from_signing_key(key: SigningKey) -> Self {
        let address = Address::from_public_key(key.verifying_key());
        Self { key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte digest, returning `r || s || v` with `v` in {27, 28}.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN], MedledgerError> {
        let (signature, recovery_id) = self.sign_recoverable(digest)?;
        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(out)
    }

    /// Sign an EIP-191 personal message, the way a browser wallet does.
    pub fn sign_message(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN], MedledgerError> {
        self.sign_prehash(&personal_message_hash(message))
    }

    /// Sign a legacy transaction with EIP-155 replay protection.
    pub fn sign_transaction(
        &self,
        tx: &TransactionRequest,
        chain_id: u64,
    ) -> Result<SignedTransaction, MedledgerError> {
        let mut fields = vec![
            rlp::encode_uint(u128::from(tx.nonce)),
            rlp::encode_uint(tx.gas_price),
            rlp::encode_uint(u128::from(tx.gas_limit)),
            rlp::encode_bytes(tx.to.as_bytes()),
            rlp::encode_uint(tx.value),
            rlp::encode_bytes(&tx.data),
        ];

        let mut unsigned = fields.clone();
        unsigned.extend([
            rlp::encode_uint(u128::from(chain_id)),
            rlp::encode_uint(0),
            rlp::encode_uint(0),
        ]);
        let sighash = keccak256(&rlp::encode_list(&unsigned));

        let (signature, recovery_id) = self.sign_recoverable(&sighash)?;
        let v = u128::from(recovery_id.to_byte()) + u128::from(chain_id) * 2 + 35;
        let rs = signature.to_bytes();
        fields.extend([
            rlp::encode_uint(v),
            rlp::encode_uint_bytes(&rs[..32]),
            rlp::encode_uint_bytes(&rs[32..]),
        ]);

        let raw = rlp::encode_list(&fields);
        let hash = keccak256(&raw);

        Ok(SignedTransaction {
            from: self.address,
            nonce: tx.nonce,
            to: tx.to,
            data: tx.data.clone(),
            raw,
            hash,
        })
    }

    fn sign_recoverable(&self, digest: &[u8; 32]) -> Result<(Signature, RecoveryId), MedledgerError> {
        self.key
            .sign_prehash_recoverable(digest)
            .map_err(|_| MedledgerError::InvalidKey)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("address", &self.address).finish()
    }
}

/// Recover the address that produced `signature` over `digest`.
///
/// Accepts `v` as 0/1 or 27/28. Any malformed input is `SignatureMismatch`,
/// since for a verifier an unparseable signature and a wrong one are the
/// same outcome.
pub fn recover_address(digest: &[u8; 32], signature: &[u8]) -> Result<Address, MedledgerError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(MedledgerError::SignatureMismatch);
    }
    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        _ => return Err(MedledgerError::SignatureMismatch),
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or(MedledgerError::SignatureMismatch)?;
    let signature = Signature::from_slice(&signature[..64]).map_err(|_| MedledgerError::SignatureMismatch)?;
    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|_| MedledgerError::SignatureMismatch)?;
    Ok(Address::from_public_key(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_recover_message() {
        let signer = Signer::random().unwrap();
        let signature = signer.sign_message(b"hello").unwrap();
        let recovered = recover_address(&personal_message_hash(b"hello"), &signature).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_recover_reference_signature() {
        // Signature of "Some data" by 0x4c0883a6...362318, as published in the
        // web3.js accounts documentation.
        let signature = hex::decode(
            "b91467e570a6466aa9e9876cbcd013baba02900b8979d43fe208a4a4f339f5fd\
             6007e74cd82e037b800186422fc2da167c747ef045e5d18a5f5d4300f8e1a029\
             1c",
        )
        .unwrap();
        let recovered = recover_address(&personal_message_hash(b"Some data"), &signature).unwrap();
        assert_eq!(
            recovered.to_checksum(),
            "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23"
        );

        let signer =
            Signer::from_hex("0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318")
                .unwrap();
        assert_eq!(signer.address(), recovered);
    }

    #[test]
    fn test_rejects_bad_recovery_byte() {
        let signer = Signer::random().unwrap();
        let mut signature = signer.sign_message(b"hello").unwrap();
        signature[64] = 42;
        assert!(matches!(
            recover_address(&personal_message_hash(b"hello"), &signature),
            Err(MedledgerError::SignatureMismatch)
        ));
        assert!(recover_address(&[0u8; 32], &signature[..64]).is_err());
    }

    #[test]
    fn test_transaction_hash_covers_raw_bytes() {
        let signer = Signer::random().unwrap();
        let tx = TransactionRequest {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 300_000,
            to: Address::from_bytes([0x11; 20]),
            value: 0,
            data: vec![1, 2, 3],
        };
        let signed = signer.sign_transaction(&tx, 1337).unwrap();
        assert_eq!(signed.hash, keccak256(&signed.raw));
        assert_eq!(signed.from, signer.address());
        assert_eq!(signed.nonce, 9);
        // Top-level RLP list with a long-form length prefix.
        assert!(signed.raw[0] >= 0xf8);
        assert!(signed.raw_hex().starts_with("0x"));
    }

    #[test]
    fn test_rejects_invalid_private_key() {
        assert!(Signer::from_hex("0x00").is_err());
        assert!(Signer::from_hex(&"00".repeat(32)).is_err());
    }
}
