//! The cipher engine: low-level authenticated encryption.
//!
//! This is the only module that touches `ring::aead` directly. Everything
//! else seals and opens records exclusively through `seal` and `open`.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per call via `SystemRandom`
//! - **Key**: 256-bit (32 bytes), generated fresh per call via `SystemRandom`
//! - **Tag**: 128-bit (16 bytes), stored separately from the ciphertext
//!
//! The engine is stateless. It never holds a key beyond the call that uses it.

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::blob::SealedBlob;
use crate::error::MedledgerError;
use crate::keys::RecordKey;

/// The AEAD algorithm used for every record.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of a record key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of the GCM authentication tag in bytes (128 bits).
pub const TAG_LEN: usize = 16;

fn random_bytes<const N: usize>() -> Result<[u8; N], MedledgerError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; N];
    rng.fill(&mut buf).map_err(|_| MedledgerError::RandomnessFailure)?;
    Ok(buf)
}

fn aead_key(key: &RecordKey) -> Result<LessSafeKey, MedledgerError> {
    let unbound = UnboundKey::new(ALGORITHM, key.as_bytes()).map_err(|_| MedledgerError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

/// Generate a fresh random record key.
pub fn generate_key() -> Result<RecordKey, MedledgerError> {
    Ok(RecordKey::from_bytes(random_bytes::<KEY_LEN>()?))
}

/// Seal a plaintext under a brand-new key.
///
/// Both the key and the nonce are drawn from the system CSPRNG on every call,
/// so sealing the same plaintext twice yields unrelated blobs. The only
/// failure mode in practice is an entropy-source failure, which is fatal.
pub fn seal(plaintext: &[u8]) -> Result<(SealedBlob, RecordKey), MedledgerError> {
    let key = generate_key()?;
    let nonce = random_bytes::<NONCE_LEN>()?;

    let mut ciphertext = plaintext.to_vec();
    let tag = aead_key(&key)?
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(nonce),
            aead::Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| MedledgerError::EncryptionFailure)?;

    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag.as_ref());

    Ok((
        SealedBlob {
            ciphertext,
            nonce,
            auth_tag,
        },
        key,
    ))
}

/// Open a sealed blob with the caller-supplied key.
///
/// If the key is wrong or any byte of the ciphertext or tag has changed, the
/// GCM check fails and `Authentication` is returned. The working buffer is
/// dropped on failure; no partial plaintext escapes.
pub fn open(blob: &SealedBlob, key: &RecordKey) -> Result<Vec<u8>, MedledgerError> {
    let key = aead_key(key)?;

    let mut payload = Vec::with_capacity(blob.ciphertext.len() + TAG_LEN);
    payload.extend_from_slice(&blob.ciphertext);
    payload.extend_from_slice(&blob.auth_tag);

    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(blob.nonce),
            aead::Aad::empty(),
            &mut payload,
        )
        .map_err(|_| MedledgerError::Authentication)?;

    Ok(plaintext.to_vec())
}
