//! Wallet binding: tie an application account to a blockchain address.
//!
//! The account holder signs a fixed challenge with their wallet
//! (`personal_sign`). We recover the signer from the signature and, if it is
//! the address they claimed, record that address on the account.
//!
//! ## Known weakness
//!
//! The challenge is one constant string for every binding, with no nonce and
//! no expiry. A captured signature therefore stays valid forever and can be
//! replayed to re-bind the same address to any account. Hardening this needs
//! a per-attempt nonce bound to the account plus a validity window; that is a
//! protocol change for wallet clients, not something to assume here.

use tracing::{debug, info};

use crate::directory::Account;
use crate::error::MedledgerError;
use crate::eth::signer::{recover_address, SIGNATURE_LEN};
use crate::eth::{personal_message_hash, Address, Signer};

/// The message every wallet signs to prove control of its address.
pub const CHALLENGE_MESSAGE: &str = "Bind this wallet to my medical account";

/// The challenge presented to wallet clients.
pub fn challenge_message() -> &'static str {
    CHALLENGE_MESSAGE
}

/// Produce a binding signature with a local key (what a wallet would return).
pub fn sign_challenge(signer: &Signer) -> Result<String, MedledgerError> {
    let signature = signer.sign_message(CHALLENGE_MESSAGE.as_bytes())?;
    Ok(format!("0x{}", hex::encode(signature)))
}

/// Check that `signature` over the challenge was produced by `claimed_address`.
///
/// `claimed_address` may be in any case; the comparison is on address bytes.
/// Nothing is mutated; see [`bind`] to apply the result.
pub fn verify_binding(claimed_address: &str, signature: &str) -> Result<Address, MedledgerError> {
    let claimed: Address = claimed_address
        .parse()
        .map_err(|_| MedledgerError::SignatureMismatch)?;

    let signature = crate::eth::from_hex_prefixed(signature).map_err(|_| MedledgerError::SignatureMismatch)?;
    if signature.len() != SIGNATURE_LEN {
        return Err(MedledgerError::SignatureMismatch);
    }

    let digest = personal_message_hash(CHALLENGE_MESSAGE.as_bytes());
    let recovered = recover_address(&digest, &signature)?;

    if recovered != claimed {
        debug!(claimed = %claimed, recovered = %recovered, "binding signature mismatch");
        return Err(MedledgerError::SignatureMismatch);
    }
    Ok(claimed)
}

/// Record a verified address on the account, replacing any previous binding.
pub fn apply_binding(account: &mut Account, address: Address) {
    if let Some(previous) = account.bound_address {
        if previous != address {
            info!(account = %account.handle, previous = %previous, "replacing existing wallet binding");
        }
    }
    account.bound_address = Some(address);
    info!(account = %account.handle, address = %address, "wallet bound");
}

/// Verify a binding signature and record the address on the account.
///
/// On success the account's previous binding, if any, is overwritten with
/// the claimed address. On failure the account is left untouched.
pub fn bind(account: &mut Account, claimed_address: &str, signature: &str) -> Result<Address, MedledgerError> {
    let address = verify_binding(claimed_address, signature)?;
    apply_binding(account, address);
    Ok(address)
}
