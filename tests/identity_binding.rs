//! Wallet binding through the pipeline: signature checks and directory updates.

mod common;

use medledger::directory::IdentityDirectory;
use medledger::eth::Signer;
use medledger::identity::{challenge_message, sign_challenge};
use medledger::{MedledgerError, Role};

use common::{harness, register};

fn hex_signature(signer: &Signer, message: &[u8]) -> String {
    format!("0x{}", hex::encode(signer.sign_message(message).unwrap()))
}

#[tokio::test]
async fn test_lowercase_claim_binds_checksummed_address() {
    let h = harness();
    let mut alice = register(&h, "alice@x", Role::Patient);
    let wallet = Signer::random().unwrap();
    let signature = sign_challenge(&wallet).unwrap();
    let claimed = wallet.address().to_checksum().to_lowercase();

    let bound = h.pipeline.bind(&mut alice, &claimed, &signature).await.unwrap();

    assert_eq!(bound, wallet.address());
    let stored = h.directory.lookup("alice@x").await.unwrap();
    assert_eq!(
        stored.bound_address.map(|a| a.to_checksum()),
        Some(wallet.address().to_checksum())
    );
}

#[tokio::test]
async fn test_signature_over_other_message_is_rejected() {
    let h = harness();
    let mut alice = register(&h, "alice@x", Role::Patient);
    let wallet = Signer::random().unwrap();
    let signature = hex_signature(&wallet, b"Transfer 10 ETH to mallory");

    let result = h
        .pipeline
        .bind(&mut alice, &wallet.address().to_checksum(), &signature)
        .await;

    assert!(matches!(result, Err(MedledgerError::SignatureMismatch)));
    assert!(alice.bound_address.is_none());
    assert!(h.directory.lookup("alice@x").await.unwrap().bound_address.is_none());
}

#[tokio::test]
async fn test_signature_from_other_wallet_is_rejected() {
    let h = harness();
    let mut alice = register(&h, "alice@x", Role::Patient);
    let claimed = Signer::random().unwrap();
    let actual = Signer::random().unwrap();
    let signature = sign_challenge(&actual).unwrap();

    let result = h
        .pipeline
        .bind(&mut alice, &claimed.address().to_checksum(), &signature)
        .await;
    assert!(matches!(result, Err(MedledgerError::SignatureMismatch)));
}

#[tokio::test]
async fn test_malformed_inputs_are_signature_mismatch() {
    let h = harness();
    let mut alice = register(&h, "alice@x", Role::Patient);
    let wallet = Signer::random().unwrap();
    let address = wallet.address().to_checksum();
    let good = sign_challenge(&wallet).unwrap();

    for (claimed, signature) in [
        ("0x1234", good.as_str()),
        (address.as_str(), "0xdeadbeef"),
        (address.as_str(), "not hex at all"),
        (address.as_str(), ""),
    ] {
        let result = h.pipeline.bind(&mut alice, claimed, signature).await;
        assert!(
            matches!(result, Err(MedledgerError::SignatureMismatch)),
            "claimed={claimed} signature={signature}"
        );
    }
}

#[tokio::test]
async fn test_rebinding_overwrites_previous_address() {
    let h = harness();
    let mut alice = register(&h, "alice@x", Role::Patient);
    let first = Signer::random().unwrap();
    let second = Signer::random().unwrap();

    h.pipeline
        .bind(&mut alice, &first.address().to_checksum(), &sign_challenge(&first).unwrap())
        .await
        .unwrap();
    h.pipeline
        .bind(&mut alice, &second.address().to_checksum(), &sign_challenge(&second).unwrap())
        .await
        .unwrap();

    assert_eq!(alice.bound_address, Some(second.address()));
    assert_eq!(
        h.directory.lookup("alice@x").await.unwrap().bound_address,
        Some(second.address())
    );
}

#[tokio::test]
async fn test_captured_signature_replays_onto_another_account() {
    // Known weakness of a fixed challenge: the signature is not tied to an
    // account, so anyone holding it can bind the same address elsewhere.
    let h = harness();
    let wallet = Signer::random().unwrap();
    let signature = sign_challenge(&wallet).unwrap();
    let address = wallet.address().to_checksum();

    let mut alice = register(&h, "alice@x", Role::Patient);
    let mut mallory = register(&h, "mallory@x", Role::Patient);
    h.pipeline.bind(&mut alice, &address, &signature).await.unwrap();
    h.pipeline.bind(&mut mallory, &address, &signature).await.unwrap();

    assert_eq!(mallory.bound_address, alice.bound_address);
}

#[tokio::test]
async fn test_binding_unknown_account_fails_in_directory() {
    let h = harness();
    let mut ghost = medledger::Account::new("ghost@x", "Ghost", Role::Patient);
    let wallet = Signer::random().unwrap();

    let result = h
        .pipeline
        .bind(&mut ghost, &wallet.address().to_checksum(), &sign_challenge(&wallet).unwrap())
        .await;
    assert!(matches!(result, Err(MedledgerError::Precondition(_))));
    assert!(ghost.bound_address.is_none());
    assert!(h.pipeline.audit_log().is_empty());
}

#[tokio::test]
async fn test_failed_persist_keeps_previous_binding() {
    let h = harness();
    let mut alice = register(&h, "alice@x", Role::Patient);
    let first = Signer::random().unwrap();
    h.pipeline
        .bind(&mut alice, &first.address().to_checksum(), &sign_challenge(&first).unwrap())
        .await
        .unwrap();

    // Same account, but renamed so the directory no longer knows it.
    let mut renamed = alice.clone();
    renamed.handle = "alice-renamed@x".into();
    let second = Signer::random().unwrap();
    let result = h
        .pipeline
        .bind(&mut renamed, &second.address().to_checksum(), &sign_challenge(&second).unwrap())
        .await;

    assert!(matches!(result, Err(MedledgerError::Precondition(_))));
    assert_eq!(renamed.bound_address, Some(first.address()));
    assert_eq!(
        h.directory.lookup("alice@x").await.unwrap().bound_address,
        Some(first.address())
    );
}

#[test]
fn test_challenge_is_stable() {
    assert_eq!(challenge_message(), "Bind this wallet to my medical account");
}
