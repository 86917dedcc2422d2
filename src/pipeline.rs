//! The record pipeline: upload, download, query, and bind workflows.
//!
//! Upload walks a fixed sequence of stages with no rollback:
//!
//! ```text
//! Received -> Sealed -> Stored -> Indexed -> Complete
//! ```
//!
//! Indexing is always last, so an index entry can never point at a missing
//! blob. The converse can happen: if indexing fails after storing, the blob
//! stays in the content store unindexed. That orphan is logged and audited,
//! never reconciled; the caller retries the whole pipeline with a fresh seal.
//!
//! The backend never keeps a `RecordKey`. It is returned to the uploader once
//! and must be kept by them; a lost key is a lost record.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditLog, AuditRecord};
use crate::blob::SealedBlob;
use crate::crypto;
use crate::directory::{Account, IdentityDirectory, Role};
use crate::error::MedledgerError;
use crate::eth::{Address, Signer};
use crate::identity;
use crate::keys::RecordKey;
use crate::ledger::{LedgerClient, RecordIndexEntry};
use crate::retry::{retry, RetryPolicy};
use crate::store::BlobStore;

/// Progress of a single upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UploadStage {
    Received,
    Sealed,
    Stored,
    Indexed,
    Complete,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Sealed => "sealed",
            Self::Stored => "stored",
            Self::Indexed => "indexed",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// What the uploader gets back. `key` is the only copy in existence.
#[derive(Debug)]
pub struct UploadReceipt {
    pub handle: String,
    pub key: RecordKey,
    pub tx_hash: String,
}

pub struct RecordPipeline {
    directory: Arc<dyn IdentityDirectory>,
    blobs: BlobStore,
    ledger: Arc<LedgerClient>,
    relay: Signer,
    retry: RetryPolicy,
    audit: Arc<AuditLog>,
}

impl RecordPipeline {
    /// `relay` is the custodial identity that signs every ledger write.
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        blobs: BlobStore,
        ledger: Arc<LedgerClient>,
        relay: Signer,
    ) -> Self {
        Self {
            directory,
            blobs,
            ledger,
            relay,
            retry: RetryPolicy::default(),
            audit: Arc::new(AuditLog::new()),
        }
    }

    /// Retry policy for content-store calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share an audit log with other components.
    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn relay_address(&self) -> Address {
        self.relay.address()
    }

    /// Resolve an account handle through the directory.
    pub async fn account(&self, handle: &str) -> Result<Account, MedledgerError> {
        self.directory.lookup(handle).await
    }

    // -----------------------------------------------------------------------
    // Upload / download
    // -----------------------------------------------------------------------

    /// Seal, store, and index `plaintext` for `account`.
    pub async fn upload(&self, account: &Account, plaintext: &[u8]) -> Result<UploadReceipt, MedledgerError> {
        let mut stage = UploadStage::Received;
        let owner = account.require_bound()?;
        debug!(account = %account.handle, %stage, size = plaintext.len(), "upload received");

        let (blob, key) = crypto::seal(plaintext)?;
        stage = UploadStage::Sealed;
        debug!(account = %account.handle, %stage, "record sealed");

        let handle = retry(&self.retry, "content store put", || self.blobs.put(&blob)).await?;
        stage = UploadStage::Stored;
        debug!(account = %account.handle, %stage, handle = %handle, "blob stored");

        let receipt = match self.ledger.submit_record(&owner, &handle, &self.relay).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(
                    account = %account.handle,
                    %stage,
                    handle = %handle,
                    error = %err,
                    "indexing failed; blob left orphaned"
                );
                self.audit.append(AuditRecord::now(
                    &account.handle,
                    AuditEvent::OrphanedBlob {
                        handle: handle.clone(),
                        reason: err.to_string(),
                    },
                ));
                return Err(err);
            }
        };
        stage = UploadStage::Indexed;
        debug!(account = %account.handle, %stage, tx_hash = %receipt.tx_hash, "record indexed");

        self.audit.append(AuditRecord::now(
            &account.handle,
            AuditEvent::UploadCompleted {
                handle: handle.clone(),
                tx_hash: receipt.tx_hash.clone(),
            },
        ));
        stage = UploadStage::Complete;
        info!(account = %account.handle, %stage, handle = %handle, owner = %owner, "upload complete");

        Ok(UploadReceipt {
            handle,
            key,
            tx_hash: receipt.tx_hash,
        })
    }

    /// Fetch and decrypt a record. The handle and key together are the
    /// capability; the ledger is not consulted.
    pub async fn download(&self, handle: &str, key: &RecordKey) -> Result<Vec<u8>, MedledgerError> {
        let blob: SealedBlob = retry(&self.retry, "content store get", || self.blobs.get(handle)).await?;
        crypto::open(&blob, key)
    }

    /// `download` with the key as the base64 string the uploader was given.
    pub async fn download_with_encoded_key(&self, handle: &str, key: &str) -> Result<Vec<u8>, MedledgerError> {
        let key = RecordKey::from_base64(key)?;
        self.download(handle, &key).await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The caller's own index entries.
    pub async fn query_own(&self, account: &Account) -> Result<Vec<RecordIndexEntry>, MedledgerError> {
        let address = account.require_bound()?;
        self.ledger.query_records(&address, &address).await
    }

    /// Another identity's index entries. Doctors only; the ledger then
    /// applies its own per-patient check, and both must pass.
    pub async fn query_other(
        &self,
        account: &Account,
        owner: &Address,
    ) -> Result<Vec<RecordIndexEntry>, MedledgerError> {
        if account.role != Role::Doctor {
            self.audit.append(AuditRecord::now(
                &account.handle,
                AuditEvent::QueryDenied {
                    owner: *owner,
                    reason: format!("role {} may not read other identities", account.role),
                },
            ));
            return Err(MedledgerError::Precondition("doctors only".into()));
        }
        let caller = account
            .bound_address
            .ok_or_else(|| MedledgerError::Precondition("doctor wallet not linked".into()))?;

        match self.ledger.query_records(owner, &caller).await {
            Err(MedledgerError::AccessDenied(reason)) => {
                self.audit.append(AuditRecord::now(
                    &account.handle,
                    AuditEvent::QueryDenied {
                        owner: *owner,
                        reason: reason.clone(),
                    },
                ));
                Err(MedledgerError::AccessDenied(reason))
            }
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // Binding
    // -----------------------------------------------------------------------

    /// Verify a wallet signature and persist the binding.
    ///
    /// `account` only changes once the directory has stored the new address.
    pub async fn bind(
        &self,
        account: &mut Account,
        claimed_address: &str,
        signature: &str,
    ) -> Result<Address, MedledgerError> {
        let address = identity::verify_binding(claimed_address, signature)?;
        self.directory.set_bound_address(&account.handle, address).await?;
        identity::apply_binding(account, address);
        self.audit.append(AuditRecord::now(&account.handle, AuditEvent::WalletBound { address }));
        Ok(address)
    }
}
