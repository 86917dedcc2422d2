//! The ledger client: ownership index writes and access-checked reads.
//!
//! Writes go through a custodial signing identity that relays every upload.
//! A signing identity has exactly one transaction sequence counter on the
//! chain, so two submissions that read the same counter before either is
//! accepted will collide. The client therefore owns one async mutex per
//! signing identity and holds it across "read sequence → sign → broadcast".
//! Reads never take it.
//!
//! The next sequence number is cached after the first chain read and bumped
//! after each accepted broadcast. Any failed broadcast drops the cache, so the
//! following submission resynchronises from the chain instead of guessing.
//!
//! ## Contract interface
//!
//! The records contract must expose `addRecord(address owner, string handle)`
//! and `getRecords(address owner)`. Because the relay signs every write, the
//! owner travels as an explicit argument instead of being taken from the
//! transaction sender. A contract that only offers `addRecord(string)` and
//! files entries under `msg.sender` is not compatible: every record would
//! land under the relay's address and no owner could read it back.

mod jsonrpc;
mod memory;

pub use jsonrpc::JsonRpcLedger;
pub use memory::MemoryLedger;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::MedledgerError;
use crate::eth::signer::TransactionRequest;
use crate::eth::{abi, Address, SignedTransaction, Signer};
use crate::retry::{retry, with_timeout, RetryPolicy};

/// Default gas limit for `addRecord`.
pub const DEFAULT_GAS_LIMIT: u64 = 300_000;

/// Default gas price: 20 gwei.
pub const DEFAULT_GAS_PRICE_WEI: u128 = 20_000_000_000;

/// One entry of the append-only ownership index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordIndexEntry {
    pub content_handle: String,
    /// Block timestamp, unix seconds.
    pub timestamp: u64,
    pub owner: Address,
}

impl RecordIndexEntry {
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Reference to a broadcast (not necessarily mined) write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub nonce: u64,
    pub from: Address,
}

/// Raw access to a ledger node.
///
/// Implementations report a node that answered but refused (revert, nonce
/// conflict, funds) as `LedgerRejected`, and anything on the wire as
/// `Transport`.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Next sequence number for `address`, counting pending transactions.
    async fn transaction_count(&self, address: &Address) -> Result<u64, MedledgerError>;

    /// Broadcast a signed transaction; returns its hash.
    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, MedledgerError>;

    /// Read-only contract call executed with `from` as the sender.
    async fn call(&self, from: &Address, to: &Address, data: &[u8]) -> Result<Vec<u8>, MedledgerError>;
}

/// Static parameters of the records contract deployment.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub contract: Address,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub gas_price_wei: u128,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl LedgerSettings {
    pub fn new(contract: Address, chain_id: u64) -> Self {
        Self {
            contract,
            chain_id,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_price_wei: DEFAULT_GAS_PRICE_WEI,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

type SequenceSlot = Arc<tokio::sync::Mutex<Option<u64>>>;

pub struct LedgerClient {
    rpc: Arc<dyn LedgerRpc>,
    settings: LedgerSettings,
    sequences: Mutex<HashMap<Address, SequenceSlot>>,
}

impl LedgerClient {
    pub fn new(rpc: Arc<dyn LedgerRpc>, settings: LedgerSettings) -> Self {
        Self {
            rpc,
            settings,
            sequences: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    fn sequence_slot(&self, signer: Address) -> Result<SequenceSlot, MedledgerError> {
        let mut slots = self
            .sequences
            .lock()
            .map_err(|_| MedledgerError::poisoned("sequence registry"))?;
        Ok(Arc::clone(slots.entry(signer).or_default()))
    }

    /// Index `handle` under `owner`, relayed by `signer`.
    ///
    /// Serialised per signing identity. Transport failures are retried with
    /// backoff (re-broadcasting the identical signed bytes); ledger rejections
    /// are returned immediately.
    pub async fn submit_record(
        &self,
        owner: &Address,
        handle: &str,
        signer: &Signer,
    ) -> Result<TxReceipt, MedledgerError> {
        let from = signer.address();
        let slot = self.sequence_slot(from)?;
        let mut next = slot.lock().await;

        let nonce = match *next {
            Some(nonce) => nonce,
            None => {
                let nonce = retry(&self.settings.retry, "eth_getTransactionCount", || {
                    with_timeout(
                        self.settings.timeout,
                        "eth_getTransactionCount",
                        self.rpc.transaction_count(&from),
                    )
                })
                .await?;
                debug!(signer = %from, nonce, "sequence synchronised from chain");
                nonce
            }
        };

        let request = TransactionRequest {
            nonce,
            gas_price: self.settings.gas_price_wei,
            gas_limit: self.settings.gas_limit,
            to: self.settings.contract,
            value: 0,
            data: abi::encode_add_record(owner, handle),
        };
        let signed = signer.sign_transaction(&request, self.settings.chain_id)?;

        let outcome = retry(&self.settings.retry, "eth_sendRawTransaction", || {
            with_timeout(
                self.settings.timeout,
                "eth_sendRawTransaction",
                self.rpc.broadcast(&signed),
            )
        })
        .await;

        match outcome {
            Ok(tx_hash) => {
                *next = Some(nonce + 1);
                info!(owner = %owner, handle, nonce, tx_hash = %tx_hash, "record submitted");
                Ok(TxReceipt { tx_hash, nonce, from })
            }
            Err(err) => {
                // Whether the write landed is unknown after a transport
                // failure; resynchronise before the next submission.
                *next = None;
                warn!(owner = %owner, handle, nonce, error = %err, "record submission failed");
                Err(err)
            }
        }
    }

    /// Read `owner`'s index entries from `caller`'s address context.
    ///
    /// The contract decides whether `caller` may see them; a refusal is
    /// `AccessDenied`, distinct from any transport failure.
    pub async fn query_records(
        &self,
        owner: &Address,
        caller: &Address,
    ) -> Result<Vec<RecordIndexEntry>, MedledgerError> {
        let data = abi::encode_get_records(owner);
        let result = retry(&self.settings.retry, "eth_call", || {
            with_timeout(
                self.settings.timeout,
                "eth_call",
                self.rpc.call(caller, &self.settings.contract, &data),
            )
        })
        .await;

        let output = match result {
            Ok(output) => output,
            Err(MedledgerError::LedgerRejected(reason)) => {
                debug!(owner = %owner, caller = %caller, reason = %reason, "ledger refused read");
                return Err(MedledgerError::AccessDenied(reason));
            }
            Err(err) => return Err(err),
        };

        Ok(abi::decode_records(&output)?
            .into_iter()
            .map(|(content_handle, timestamp)| RecordIndexEntry {
                content_handle,
                timestamp,
                owner: *owner,
            })
            .collect())
    }
}
