//! In-process ledger speaking the same ABI as the records contract.
//!
//! Enforces what a real chain would: one sequence counter per sender (a
//! transaction must carry exactly the next value), append-only entries, and
//! the contract's read policy (an owner reads their own entries; a doctor
//! reads a patient's entries once granted). Failures can be injected to
//! exercise the pipeline's error paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::LedgerRpc;
use crate::error::{MedledgerError, TransportKind};
use crate::eth::{abi, Address, SignedTransaction};

#[derive(Default)]
struct LedgerState {
    nonces: HashMap<Address, u64>,
    records: HashMap<Address, Vec<(String, u64)>>,
    /// (patient, doctor) pairs allowed to read.
    grants: HashSet<(Address, Address)>,
    accepted: Vec<SignedTransaction>,
    transport_failures: u32,
    write_rejection: Option<String>,
}

pub struct MemoryLedger {
    contract: Address,
    state: Mutex<LedgerState>,
    calls: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            state: Mutex::new(LedgerState::default()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    fn state(&self) -> Result<MutexGuard<'_, LedgerState>, MedledgerError> {
        self.state
            .lock()
            .map_err(|_| MedledgerError::poisoned("ledger state"))
    }

    /// Allow `doctor` to read `patient`'s entries.
    pub fn grant_access(&self, patient: Address, doctor: Address) {
        if let Ok(mut state) = self.state() {
            state.grants.insert((patient, doctor));
        }
    }

    pub fn revoke_access(&self, patient: Address, doctor: Address) {
        if let Ok(mut state) = self.state() {
            state.grants.remove(&(patient, doctor));
        }
    }

    /// Fail the next `n` RPC calls with an unreachable-transport error.
    pub fn inject_transport_failures(&self, n: u32) {
        if let Ok(mut state) = self.state() {
            state.transport_failures = n;
        }
    }

    /// Reject every write with `reason` until cleared with `None`.
    pub fn reject_writes(&self, reason: Option<&str>) {
        if let Ok(mut state) = self.state() {
            state.write_rejection = reason.map(str::to_string);
        }
    }

    /// Total RPC calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sequence numbers of accepted transactions from `sender`, in order.
    pub fn accepted_nonces(&self, sender: &Address) -> Vec<u64> {
        self.state()
            .map(|s| {
                s.accepted
                    .iter()
                    .filter(|tx| tx.from == *sender)
                    .map(|tx| tx.nonce)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Chain-side sequence counter of `sender`.
    pub fn transaction_count_of(&self, sender: &Address) -> u64 {
        self.state()
            .map(|s| s.nonces.get(sender).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Raw entries indexed under `owner`, bypassing the read policy.
    pub fn records_of(&self, owner: &Address) -> Vec<(String, u64)> {
        self.state()
            .map(|s| s.records.get(owner).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Count the call and consume one injected failure, if any.
    async fn enter(&self) -> Result<(), MedledgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Give other tasks a chance to interleave, as a network hop would.
        tokio::task::yield_now().await;
        let mut state = self.state()?;
        if state.transport_failures > 0 {
            state.transport_failures -= 1;
            return Err(MedledgerError::transport(TransportKind::Unreachable, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRpc for MemoryLedger {
    async fn transaction_count(&self, address: &Address) -> Result<u64, MedledgerError> {
        self.enter().await?;
        Ok(self.transaction_count_of(address))
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, MedledgerError> {
        self.enter().await?;
        let mut state = self.state()?;

        if let Some(reason) = &state.write_rejection {
            return Err(MedledgerError::LedgerRejected(reason.clone()));
        }
        if state.accepted.iter().any(|t| t.hash == tx.hash) {
            return Ok(tx.hash_hex());
        }
        if tx.to != self.contract {
            return Err(MedledgerError::LedgerRejected("execution reverted: unknown contract".into()));
        }

        let expected = state.nonces.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce < expected {
            return Err(MedledgerError::LedgerRejected(format!(
                "nonce too low: next nonce {}, tx nonce {}",
                expected, tx.nonce
            )));
        }
        if tx.nonce > expected {
            return Err(MedledgerError::LedgerRejected(format!(
                "nonce too high: next nonce {}, tx nonce {}",
                expected, tx.nonce
            )));
        }

        let (owner, handle) = abi::decode_add_record(&tx.data)
            .map_err(|_| MedledgerError::LedgerRejected("execution reverted: bad calldata".into()))?;

        let timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        state.records.entry(owner).or_default().push((handle, timestamp));
        state.nonces.insert(tx.from, expected + 1);
        state.accepted.push(tx.clone());
        Ok(tx.hash_hex())
    }

    async fn call(&self, from: &Address, to: &Address, data: &[u8]) -> Result<Vec<u8>, MedledgerError> {
        self.enter().await?;
        if *to != self.contract {
            return Ok(Vec::new());
        }

        let owner = abi::decode_get_records(data)
            .map_err(|_| MedledgerError::LedgerRejected("execution reverted: bad calldata".into()))?;

        let state = self.state()?;
        if *from != owner && !state.grants.contains(&(owner, *from)) {
            return Err(MedledgerError::LedgerRejected("execution reverted: not authorized".into()));
        }

        let records = state.records.get(&owner).cloned().unwrap_or_default();
        Ok(abi::encode_records(&records))
    }
}
