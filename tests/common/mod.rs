//! Shared wiring for integration tests: a pipeline over in-memory
//! collaborators, with call counters on the network-facing ones.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medledger::directory::{IdentityDirectory, MemoryDirectory};
use medledger::eth::{Address, Signer};
use medledger::identity::sign_challenge;
use medledger::ledger::{LedgerClient, LedgerSettings, MemoryLedger};
use medledger::retry::RetryPolicy;
use medledger::store::{BlobStore, ContentStore, MemoryStore};
use medledger::{Account, MedledgerError, RecordPipeline, Role};

pub const CONTRACT: Address = Address::from_bytes([0xC0; 20]);

/// Fast policy so retry paths don't slow the suite down.
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

/// `MemoryStore` that counts every call it receives.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn objects(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl ContentStore for CountingStore {
    async fn put_bytes(&self, bytes: &[u8]) -> Result<String, MedledgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.put_bytes(bytes).await
    }

    async fn get_bytes(&self, handle: &str) -> Result<Vec<u8>, MedledgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_bytes(handle).await
    }
}

pub struct Harness {
    pub pipeline: RecordPipeline,
    pub directory: Arc<MemoryDirectory>,
    pub store: Arc<CountingStore>,
    pub ledger: Arc<MemoryLedger>,
}

impl Harness {
    /// Network calls made so far, across store and ledger.
    pub fn network_calls(&self) -> usize {
        self.store.calls() + self.ledger.call_count()
    }
}

pub fn ledger_client(ledger: Arc<MemoryLedger>) -> LedgerClient {
    let mut settings = LedgerSettings::new(ledger.contract(), 1337);
    settings.retry = quick_retry();
    settings.timeout = Duration::from_secs(2);
    LedgerClient::new(ledger, settings)
}

/// Install a test-writer subscriber once; `RUST_LOG` overrides the level.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medledger=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn harness() -> Harness {
    init_test_tracing();
    let directory = Arc::new(MemoryDirectory::new());
    let store = Arc::new(CountingStore::default());
    let ledger = Arc::new(MemoryLedger::new(CONTRACT));

    let blobs = BlobStore::new(store.clone(), Duration::from_secs(2));
    let pipeline = RecordPipeline::new(
        directory.clone(),
        blobs,
        Arc::new(ledger_client(ledger.clone())),
        Signer::random().unwrap(),
    )
    .with_retry(quick_retry());

    Harness {
        pipeline,
        directory,
        store,
        ledger,
    }
}

/// Register an account (no wallet yet).
pub fn register(h: &Harness, handle: &str, role: Role) -> Account {
    h.directory
        .insert(Account::new(handle, handle, role))
        .unwrap();
    Account::new(handle, handle, role)
}

/// Register an account and bind a fresh wallet to it.
pub async fn register_and_bind(h: &Harness, handle: &str, role: Role) -> (Account, Signer) {
    let mut account = register(h, handle, role);
    let wallet = Signer::random().unwrap();
    let signature = sign_challenge(&wallet).unwrap();
    h.pipeline
        .bind(&mut account, &wallet.address().to_checksum(), &signature)
        .await
        .unwrap();
    assert_eq!(
        h.directory.lookup(handle).await.unwrap().bound_address,
        Some(wallet.address())
    );
    (account, wallet)
}
