//! Append-only pipeline audit trail.
//!
//! Records what the pipeline did with each request: completed uploads,
//! orphaned blobs (stored but never indexed), wallet bindings, and refused
//! reads. Records carry handles and addresses only; a `RecordKey` has no way
//! into this module.
//!
//! Supports pluggable sinks for forwarding records to files, S3, etc.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::eth::Address;

/// A sink that receives audit records. Implement this to forward records
/// to a file, database, or other persistent store.
///
/// `append` runs on the task that produced the event, inside an async
/// request. Keep it short; a sink that talks to a slow backend should hand
/// records to its own writer thread.
pub trait AuditSink: Send {
    /// Append a record. Called for every pipeline event.
    fn append(&mut self, record: AuditRecord);
}

type SharedSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Upload went all the way to `Complete`.
    UploadCompleted { handle: String, tx_hash: String },
    /// Blob is in the content store but indexing failed. Not reconciled.
    OrphanedBlob { handle: String, reason: String },
    /// Account bound to an address.
    WalletBound { address: Address },
    /// A read was refused, by role check or by the ledger.
    QueryDenied { owner: Address, reason: String },
}

/// A permanent record of a pipeline event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Handle of the account that made the request.
    pub account: String,
    pub event: AuditEvent,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn now(account: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            account: account.into(),
            event,
            timestamp: Utc::now(),
        }
    }
}

/// An append-only, shareable log of pipeline events.
///
/// Interior mutability lets concurrent requests append through `&self`.
/// Forward sinks receive a copy of every record. Each sink has its own lock,
/// taken after the sink list is released, so a slow sink only delays writers
/// to that sink.
#[derive(Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
    forward_sinks: Mutex<Vec<SharedSink>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &self.len())
            .field(
                "forward_sinks",
                &self.forward_sinks.lock().map(|s| s.len()).unwrap_or(0),
            )
            .finish()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to receive a copy of every record.
    pub fn add_forward_sink(&self, sink: Box<dyn AuditSink>) {
        if let Ok(mut sinks) = self.forward_sinks.lock() {
            sinks.push(Arc::new(Mutex::new(sink)));
        }
    }

    /// Append a new record to the log and forward to any attached sinks.
    pub fn append(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        let sinks: Vec<SharedSink> = self
            .forward_sinks
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        for sink in sinks {
            if let Ok(mut sink) = sink.lock() {
                sink.append(record.clone());
            }
        }
    }

    /// Return the number of records in the log.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the records so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes audit records as JSON lines (one per record) to a file.
/// Creates the file if it doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: std::fs::File,
}

impl FileAuditSink {
    /// Open or create a file for append-only audit logging.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, record: AuditRecord) {
        if let Ok(line) = serde_json::to_string(&record) {
            if let Err(err) = writeln!(self.file, "{line}").and_then(|_| self.file.flush()) {
                tracing::warn!(error = %err, "failed to write audit record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_event_serialization_is_tagged() {
        let record = AuditRecord::now(
            "alice@x",
            AuditEvent::OrphanedBlob {
                handle: "QmOrphan".into(),
                reason: "nonce too low".into(),
            },
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"orphaned_blob\""));
        assert!(json.contains("QmOrphan"));
    }

    struct GateSink {
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    }

    impl AuditSink for GateSink {
        fn append(&mut self, _record: AuditRecord) {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
    }

    struct NullSink;

    impl AuditSink for NullSink {
        fn append(&mut self, _record: AuditRecord) {}
    }

    fn bound(account: &str) -> AuditRecord {
        AuditRecord::now(
            account,
            AuditEvent::WalletBound {
                address: Address::from_bytes([3; 20]),
            },
        )
    }

    #[test]
    fn test_blocked_sink_does_not_hold_the_log() {
        let log = Arc::new(AuditLog::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        log.add_forward_sink(Box::new(GateSink {
            entered: entered_tx,
            release: release_rx,
        }));

        let writer = {
            let log = Arc::clone(&log);
            std::thread::spawn(move || log.append(bound("alice@x")))
        };
        entered_rx.recv().unwrap();

        // The sink is mid-write; the log itself stays usable.
        log.add_forward_sink(Box::new(NullSink));
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].account, "alice@x");

        release_tx.send(()).unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn test_file_sink_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("medledger-audit-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let log = AuditLog::new();
        log.add_forward_sink(Box::new(FileAuditSink::new(&path).unwrap()));
        log.append(AuditRecord::now(
            "bob@x",
            AuditEvent::WalletBound {
                address: Address::from_bytes([9; 20]),
            },
        ));
        log.append(AuditRecord::now(
            "bob@x",
            AuditEvent::UploadCompleted {
                handle: "QmDone".into(),
                tx_hash: "0xabc".into(),
            },
        ));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.account, "bob@x");
        assert_eq!(log.len(), 2);

        let _ = std::fs::remove_file(&path);
    }
}
