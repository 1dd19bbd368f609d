//! Outbox of remote writes issued by optimistic actions.
//!
//! Actions enqueue a [`WriteOp`] and return immediately. A single worker task executes
//! the queue in FIFO order, so one client's writes reach the remote in call order, and
//! records each entry as confirmed or failed. Failures are never rolled back locally.
//!
//! Entries that were not yet settled when a snapshot fetch started are replayed onto that
//! snapshot before it replaces the store state, so a background reload cannot erase an
//! in-flight edit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::errors::AppError;
use crate::remote::{
    apply_patch, apply_reorder, procedures, reorder_ids, row_id, Filter, RemoteStore, Row,
};

/// Collection name -> rows, as fetched for one snapshot.
pub type RawSnapshot = HashMap<String, Vec<Row>>;

/// A single remote mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        collection: String,
        rows: Vec<Row>,
    },
    Update {
        collection: String,
        patch: Row,
        filter: Filter,
    },
    Delete {
        collection: String,
        filter: Filter,
    },
    Call {
        procedure: String,
        args: Value,
    },
}

impl WriteOp {
    pub fn insert(collection: &str, rows: Vec<Row>) -> Self {
        WriteOp::Insert {
            collection: collection.to_string(),
            rows,
        }
    }

    pub fn update(collection: &str, patch: Row, filter: Filter) -> Self {
        WriteOp::Update {
            collection: collection.to_string(),
            patch,
            filter,
        }
    }

    pub fn delete(collection: &str, filter: Filter) -> Self {
        WriteOp::Delete {
            collection: collection.to_string(),
            filter,
        }
    }

    pub fn call(procedure: &str, args: Value) -> Self {
        WriteOp::Call {
            procedure: procedure.to_string(),
            args,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            WriteOp::Insert { collection, rows } => {
                format!("insert {} row(s) into {}", rows.len(), collection)
            }
            WriteOp::Update { collection, .. } => format!("update {}", collection),
            WriteOp::Delete { collection, .. } => format!("delete from {}", collection),
            WriteOp::Call { procedure, .. } => format!("call {}", procedure),
        }
    }

    async fn execute(&self, remote: &dyn RemoteStore) -> Result<(), AppError> {
        match self {
            WriteOp::Insert { collection, rows } => remote.insert(collection, rows.clone()).await,
            WriteOp::Update {
                collection,
                patch,
                filter,
            } => remote.update(collection, patch.clone(), filter).await,
            WriteOp::Delete { collection, filter } => remote.delete(collection, filter).await,
            WriteOp::Call { procedure, args } => {
                remote.call(procedure, args.clone()).await.map(|_| ())
            }
        }
    }

    /// Replay this write onto a fetched snapshot.
    pub fn overlay(&self, snapshot: &mut RawSnapshot) {
        match self {
            WriteOp::Insert { collection, rows } => {
                let existing = snapshot.entry(collection.clone()).or_default();
                for row in rows {
                    let present = row_id(row)
                        .is_some_and(|id| existing.iter().any(|r| row_id(r) == Some(id)));
                    if !present {
                        existing.push(row.clone());
                    }
                }
            }
            WriteOp::Update {
                collection,
                patch,
                filter,
            } => {
                if let Some(rows) = snapshot.get_mut(collection) {
                    apply_patch(rows, patch, filter);
                }
            }
            WriteOp::Delete { collection, filter } => {
                if let Some(rows) = snapshot.get_mut(collection) {
                    rows.retain(|row| !filter.matches(row));
                }
            }
            WriteOp::Call { procedure, args } => {
                let Some(collection) = procedures::reorder_target(procedure) else {
                    return;
                };
                match (reorder_ids(args), snapshot.get_mut(collection)) {
                    (Ok(ids), Some(rows)) => {
                        apply_reorder(rows, &ids);
                    }
                    (Err(e), _) => tracing::warn!("Skipping malformed pending reorder: {}", e),
                    _ => {}
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Pending,
    Confirmed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub seq: u64,
    pub op: WriteOp,
    pub status: WriteStatus,
    pub enqueued_at: String,
}

#[derive(Debug, Default)]
struct Ledger {
    entries: Vec<OutboxEntry>,
    next_seq: u64,
    /// Every entry with `seq <= settled_through` is confirmed or failed
    settled_through: u64,
    last_error: Option<String>,
}

/// Queue of pending remote writes with a single FIFO worker.
pub struct Outbox {
    ledger: Arc<Mutex<Ledger>>,
    queue: mpsc::UnboundedSender<u64>,
    pending: watch::Receiver<usize>,
    pending_tx: Arc<watch::Sender<usize>>,
    worker: JoinHandle<()>,
}

impl Outbox {
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn start(remote: Arc<dyn RemoteStore>) -> Self {
        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let (queue, rx) = mpsc::unbounded_channel();
        let (pending_tx, pending) = watch::channel(0usize);
        let pending_tx = Arc::new(pending_tx);

        let worker = tokio::spawn(run_worker(
            remote,
            Arc::clone(&ledger),
            rx,
            Arc::clone(&pending_tx),
        ));

        Self {
            ledger,
            queue,
            pending,
            pending_tx,
            worker,
        }
    }

    /// Queue a write; returns its sequence number.
    pub async fn enqueue(&self, op: WriteOp) -> u64 {
        let seq = {
            let mut ledger = self.ledger.lock().await;
            ledger.next_seq += 1;
            let seq = ledger.next_seq;
            tracing::debug!("Outbox #{}: {}", seq, op.describe());
            ledger.entries.push(OutboxEntry {
                seq,
                op,
                status: WriteStatus::Pending,
                enqueued_at: Utc::now().to_rfc3339(),
            });
            seq
        };
        self.pending_tx.send_modify(|n| *n += 1);
        if self.queue.send(seq).is_err() {
            tracing::error!("Outbox worker stopped; write #{} will not be sent", seq);
            self.settle(seq, WriteStatus::Failed("Outbox worker stopped".to_string()))
                .await;
        }
        seq
    }

    async fn settle(&self, seq: u64, status: WriteStatus) {
        settle(&self.ledger, &self.pending_tx, seq, status).await;
    }

    /// Wait until every queued write has been confirmed or failed.
    pub async fn flush(&self) {
        let mut pending = self.pending.clone();
        // The sender lives as long as `self`, so this only errors on shutdown.
        pending.wait_for(|n| *n == 0).await.ok();
    }

    pub async fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    pub async fn entries(&self) -> Vec<OutboxEntry> {
        self.ledger.lock().await.entries.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.ledger.lock().await.last_error.clone()
    }

    pub async fn clear_error(&self) {
        self.ledger.lock().await.last_error = None;
    }

    /// High-water mark of settled writes; capture before fetching a snapshot.
    pub async fn settled_through(&self) -> u64 {
        self.ledger.lock().await.settled_through
    }

    /// Replay every non-failed write newer than `watermark` onto `snapshot`.
    pub async fn overlay_since(&self, watermark: u64, snapshot: &mut RawSnapshot) -> usize {
        let ledger = self.ledger.lock().await;
        let mut replayed = 0;
        for entry in ledger.entries.iter().filter(|e| e.seq > watermark) {
            if matches!(entry.status, WriteStatus::Failed(_)) {
                continue;
            }
            entry.op.overlay(snapshot);
            replayed += 1;
        }
        replayed
    }

    /// Drop settled entries the snapshot already reflects.
    pub async fn prune_through(&self, watermark: u64) {
        let mut ledger = self.ledger.lock().await;
        ledger
            .entries
            .retain(|e| e.seq > watermark || e.status == WriteStatus::Pending);
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    remote: Arc<dyn RemoteStore>,
    ledger: Arc<Mutex<Ledger>>,
    mut rx: mpsc::UnboundedReceiver<u64>,
    pending_tx: Arc<watch::Sender<usize>>,
) {
    while let Some(seq) = rx.recv().await {
        let op = {
            let ledger = ledger.lock().await;
            ledger
                .entries
                .iter()
                .find(|e| e.seq == seq)
                .map(|e| e.op.clone())
        };
        let Some(op) = op else {
            continue;
        };

        let status = match op.execute(remote.as_ref()).await {
            Ok(()) => WriteStatus::Confirmed,
            Err(e) => {
                tracing::error!("Remote write #{} ({}) failed: {}", seq, op.describe(), e);
                WriteStatus::Failed(e.to_string())
            }
        };
        settle(&ledger, &pending_tx, seq, status).await;
    }
}

async fn settle(
    ledger: &Mutex<Ledger>,
    pending_tx: &watch::Sender<usize>,
    seq: u64,
    status: WriteStatus,
) {
    {
        let mut ledger = ledger.lock().await;
        if let WriteStatus::Failed(message) = &status {
            ledger.last_error = Some(message.clone());
        }
        if let Some(entry) = ledger.entries.iter_mut().find(|e| e.seq == seq) {
            entry.status = status;
        }
        ledger.settled_through = ledger.settled_through.max(seq);
    }
    pending_tx.send_modify(|n| *n = n.saturating_sub(1));
}
