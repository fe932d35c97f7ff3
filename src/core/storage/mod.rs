// src/core/storage/mod.rs

//! Storage sinks: destinations that durably or remotely accept parsed
//! records.
//!
//! Every sink runs as its own task with a bounded inbox; the coordinator
//! talks to it through a [`StorageHandle`] and never blocks on a slow sink.
//! Exactly one [`StorageResult`] comes back per accepted store.

mod file;
mod graphite;

pub use file::FileStorage;
pub use graphite::{GraphiteStorage, marshal_lines};

use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::metrics;
use crate::core::record::{ParsedRecord, RecordId};
use crate::core::resolver::ResolverHandle;
use crate::core::stats::{StatsRegistry, StatsSession};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc, mpsc::error::TrySendError};
use tracing::warn;

/// Identifies one accepted store within a sink.
pub type StoreId = u64;

/// Capacity of a sink's command inbox. Together with the sink's own queue
/// bound this is the high-water mark behind the backpressure skip.
const INBOX_CAPACITY: usize = 64;

/// How long a sink keeps flushing at shutdown before pending records are
/// logged as lost.
pub const FLUSH_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// The terminal state of one store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Ok,
    Err(String),
}

/// Emitted by a sink exactly once per accepted `store()`.
#[derive(Debug, Clone)]
pub struct StorageResult {
    pub storage: String,
    pub store_id: StoreId,
    pub record_id: RecordId,
    pub outcome: StoreOutcome,
}

/// Commands a sink task consumes.
#[derive(Debug)]
pub enum StoreCommand {
    Store {
        store_id: StoreId,
        record: ParsedRecord,
    },
    /// Nulls the queued slot for `store_id`; the drain worker skips nulled
    /// slots. No result is emitted for a cancelled store.
    Cancel { store_id: StoreId },
}

/// Driver tags with the one-line documentation the CLI introspection
/// helpers print.
pub const STORAGE_DOCS: &[(&str, &str)] = &[
    ("file", "Serialized records under a strftime-expanded directory tree."),
    ("graphite", "Graphite plain-text line protocol over TCP, queued."),
];

/// The coordinator's side of one sink.
#[derive(Clone)]
pub struct StorageHandle {
    pub name: String,
    tx: mpsc::Sender<StoreCommand>,
    next_store_id: Arc<AtomicU64>,
    stats: Arc<StatsSession>,
}

impl StorageHandle {
    /// Hands a record to the sink without blocking. A full inbox is a
    /// backpressure error; the record is the caller's to count as dropped.
    pub fn try_store(&self, record: ParsedRecord) -> Result<StoreId, GatherError> {
        let store_id = self.next_store_id.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(StoreCommand::Store { store_id, record }) {
            Ok(()) => {
                self.stats.incr("enqueued");
                metrics::STORE_ENQUEUED_TOTAL
                    .with_label_values(&[&self.name])
                    .inc();
                Ok(store_id)
            }
            Err(_) => Err(GatherError::QueueFull(self.name.clone())),
        }
    }

    /// Best-effort cancel of a queued store.
    pub fn cancel(&self, store_id: StoreId) {
        let _ = self.tx.try_send(StoreCommand::Cancel { store_id });
    }
}

/// Everything needed to spawn one sink task.
pub enum StorageTask {
    File(FileStorage),
    Graphite(GraphiteStorage),
}

impl StorageTask {
    pub fn name(&self) -> &str {
        match self {
            StorageTask::File(s) => s.name(),
            StorageTask::Graphite(s) => s.name(),
        }
    }

    /// Runs the sink until shutdown, then flushes within [`FLUSH_GRACE`].
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) {
        match self {
            StorageTask::File(s) => s.run(shutdown_rx).await,
            StorageTask::Graphite(s) => s.run(shutdown_rx).await,
        }
    }
}

/// Builds one sink from its fragment: the handle for the coordinator and
/// the task to spawn.
pub fn build_storage(
    frag: &mut Fragment,
    resolver: ResolverHandle,
    results_tx: mpsc::Sender<StorageResult>,
    stats: &StatsRegistry,
) -> Result<(StorageHandle, StorageTask), GatherError> {
    let session = stats.register(&format!("storage.{}", frag.name));
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let handle = StorageHandle {
        name: frag.name.clone(),
        tx,
        next_store_id: Arc::new(AtomicU64::new(1)),
        stats: session.clone(),
    };

    let task = match frag.driver.as_str() {
        "file" => StorageTask::File(FileStorage::from_fragment(frag, rx, results_tx, session)?),
        "graphite" => StorageTask::Graphite(GraphiteStorage::from_fragment(
            frag, rx, results_tx, resolver, session,
        )?),
        other => return Err(GatherError::UnknownDriver(other.to_string())),
    };
    frag.finish()?;
    Ok((handle, task))
}

/// All configured sinks, keyed by instance name. Read-only after
/// configuration load.
#[derive(Default)]
pub struct StorageRegistry {
    handles: HashMap<String, StorageHandle>,
}

impl StorageRegistry {
    pub fn build(
        fragments: &mut [Fragment],
        resolver: &ResolverHandle,
        results_tx: &mpsc::Sender<StorageResult>,
        stats: &StatsRegistry,
    ) -> Result<(Self, Vec<StorageTask>), GatherError> {
        let mut handles = HashMap::new();
        let mut tasks = Vec::new();
        for frag in fragments.iter_mut() {
            let (handle, task) =
                build_storage(frag, resolver.clone(), results_tx.clone(), stats)?;
            handles.insert(frag.name.clone(), handle);
            tasks.push(task);
        }
        Ok((Self { handles }, tasks))
    }

    pub fn get(&self, name: &str) -> Option<&StorageHandle> {
        self.handles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Shared helper for sinks reporting a result; updates the per-sink
/// counters alongside. Never suspends: a sink's own loop must not stall on
/// the coordinator, so a full results channel costs the notification (the
/// underlying store already happened) and is counted instead.
pub(crate) fn emit_result(
    results_tx: &mpsc::Sender<StorageResult>,
    stats: &StatsSession,
    result: StorageResult,
) {
    match &result.outcome {
        StoreOutcome::Ok => {
            stats.incr("succeeded");
            metrics::STORE_OK_TOTAL
                .with_label_values(&[&result.storage])
                .inc();
        }
        StoreOutcome::Err(_) => {
            stats.incr("failed");
            metrics::STORE_ERR_TOTAL
                .with_label_values(&[&result.storage])
                .inc();
        }
    }
    match results_tx.try_send(result) {
        Ok(()) => {}
        Err(TrySendError::Full(result)) => {
            stats.incr("results_dropped");
            warn!(
                "Storage '{}': coordinator results channel full, answer for record {} dropped.",
                result.storage, result.record_id
            );
        }
        // A closed channel only happens at teardown, where the result is
        // moot.
        Err(TrySendError::Closed(_)) => {}
    }
}
