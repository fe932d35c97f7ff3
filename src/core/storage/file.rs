// src/core/storage/file.rs

//! The file sink: one serialized record per file under a strftime-expanded
//! directory tree.

use super::{FLUSH_GRACE, StorageResult, StoreCommand, StoreOutcome, emit_result};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::metrics;
use crate::core::record::{ParsedRecord, StoredSample};
use crate::core::stats::StatsSession;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Writes each record to `dir/prefix + start_micros + "-" + id + ".bin"`,
/// where `dir` is a chrono strftime template expanded at store time.
/// Missing directories are created. Writes run asynchronously; the pending
/// set is drained at shutdown and a failed flush emits a store error.
pub struct FileStorage {
    name: String,
    dir_template: String,
    prefix: String,
    inbox: mpsc::Receiver<StoreCommand>,
    results_tx: mpsc::Sender<StorageResult>,
    stats: Arc<StatsSession>,
}

impl FileStorage {
    pub fn from_fragment(
        frag: &mut Fragment,
        inbox: mpsc::Receiver<StoreCommand>,
        results_tx: mpsc::Sender<StorageResult>,
        stats: Arc<StatsSession>,
    ) -> Result<Self, GatherError> {
        let dir_template = frag
            .take_str("dir")
            .ok_or_else(|| GatherError::Config("file storage needs a 'dir' key".into()))?;
        // A bad strftime code would otherwise only surface at store time.
        if chrono::format::StrftimeItems::new(&dir_template)
            .any(|item| matches!(item, chrono::format::Item::Error))
        {
            return Err(GatherError::Config(format!(
                "invalid strftime template '{dir_template}'"
            )));
        }
        Ok(Self {
            name: frag.name.clone(),
            dir_template,
            prefix: frag.take_str_or("prefix", "sample-"),
            inbox,
            results_tx,
            stats,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The target path for one record, with the directory template expanded
    /// against the current local time.
    fn target_path(&self, record: &ParsedRecord) -> PathBuf {
        let dir = chrono::Local::now()
            .format(&self.dir_template)
            .to_string();
        PathBuf::from(dir).join(format!(
            "{}{}-{}.bin",
            self.prefix, record.start_micros, record.id
        ))
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("File sink '{}' started.", self.name);
        // The actual pending-write set; shutdown drains exactly this.
        let mut pending: JoinSet<StorageResult> = JoinSet::new();

        loop {
            tokio::select! {
                cmd = self.inbox.recv() => {
                    match cmd {
                        Some(StoreCommand::Store { store_id, record }) => {
                            self.spawn_write(&mut pending, store_id, record);
                        }
                        // Writes start immediately; a cancel that arrives
                        // afterwards has nothing left to null.
                        Some(StoreCommand::Cancel { .. }) => {}
                        None => break,
                    }
                }
                Some(done) = pending.join_next(), if !pending.is_empty() => {
                    self.finish_write(done);
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
            self.stats.set("qsize", pending.len() as f64);
            metrics::STORE_QUEUE_DEPTH
                .with_label_values(&[&self.name])
                .set(pending.len() as f64);
        }

        // Drain the pending-write set within the flush grace.
        info!(
            "File sink '{}' shutting down, {} writes pending.",
            self.name,
            pending.len()
        );
        let drain = async {
            while let Some(done) = pending.join_next().await {
                self.finish_write(done);
            }
        };
        if tokio::time::timeout(FLUSH_GRACE, drain).await.is_err() {
            warn!(
                "File sink '{}' flush grace expired; {} records lost.",
                self.name,
                pending.len()
            );
        }
    }

    fn spawn_write(
        &self,
        pending: &mut JoinSet<StorageResult>,
        store_id: u64,
        record: ParsedRecord,
    ) {
        let path = self.target_path(&record);
        let storage = self.name.clone();
        let record_id = record.id;
        pending.spawn(async move {
            let outcome = match write_record(&path, &record).await {
                Ok(()) => StoreOutcome::Ok,
                Err(e) => StoreOutcome::Err(e.to_string()),
            };
            StorageResult {
                storage,
                store_id,
                record_id,
                outcome,
            }
        });
    }

    fn finish_write(&self, done: Result<StorageResult, tokio::task::JoinError>) {
        match done {
            Ok(result) => emit_result(&self.results_tx, &self.stats, result),
            Err(e) => warn!("File sink '{}' write task panicked: {e:?}", self.name),
        }
    }
}

async fn write_record(path: &PathBuf, record: &ParsedRecord) -> Result<(), GatherError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let encoded = StoredSample::from(record).encode()?;
    tokio::fs::write(path, encoded).await?;
    Ok(())
}
