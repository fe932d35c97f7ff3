// src/core/pipeline.rs

//! The pipeline coordinator: the only component that knows sources,
//! parsers, filters and sinks all at once.
//!
//! It multiplexes raw records from every source through one bounded
//! channel, drives each through parse → filter → storage fan-out, and
//! accounts for every storage answer. It never blocks a source on a slow
//! sink; a full sink inbox is a counted drop.

use crate::core::errors::{ErrorKind, GatherError};
use crate::core::filter::FilterRegistry;
use crate::core::metrics;
use crate::core::parser::ParserRegistry;
use crate::core::record::{ParsedRecord, RawRecord, RecordId};
use crate::core::stats::StatsSession;
use crate::core::storage::{StorageRegistry, StorageResult, StoreOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Capacity of the raw-record channel all sources share.
pub const RAW_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the storage-result channel.
pub const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// How long shutdown waits for outstanding storage answers before giving
/// up on them.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// The coordinator task.
pub struct Coordinator {
    raw_rx: mpsc::Receiver<RawRecord>,
    results_rx: mpsc::Receiver<StorageResult>,
    parsers: Arc<ParserRegistry>,
    filters: Arc<FilterRegistry>,
    storages: Arc<StorageRegistry>,
    stats: Arc<StatsSession>,
    /// Remaining storage answers per record still in flight.
    outstanding: HashMap<RecordId, usize>,
    /// Used to take the whole daemon down on a fatal invariant violation.
    shutdown_tx: broadcast::Sender<()>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw_rx: mpsc::Receiver<RawRecord>,
        results_rx: mpsc::Receiver<StorageResult>,
        parsers: Arc<ParserRegistry>,
        filters: Arc<FilterRegistry>,
        storages: Arc<StorageRegistry>,
        stats: Arc<StatsSession>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            raw_rx,
            results_rx,
            parsers,
            filters,
            storages,
            stats,
            outstanding: HashMap::new(),
            shutdown_tx,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Pipeline coordinator started.");
        loop {
            tokio::select! {
                Some(raw) = self.raw_rx.recv() => {
                    self.process_record(raw);
                }
                Some(result) = self.results_rx.recv() => {
                    self.handle_result(result);
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
        self.drain().await;
    }

    /// One record through the pipeline: first parser that succeeds wins,
    /// filters in declared order over clones, then the storage fan-out.
    fn process_record(&mut self, raw: RawRecord) {
        self.stats.incr("records");
        metrics::RECORDS_RECEIVED_TOTAL.inc();

        if let Err(e) = raw.validate() {
            self.count_drop(&e, "invalid record");
            if e.kind() == ErrorKind::Fatal {
                error!("Fatal envelope violation: {}. Shutting down.", e);
                let _ = self.shutdown_tx.send(());
            }
            return;
        }

        let Some(parsed) = self.parse(&raw) else {
            return;
        };
        let Some(filtered) = self.apply_filters(&raw, parsed) else {
            return;
        };
        self.fan_out(filtered);
    }

    /// Runs the record's parsers in order; the first success wins. When all
    /// fail the record is dropped and counted as a parse error.
    fn parse(&self, raw: &RawRecord) -> Option<ParsedRecord> {
        let started = std::time::Instant::now();
        for name in &raw.parsers {
            match self.parsers.parse(name, &raw.payload) {
                Ok(content) => {
                    self.stats.incr("parsed");
                    metrics::RECORDS_PARSED_TOTAL.inc();
                    metrics::PARSE_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
                    return Some(ParsedRecord::from_raw(raw, content));
                }
                Err(e) => {
                    debug!(
                        "Parser '{}' rejected record {} from {}: {}",
                        name, raw.id, raw.url, e
                    );
                }
            }
        }
        self.stats.incr("parse_err");
        metrics::RECORDS_DROPPED_TOTAL
            .with_label_values(&["parse"])
            .inc();
        warn!(
            "Record {} from {} rejected by all of its parsers; dropped.",
            raw.id, raw.url
        );
        None
    }

    /// Applies the filters in declared order. Each filter sees a clone;
    /// its output replaces the current record. The first error aborts the
    /// pipeline for this record.
    fn apply_filters(&self, raw: &RawRecord, parsed: ParsedRecord) -> Option<ParsedRecord> {
        let mut current = parsed;
        for name in &raw.filters {
            match self.filters.apply(name, &current) {
                Ok(next) => current = next,
                Err(e) => {
                    self.stats.incr("filter_err");
                    metrics::RECORDS_DROPPED_TOTAL
                        .with_label_values(&["filter"])
                        .inc();
                    warn!("Filter '{}' aborted record {}: {}", name, current.id, e);
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Issues `store()` to every named sink. Acks + nacks + backpressure
    /// skips always add up to the record's storage list.
    fn fan_out(&mut self, record: ParsedRecord) {
        let mut accepted = 0usize;
        for name in record.storages.clone() {
            let Some(handle) = self.storages.get(&name) else {
                // Startup binding validation makes this unreachable; were a
                // name ever unresolved anyway, the skip counts against the
                // same bucket as a full queue so the ack arithmetic holds.
                self.stats.incr("dropped_backpressure");
                metrics::RECORDS_DROPPED_TOTAL
                    .with_label_values(&["unknown_storage"])
                    .inc();
                warn!("Record {} names unknown storage '{}'.", record.id, name);
                continue;
            };
            match handle.try_store(record.clone()) {
                Ok(_) => accepted += 1,
                Err(GatherError::QueueFull(storage)) => {
                    // Skip this sink, keep feeding the others.
                    self.stats.incr("dropped_backpressure");
                    metrics::RECORDS_DROPPED_TOTAL
                        .with_label_values(&["queue_full"])
                        .inc();
                    warn!(
                        "Storage '{}' queue full; record {} dropped for it.",
                        storage, record.id
                    );
                }
                Err(e) => {
                    self.stats.incr("dropped_backpressure");
                    warn!("Storage '{}' refused record {}: {}", name, record.id, e);
                }
            }
        }
        if accepted > 0 {
            self.outstanding.insert(record.id, accepted);
        }
        // With nothing accepted the record is already done; it is discarded
        // by falling out of scope here.
    }

    /// One storage answer: account it, and discard the record once its
    /// outstanding set is empty.
    fn handle_result(&mut self, result: StorageResult) {
        match result.outcome {
            StoreOutcome::Ok => self.stats.incr("store_ok"),
            StoreOutcome::Err(reason) => {
                self.stats.incr("store_err");
                debug!(
                    "Storage '{}' failed record {}: {}",
                    result.storage, result.record_id, reason
                );
            }
        }
        if let Some(remaining) = self.outstanding.get_mut(&result.record_id) {
            *remaining -= 1;
            if *remaining == 0 {
                self.outstanding.remove(&result.record_id);
            }
        }
        self.stats.set("outstanding", self.outstanding.len() as f64);
    }

    /// Best-effort drain of the pending-records set at shutdown.
    async fn drain(&mut self) {
        info!(
            "Coordinator shutting down; {} records awaiting storage answers.",
            self.outstanding.len()
        );
        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while !self.outstanding.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!(
                    "Drain grace expired with {} records still outstanding.",
                    self.outstanding.len()
                );
                break;
            }
            match tokio::time::timeout(remaining, self.results_rx.recv()).await {
                Ok(Some(result)) => self.handle_result(result),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Drain grace expired with {} records still outstanding.",
                        self.outstanding.len()
                    );
                    break;
                }
            }
        }
        info!("Coordinator stopped.");
    }

    fn count_drop(&self, e: &GatherError, what: &str) {
        self.stats.incr("invalid");
        metrics::RECORDS_DROPPED_TOTAL
            .with_label_values(&["invalid"])
            .inc();
        warn!("Dropping {}: {}", what, e);
    }
}
