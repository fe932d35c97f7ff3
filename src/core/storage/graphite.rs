// src/core/storage/graphite.rs

//! The Graphite sink: a long-lived TCP client speaking the plain-text line
//! protocol, fed from a FIFO queue by a single drain worker.

use super::{FLUSH_GRACE, StorageResult, StoreCommand, StoreId, StoreOutcome, emit_result};
use crate::config::Fragment;
use crate::core::errors::GatherError;
use crate::core::metrics;
use crate::core::net::{ClientStream, ConnectOpts, TcpClient, write_flushed};
use crate::core::record::ParsedRecord;
use crate::core::resolver::ResolverHandle;
use crate::core::stats::StatsSession;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// How often the server address is re-resolved. Re-resolution never
/// disturbs an established connection.
const RERESOLVE_INTERVAL: Duration = Duration::from_secs(600);

/// Bound for one connect walk, resolve included.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound for writing and flushing one record's lines.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

// Backoff for the optional retry policy, between reconnect attempts.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

type QueueSlot = Option<(StoreId, ParsedRecord)>;

/// Queue discipline: `store()` appends; a single worker writes the head and
/// awaits the flush; flush success emits StoreOk and pulls the next
/// element. On any connection error the in-flight element emits StoreErr
/// and, by default, the queued elements are dropped with StoreErr each --
/// retry is the caller's responsibility. `cancel` nulls the queued slot.
pub struct GraphiteStorage {
    name: String,
    host: String,
    port: u16,
    /// Retain the queue across connection errors instead of dropping it.
    retry_on_error: bool,
    max_queue: usize,
    inbox: mpsc::Receiver<StoreCommand>,
    results_tx: mpsc::Sender<StorageResult>,
    resolver: ResolverHandle,
    stats: Arc<StatsSession>,
    queue: VecDeque<QueueSlot>,
    conn: Option<ClientStream>,
    reconnect_delay: Duration,
}

impl GraphiteStorage {
    pub fn from_fragment(
        frag: &mut Fragment,
        inbox: mpsc::Receiver<StoreCommand>,
        results_tx: mpsc::Sender<StorageResult>,
        resolver: ResolverHandle,
        stats: Arc<StatsSession>,
    ) -> Result<Self, GatherError> {
        let host = frag
            .take_str("host")
            .ok_or_else(|| GatherError::Config("graphite storage needs a 'host' key".into()))?;
        Ok(Self {
            name: frag.name.clone(),
            host,
            port: frag.take_parsed_or("port", 2003u16)?,
            retry_on_error: frag.take_bool_or("retry_on_error", false)?,
            max_queue: frag.take_parsed_or("max_queue", 1000usize)?,
            inbox,
            results_tx,
            resolver,
            stats,
            queue: VecDeque::new(),
            conn: None,
            reconnect_delay: INITIAL_RECONNECT_DELAY,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Graphite sink '{}' started for {}:{}.", self.name, self.host, self.port);
        let mut reresolve = tokio::time::interval(RERESOLVE_INTERVAL);
        reresolve.reset();

        loop {
            // A busy drain path must still observe shutdown.
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            // Land any queued commands (cancels included) before draining.
            self.pump_inbox();
            self.publish_depth();

            if let Some(slot) = self.next_slot() {
                // Drain the head; the worker is single, so the loop simply
                // awaits the write before touching the next element.
                if self.drain_one(slot).await {
                    self.reconnect_delay = INITIAL_RECONNECT_DELAY;
                    continue;
                }
                // Retry policy: the head went back to the queue; back off
                // before the next connect attempt, still watching shutdown.
                tokio::select! {
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                    _ = shutdown_rx.recv() => break,
                }
                self.reconnect_delay = (self.reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                continue;
            }

            tokio::select! {
                cmd = self.inbox.recv(), if self.queue.len() < self.max_queue => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                _ = reresolve.tick() => {
                    self.reresolve().await;
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        self.shutdown_flush().await;
    }

    fn handle_command(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::Store { store_id, record } => {
                self.queue.push_back(Some((store_id, record)));
            }
            StoreCommand::Cancel { store_id } => {
                for slot in self.queue.iter_mut() {
                    if slot.as_ref().is_some_and(|(id, _)| *id == store_id) {
                        *slot = None;
                        self.stats.incr("cancelled");
                        break;
                    }
                }
            }
        }
    }

    fn pump_inbox(&mut self) {
        while self.queue.len() < self.max_queue {
            match self.inbox.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => break,
            }
        }
    }

    /// Pops until a non-nulled slot appears.
    fn next_slot(&mut self) -> Option<(StoreId, ParsedRecord)> {
        while let Some(slot) = self.queue.pop_front() {
            match slot {
                Some(entry) => return Some(entry),
                None => continue,
            }
        }
        None
    }

    fn publish_depth(&self) {
        let depth = self.queue.len() as f64;
        self.stats.set("qsize", depth);
        metrics::STORE_QUEUE_DEPTH
            .with_label_values(&[&self.name])
            .set(depth);
    }

    /// Writes one record and applies the connection-error queue policy.
    /// Returns `false` when the element went back to the queue for a
    /// later retry.
    async fn drain_one(&mut self, (store_id, record): (StoreId, ParsedRecord)) -> bool {
        let record_id = record.id;
        match self.write_record(&record).await {
            Ok(()) => {
                self.emit(store_id, record_id, StoreOutcome::Ok);
                true
            }
            Err(e) => {
                warn!("Graphite sink '{}': {}", self.name, e);
                self.conn = None;
                if self.retry_on_error {
                    self.queue.push_front(Some((store_id, record)));
                    return false;
                }
                self.emit(store_id, record_id, StoreOutcome::Err(e.to_string()));
                self.fail_queue("connection error");
                true
            }
        }
    }

    async fn write_record(&mut self, record: &ParsedRecord) -> Result<(), GatherError> {
        if self.conn.is_none() {
            let mut client = TcpClient::new(self.host.clone(), self.port);
            let opts = ConnectOpts {
                timeout: CONNECT_TIMEOUT,
                failover: true,
                shuffle: false,
                tls: None,
            };
            self.conn = Some(client.connect(&self.resolver, &opts).await?);
        }
        let lines = marshal_lines(record);
        let conn = self.conn.as_mut().ok_or_else(|| {
            GatherError::Internal("graphite connection vanished".into())
        })?;
        tokio::time::timeout(WRITE_TIMEOUT, write_flushed(conn, &lines))
            .await
            .map_err(|_| GatherError::FetchTimeout(WRITE_TIMEOUT.as_millis() as u64))?
    }

    /// Fails every queued element; nulled slots are skipped silently.
    fn fail_queue(&mut self, reason: &str) {
        while let Some(slot) = self.queue.pop_front() {
            if let Some((store_id, record)) = slot {
                self.emit(store_id, record.id, StoreOutcome::Err(reason.to_string()));
            }
        }
        self.publish_depth();
    }

    fn emit(&self, store_id: StoreId, record_id: u64, outcome: StoreOutcome) {
        emit_result(
            &self.results_tx,
            &self.stats,
            StorageResult {
                storage: self.name.clone(),
                store_id,
                record_id,
                outcome,
            },
        );
    }

    /// Refreshes the cached server addresses. The established connection,
    /// when there is one, keeps its peer.
    async fn reresolve(&self) {
        if self.host.parse::<std::net::IpAddr>().is_ok() {
            return;
        }
        match self.resolver.resolve(&self.host, CONNECT_TIMEOUT).await {
            Ok(addrs) => debug!(
                "Graphite sink '{}' re-resolved {} to {} addresses.",
                self.name,
                self.host,
                addrs.len()
            ),
            Err(e) => warn!(
                "Graphite sink '{}' re-resolution of {} failed: {}",
                self.name, self.host, e
            ),
        }
    }

    /// Best-effort drain at shutdown; whatever the grace period leaves
    /// behind is failed and logged as lost.
    async fn shutdown_flush(&mut self) {
        self.pump_inbox();
        let pending: usize = self.queue.iter().filter(|s| s.is_some()).count();
        info!(
            "Graphite sink '{}' shutting down, {} records queued.",
            self.name, pending
        );
        let deadline = tokio::time::Instant::now() + FLUSH_GRACE;
        while let Some(slot) = self.next_slot() {
            if tokio::time::Instant::now() >= deadline {
                let (store_id, record) = slot;
                self.emit(store_id, record.id, StoreOutcome::Err("shutdown".into()));
                continue;
            }
            if !self.drain_one(slot).await {
                // The retry policy does not extend past shutdown; fail the
                // pushed-back head along with everything behind it.
                self.fail_queue("shutdown");
                break;
            }
        }
        self.publish_depth();
        if let Some(mut conn) = self.conn.take() {
            use tokio::io::AsyncWriteExt;
            let _ = conn.shutdown().await;
        }
    }
}

/// Marshals one record into Graphite plain-text lines: one line per content
/// key, `host.key value unix_seconds\n`, dots in the host replaced by
/// underscores.
pub fn marshal_lines(record: &ParsedRecord) -> Vec<u8> {
    let host = record.host.replace('.', "_");
    let mut fbuf = ryu::Buffer::new();
    let mut ibuf = itoa::Buffer::new();
    let mut out = Vec::with_capacity(record.content.len() * 48);
    for (key, value) in &record.content {
        out.extend_from_slice(host.as_bytes());
        out.push(b'.');
        out.extend_from_slice(key.as_bytes());
        out.push(b' ');
        out.extend_from_slice(fbuf.format(*value).as_bytes());
        out.push(b' ');
        out.extend_from_slice(ibuf.format(record.finished_unix).as_bytes());
        out.push(b'\n');
    }
    out
}
