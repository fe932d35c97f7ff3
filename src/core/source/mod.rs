// src/core/source/mod.rs

//! Source drivers and the per-source scheduler.
//!
//! A driver knows how to perform one fetch; the [`SourceRunner`] owns the
//! schedule, enforces the single-fetch-in-flight contract and turns every
//! successful fetch into a [`RawRecord`] for the coordinator.

mod exec;
mod http;
mod memcached;
mod statik;

pub use exec::{ExecSource, ExecSshSource, MysqlSource};
pub use http::HttpSource;
pub use memcached::MemcachedSource;
pub use statik::{DummySource, StaticSource};

use crate::config::{Fragment, ScheduleConfig};
use crate::core::errors::GatherError;
use crate::core::metrics;
use crate::core::record::{RawRecord, RecordIdGen};
use crate::core::resolver::ResolverHandle;
use crate::core::stats::StatsSession;
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{broadcast, mpsc, mpsc::error::TrySendError};
use tracing::{debug, info, warn};

/// What a fetch gets handed besides its driver config.
pub struct FetchContext {
    pub resolver: ResolverHandle,
    /// The fetch deadline; drivers pass it down to connects and reads. The
    /// runner additionally enforces it around the whole fetch.
    pub timeout: Duration,
}

/// One endpoint fetcher. Implementations are immutable after construction;
/// all per-cycle state lives in the runner.
#[async_trait]
pub trait SourceDriver: Send + Sync {
    /// The driver tag this instance was built from.
    fn driver(&self) -> &'static str;

    /// A human-readable identity, e.g. the URL or command line.
    fn signature(&self) -> String;

    /// The host/port the resulting records are attributed to.
    fn endpoint(&self) -> (String, u16);

    async fn fetch(&self, ctx: &FetchContext) -> Result<Bytes, GatherError>;
}

/// Driver tags with the one-line documentation the CLI introspection
/// helpers print.
pub const SOURCE_DOCS: &[(&str, &str)] = &[
    ("http", "HTTP/1.1 GET: chunked bodies, gzip/deflate, basic auth, proxy."),
    ("exec", "Run a local command and collect its stdout."),
    ("exec_ssh", "exec behind an injected 'ssh [options] user@host' prefix."),
    ("mysql", "Spawn the mysql batch client and collect status rows."),
    ("memcached", "The memcached 'stats' dialog, decoded until END."),
    ("static", "A constant configured body; pipeline testing."),
    ("dummy", "A randomly succeeding body after a random delay."),
];

/// Builds one source from its fragment: the common schedule plus the
/// driver.
pub fn build_source(
    frag: &mut Fragment,
) -> Result<(ScheduleConfig, Arc<dyn SourceDriver>), GatherError> {
    let schedule = ScheduleConfig::from_fragment(frag)?;
    let driver: Arc<dyn SourceDriver> = match frag.driver.as_str() {
        "http" => Arc::new(HttpSource::from_fragment(frag)?),
        "exec" => Arc::new(ExecSource::from_fragment(frag)?),
        "exec_ssh" => Arc::new(ExecSshSource::from_fragment(frag)?),
        "mysql" => Arc::new(MysqlSource::from_fragment(frag)?),
        "memcached" => Arc::new(MemcachedSource::from_fragment(frag)?),
        "static" => Arc::new(StaticSource::from_fragment(frag)?),
        "dummy" => Arc::new(DummySource::from_fragment(frag)?),
        other => return Err(GatherError::UnknownDriver(other.to_string())),
    };
    frag.finish()?;
    Ok((schedule, driver))
}

/// The task owning one source's schedule. `start()` is spawning it;
/// `stop()` is the shutdown broadcast.
pub struct SourceRunner {
    name: String,
    schedule: ScheduleConfig,
    driver: Arc<dyn SourceDriver>,
    resolver: ResolverHandle,
    raw_tx: mpsc::Sender<RawRecord>,
    ids: Arc<RecordIdGen>,
    stats: Arc<StatsSession>,
}

impl SourceRunner {
    pub fn new(
        name: String,
        schedule: ScheduleConfig,
        driver: Arc<dyn SourceDriver>,
        resolver: ResolverHandle,
        raw_tx: mpsc::Sender<RawRecord>,
        ids: Arc<RecordIdGen>,
        stats: Arc<StatsSession>,
    ) -> Self {
        Self {
            name,
            schedule,
            driver,
            resolver,
            raw_tx,
            ids,
            stats,
        }
    }

    pub fn signature(&self) -> String {
        self.driver.signature()
    }

    /// The fetch loop. Exactly one fetch per interval in steady state; an
    /// overrun is cancelled at the timeout, counted as an error, and
    /// shortens the next wait without ever overlapping fetches.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Source '{}' ({}) starting: every {:?}, timeout {:?}.",
            self.name,
            self.driver.signature(),
            self.schedule.interval,
            self.schedule.timeout
        );
        let mut next = Instant::now() + self.roll_jitter();
        let mut failures: VecDeque<Instant> = VecDeque::new();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next.into()) => {}
                _ = shutdown_rx.recv() => {
                    // Cancelling here drops any not-yet-started fetch; an
                    // in-flight one is below and bounded by its timeout.
                    debug!("Source '{}' stopping.", self.name);
                    return;
                }
            }

            if !self.fetch_once(&mut failures, &mut shutdown_rx).await {
                debug!("Source '{}' stopping mid-fetch.", self.name);
                return;
            }

            // The schedule is never advanced by an overrun: the next fire
            // stays on the grid, a late fetch just shortens the wait.
            next += self.schedule.interval + self.roll_jitter();
            let now = Instant::now();
            if next < now {
                next = now;
            }

            if self.should_pause(&mut failures) {
                warn!(
                    "Source '{}' exceeded {} failures in {:?}; pausing for one window.",
                    self.name, self.schedule.max_failures, self.schedule.failure_window
                );
                next = now + self.schedule.failure_window;
                failures.clear();
            }
        }
    }

    /// Returns `false` when shutdown interrupted the fetch.
    async fn fetch_once(
        &self,
        failures: &mut VecDeque<Instant>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        let ctx = FetchContext {
            resolver: self.resolver.clone(),
            timeout: self.schedule.timeout,
        };
        let started = Instant::now();
        let wall_started = SystemTime::now();
        self.stats.incr("fetch");
        metrics::FETCHES_TOTAL
            .with_label_values(&[self.driver.driver()])
            .inc();

        let fetched = tokio::select! {
            res = tokio::time::timeout(self.schedule.timeout, self.driver.fetch(&ctx)) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => Err(GatherError::FetchTimeout(
                        self.schedule.timeout.as_millis() as u64,
                    )),
                }
            }
            // Shutdown cancels the in-flight fetch outright.
            _ = shutdown_rx.recv() => Err(GatherError::ShuttingDown),
        };
        let finished = Instant::now();
        let elapsed = finished.duration_since(started);
        self.stats.observe("fetch_ms", elapsed.as_secs_f64() * 1000.0);
        metrics::FETCH_LATENCY_SECONDS.observe(elapsed.as_secs_f64());

        match fetched {
            Ok(payload) => {
                self.stats.incr("ok");
                let (host, port) = self.driver.endpoint();
                let record = RawRecord {
                    id: self.ids.next_id(),
                    driver: self.driver.driver().to_string(),
                    url: self.driver.signature(),
                    host,
                    port,
                    parsers: self.schedule.parsers.clone(),
                    filters: self.schedule.filters.clone(),
                    storages: self.schedule.storages.clone(),
                    started,
                    finished,
                    wall_started,
                    wall_finished: SystemTime::now(),
                    payload,
                };
                // The only inbox a task may suspend on when full is the
                // coordinator→storage one; a backed-up coordinator costs
                // this record, never the schedule.
                match self.raw_tx.try_send(record) {
                    Ok(()) => {}
                    Err(TrySendError::Full(record)) => {
                        self.stats.incr("dropped");
                        metrics::RECORDS_DROPPED_TOTAL
                            .with_label_values(&["coordinator_full"])
                            .inc();
                        let e = GatherError::QueueFull("coordinator".into());
                        warn!(
                            "Source '{}' dropped record {} ({}): {}",
                            self.name,
                            record.id,
                            e.kind().as_str(),
                            e
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Source '{}': coordinator gone, record dropped.", self.name);
                    }
                }
                true
            }
            Err(GatherError::ShuttingDown) => false,
            Err(e) => {
                self.stats.incr("err");
                metrics::FETCH_ERRORS_TOTAL
                    .with_label_values(&[self.driver.driver()])
                    .inc();
                warn!(
                    "Source '{}' fetch failed ({}): {}",
                    self.name,
                    e.kind().as_str(),
                    e
                );
                failures.push_back(Instant::now());
                true
            }
        }
    }

    fn roll_jitter(&self) -> Duration {
        if self.schedule.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max = self.schedule.jitter.as_secs_f64();
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..max))
    }

    /// The optional pause policy; disabled (always continue) by default.
    fn should_pause(&self, failures: &mut VecDeque<Instant>) -> bool {
        if self.schedule.max_failures == 0 {
            return false;
        }
        if let Some(horizon) = Instant::now().checked_sub(self.schedule.failure_window) {
            while failures.front().is_some_and(|t| *t < horizon) {
                failures.pop_front();
            }
        }
        failures.len() > self.schedule.max_failures as usize
    }
}
