// src/core/stats.rs

//! Per-component counter sessions and the registry the self-telemetry
//! surface reads from.
//!
//! Every subsystem (each source, parser, filter and storage sink) owns one
//! named [`StatsSession`]. Owners update it; everyone else only ever sees
//! point-in-time snapshot copies. Snapshot and reset never touch I/O, so the
//! telemetry handlers can call them synchronously.

use dashmap::DashMap;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// How many observations a sample window retains for the rolling aggregates.
const SAMPLE_WINDOW: usize = 100;

/// Which aggregate of a sample window a snapshot reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggMode {
    #[default]
    Avg,
    Max,
    Min,
    Med,
}

impl AggMode {
    /// Parses the `mode` query parameter; unknown values fall back to `avg`.
    pub fn from_query(s: &str) -> Self {
        match s {
            "max" => AggMode::Max,
            "min" => AggMode::Min,
            "med" => AggMode::Med,
            _ => AggMode::Avg,
        }
    }
}

#[derive(Debug, Default)]
struct SessionInner {
    /// Monotonic counters and gauges; reported verbatim.
    counters: IndexMap<String, f64>,
    /// Rolling observation windows; reported via the requested aggregate.
    samples: IndexMap<String, VecDeque<f64>>,
}

/// One component's counters. Updated only by the owning task.
#[derive(Debug, Default)]
pub struct StatsSession {
    inner: Mutex<SessionInner>,
}

impl StatsSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the named counter, creating it at zero first.
    pub fn add(&self, key: &str, delta: f64) {
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        *inner.counters.entry(key.to_string()).or_insert(0.0) += delta;
    }

    /// Increments the named counter by one.
    pub fn incr(&self, key: &str) {
        self.add(key, 1.0);
    }

    /// Sets the named gauge to an absolute value.
    pub fn set(&self, key: &str, value: f64) {
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        inner.counters.insert(key.to_string(), value);
    }

    /// Records one observation into the named rolling window.
    pub fn observe(&self, key: &str, value: f64) {
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        let window = inner.samples.entry(key.to_string()).or_default();
        if window.len() == SAMPLE_WINDOW {
            window.pop_front();
        }
        window.push_back(value);
    }

    /// Returns a point-in-time copy of all keys: counters verbatim, sample
    /// windows collapsed through `mode`.
    pub fn snapshot(&self, mode: AggMode) -> IndexMap<String, f64> {
        let inner = self.inner.lock().expect("stats mutex poisoned");
        let mut out = inner.counters.clone();
        for (key, window) in &inner.samples {
            if let Some(v) = aggregate(window, mode) {
                out.insert(key.clone(), v);
            }
        }
        out
    }

    /// Zeroes every counter and clears every sample window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        for v in inner.counters.values_mut() {
            *v = 0.0;
        }
        for w in inner.samples.values_mut() {
            w.clear();
        }
    }
}

fn aggregate(window: &VecDeque<f64>, mode: AggMode) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    let v = match mode {
        AggMode::Avg => window.iter().sum::<f64>() / window.len() as f64,
        AggMode::Max => window.iter().copied().fold(f64::MIN, f64::max),
        AggMode::Min => window.iter().copied().fold(f64::MAX, f64::min),
        AggMode::Med => {
            let mut sorted: Vec<f64> = window.iter().copied().collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            sorted[sorted.len() / 2]
        }
    };
    Some(v)
}

/// The process-wide registry of named sessions. Registration happens at
/// configuration load; lookups afterwards are read-mostly.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    sessions: DashMap<String, Arc<StatsSession>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or returns the existing) session under `name`.
    pub fn register(&self, name: &str) -> Arc<StatsSession> {
        self.sessions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(StatsSession::new()))
            .clone()
    }

    /// A point-in-time copy of the named session, or `None` when no such
    /// component exists.
    pub fn session_snapshot(&self, name: &str, mode: AggMode) -> Option<IndexMap<String, f64>> {
        self.sessions.get(name).map(|s| s.snapshot(mode))
    }

    /// Zeroes the named session. Returns whether it existed.
    pub fn session_reset(&self, name: &str) -> bool {
        match self.sessions.get(name) {
            Some(s) => {
                s.reset();
                true
            }
            None => false,
        }
    }

    /// All registered session names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
