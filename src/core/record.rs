// src/core/record.rs

//! Defines the sample envelopes that flow through the pipeline: one
//! [`RawRecord`] per completed fetch, and the [`ParsedRecord`]s derived
//! from it.

use crate::core::errors::GatherError;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Identifies a record; unique within the process lifetime.
pub type RecordId = u64;

/// The parsed content of a record: an ordered map from metric key to value.
/// Every value must be a finite float; parsers reject NaN/Inf.
pub type Content = IndexMap<String, f64>;

/// Hands out process-lifetime-unique record ids.
#[derive(Debug, Default)]
pub struct RecordIdGen(AtomicU64);

impl RecordIdGen {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next_id(&self) -> RecordId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// One completed fetch. Created by the source on fetch completion, handed to
/// the coordinator, consumed by the parser stage, then discarded.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Unique within the process lifetime.
    pub id: RecordId,
    /// The source-driver tag, e.g. "http" or "exec".
    pub driver: String,
    /// The logical fetch URL (or command signature for subprocess drivers).
    pub url: String,
    /// The resolved host.
    pub host: String,
    /// The resolved port; 0 for drivers without one.
    pub port: u16,
    /// Parser names to apply, in order. First success wins.
    pub parsers: Vec<String>,
    /// Filter names to apply, in order.
    pub filters: Vec<String>,
    /// Storage names to receive the final record.
    pub storages: Vec<String>,
    /// Monotonic fetch start/end, sub-millisecond resolution.
    pub started: Instant,
    pub finished: Instant,
    /// Wall-clock counterparts, for wire timestamps and file names.
    pub wall_started: SystemTime,
    pub wall_finished: SystemTime,
    /// The raw payload; never empty.
    pub payload: Bytes,
}

impl RawRecord {
    /// Checks the envelope invariants a record must satisfy before it may
    /// leave its source.
    pub fn validate(&self) -> Result<(), GatherError> {
        if self.id == 0 {
            return Err(GatherError::Internal("record id not set".into()));
        }
        if self.driver.is_empty() {
            return Err(GatherError::Internal("record driver not set".into()));
        }
        if self.url.is_empty() {
            return Err(GatherError::Internal("record url not set".into()));
        }
        if self.parsers.is_empty() {
            return Err(GatherError::Internal(format!(
                "record {} has no parsers bound",
                self.id
            )));
        }
        if self.payload.is_empty() {
            return Err(GatherError::Parse("empty payload".into()));
        }
        if self.finished < self.started {
            return Err(GatherError::Internal(format!(
                "record {} finished before it started",
                self.id
            )));
        }
        Ok(())
    }

    /// How long the fetch took.
    pub fn fetch_duration(&self) -> Duration {
        self.finished.duration_since(self.started)
    }
}

/// A parsed sample: metadata cloned from its originating [`RawRecord`] plus
/// the typed content map. Independent of its predecessor; filtering produces
/// a new record and the prior one survives unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub id: RecordId,
    pub driver: String,
    pub url: String,
    /// The host samples are attributed to. A filter may override this.
    pub host: String,
    pub port: u16,
    /// The storages this record is routed to. A filter may override this.
    pub storages: Vec<String>,
    /// Wall-clock fetch start, microseconds since the epoch.
    pub start_micros: u64,
    /// Wall-clock fetch completion, seconds since the epoch. Used as the
    /// sample timestamp on the wire.
    pub finished_unix: u64,
    pub content: Content,
}

impl ParsedRecord {
    /// Builds a parsed record from a raw one and the content a parser
    /// produced for it.
    pub fn from_raw(raw: &RawRecord, content: Content) -> Self {
        Self {
            id: raw.id,
            driver: raw.driver.clone(),
            url: raw.url.clone(),
            host: raw.host.clone(),
            port: raw.port,
            storages: raw.storages.clone(),
            start_micros: unix_micros(raw.wall_started),
            finished_unix: unix_micros(raw.wall_finished) / 1_000_000,
            content,
        }
    }
}

fn unix_micros(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// The flat, deterministic on-disk form of a [`ParsedRecord`]; what the file
/// sink writes and what a reader gets back, byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct StoredSample {
    pub id: RecordId,
    pub driver: String,
    pub url: String,
    pub host: String,
    pub port: u16,
    pub start_micros: u64,
    pub finished_unix: u64,
    /// Content pairs in their original order.
    pub content: Vec<(String, f64)>,
}

impl From<&ParsedRecord> for StoredSample {
    fn from(rec: &ParsedRecord) -> Self {
        Self {
            id: rec.id,
            driver: rec.driver.clone(),
            url: rec.url.clone(),
            host: rec.host.clone(),
            port: rec.port,
            start_micros: rec.start_micros,
            finished_unix: rec.finished_unix,
            content: rec.content.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}

impl StoredSample {
    /// Encodes with the standard bincode configuration. Round-trips exactly.
    pub fn encode(&self) -> Result<Vec<u8>, GatherError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| GatherError::Storage(format!("encode failed: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, GatherError> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(v, _)| v)
            .map_err(|e| GatherError::Storage(format!("decode failed: {e}")))
    }
}
