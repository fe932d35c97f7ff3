// src/config.rs

//! Manages daemon configuration: the top-level `key = value` file, discovery
//! of `*.d/*.conf` driver fragments, and the typed accessors drivers use to
//! consume their parameters. Unknown keys are rejected, not ignored.

use crate::core::errors::GatherError;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use wildmatch::WildMatch;

/// Parses one `key = value` file into an ordered map. Lines are trimmed,
/// `#` starts a comment, surrounding single or double quotes on values are
/// stripped. Later duplicates overwrite earlier ones.
pub fn parse_kv(text: &str) -> Result<IndexMap<String, String>, GatherError> {
    let mut map = IndexMap::new();
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(GatherError::Config(format!(
                "line {}: expected 'key = value', got '{}'",
                lineno + 1,
                line
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(GatherError::Config(format!("line {}: empty key", lineno + 1)));
        }
        map.insert(key.to_string(), strip_quotes(value.trim()).to_string());
    }
    Ok(map)
}

fn strip_quotes(s: &str) -> &str {
    let b = s.as_bytes();
    if b.len() >= 2 && ((b[0] == b'"' && b[b.len() - 1] == b'"') || (b[0] == b'\'' && b[b.len() - 1] == b'\'')) {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// One `*.conf` fragment: a driver instantiation. The instance name is the
/// file stem; the `driver` key names the driver; everything else is driver
/// parameters, consumed through the `take_*` accessors so leftovers can be
/// rejected by [`Fragment::finish`].
#[derive(Debug, Clone)]
pub struct Fragment {
    pub name: String,
    pub driver: String,
    params: IndexMap<String, String>,
    taken: HashSet<String>,
}

impl Fragment {
    /// Loads and parses a fragment file.
    pub fn load(path: &Path) -> Result<Self, GatherError> {
        let text = fs::read_to_string(path)
            .map_err(|e| GatherError::Config(format!("failed to read '{}': {e}", path.display())))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| GatherError::Config(format!("bad fragment name '{}'", path.display())))?
            .to_string();
        Self::from_text(&name, &text)
            .map_err(|e| GatherError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_text(name: &str, text: &str) -> Result<Self, GatherError> {
        let mut params = parse_kv(text)?;
        let driver = params
            .shift_remove("driver")
            .ok_or_else(|| GatherError::Config("missing 'driver' key".into()))?;
        Ok(Self {
            name: name.to_string(),
            driver,
            params,
            taken: HashSet::new(),
        })
    }

    /// The raw value for `key`, marking it consumed.
    pub fn take_str(&mut self, key: &str) -> Option<String> {
        self.taken.insert(key.to_string());
        self.params.get(key).cloned()
    }

    /// Like [`Self::take_str`] with a default.
    pub fn take_str_or(&mut self, key: &str, default: &str) -> String {
        self.take_str(key).unwrap_or_else(|| default.to_string())
    }

    /// A parsed value for `key`, marking it consumed.
    pub fn take_parsed<T: FromStr>(&mut self, key: &str) -> Result<Option<T>, GatherError> {
        match self.take_str(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                GatherError::Config(format!("invalid value '{raw}' for key '{key}'"))
            }),
        }
    }

    pub fn take_parsed_or<T: FromStr>(&mut self, key: &str, default: T) -> Result<T, GatherError> {
        Ok(self.take_parsed(key)?.unwrap_or(default))
    }

    /// A boolean for `key`: yes/no, true/false, 1/0.
    pub fn take_bool_or(&mut self, key: &str, default: bool) -> Result<bool, GatherError> {
        match self.take_str(key) {
            None => Ok(default),
            Some(raw) => match raw.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(GatherError::Config(format!(
                    "invalid boolean '{other}' for key '{key}'"
                ))),
            },
        }
    }

    /// A comma-separated list for `key`; empty when absent.
    pub fn take_list(&mut self, key: &str) -> Vec<String> {
        self.take_str(key)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fails when the fragment carries keys no accessor consumed.
    pub fn finish(&self) -> Result<(), GatherError> {
        for key in self.params.keys() {
            if !self.taken.contains(key) {
                return Err(GatherError::UnknownConfigKey(format!(
                    "{} ({})",
                    key, self.name
                )));
            }
        }
        Ok(())
    }
}

/// The scheduling and binding parameters every source fragment carries,
/// independent of its driver.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Seconds between fetches; may be fractional.
    pub interval: Duration,
    /// Deadline for one fetch.
    pub timeout: Duration,
    /// Random extra delay, re-rolled each cycle, spread over [0, jitter].
    pub jitter: Duration,
    pub parsers: Vec<String>,
    pub filters: Vec<String>,
    pub storages: Vec<String>,
    /// Optional pause policy: more than `max_failures` errors within
    /// `failure_window` suspends the source for one window. Zero disables.
    pub max_failures: u32,
    pub failure_window: Duration,
}

impl ScheduleConfig {
    /// Consumes the schedule keys out of a source fragment.
    pub fn from_fragment(frag: &mut Fragment) -> Result<Self, GatherError> {
        let interval = frag.take_parsed_or::<f64>("interval", 60.0)?;
        let timeout = frag.take_parsed_or::<f64>("timeout", 10.0)?;
        let jitter = frag.take_parsed_or::<f64>("jitter", 0.0)?;
        if interval <= 0.0 {
            return Err(GatherError::Config(format!(
                "source '{}': interval must be positive",
                frag.name
            )));
        }
        if timeout <= 0.0 {
            return Err(GatherError::Config(format!(
                "source '{}': timeout must be positive",
                frag.name
            )));
        }
        let parsers = frag.take_list("parsers");
        if parsers.is_empty() {
            return Err(GatherError::Config(format!(
                "source '{}': at least one parser must be bound",
                frag.name
            )));
        }
        Ok(Self {
            interval: Duration::from_secs_f64(interval),
            timeout: Duration::from_secs_f64(timeout),
            jitter: Duration::from_secs_f64(jitter),
            parsers,
            filters: frag.take_list("filters"),
            storages: frag.take_list("storage"),
            max_failures: frag.take_parsed_or("max_failures", 0u32)?,
            failure_window: Duration::from_secs_f64(
                frag.take_parsed_or::<f64>("failure_window", 300.0)?,
            ),
        })
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_http_addr() -> String {
    "*".to_string()
}
fn default_dns_cache_ttl() -> u64 {
    3600
}

/// The resolved top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the self-telemetry surface; `*` means all.
    pub http_addr: String,
    /// Listen port; `None` falls back to the program default.
    pub http_port: Option<u16>,
    pub log_level: String,
    /// When set, logs go to this file and USR1 reopens it.
    pub log_file: Option<String>,
    pub dns_cache_ttl: u64,
    pub prefer_ipv6: bool,
    /// Fragment globs, relative to the config file's directory.
    pub parsers: Vec<String>,
    pub filters: Vec<String>,
    pub storage: Vec<String>,
    pub source_groups: Vec<String>,
    /// The directory fragment globs resolve against.
    pub base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            http_port: None,
            log_level: default_log_level(),
            log_file: None,
            dns_cache_ttl: default_dns_cache_ttl(),
            prefer_ipv6: false,
            parsers: vec!["parser.d/*.conf".to_string()],
            filters: vec!["filter.d/*.conf".to_string()],
            storage: vec!["storage.d/*.conf".to_string()],
            source_groups: vec!["source.d/*.conf".to_string()],
            base_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Creates a new `Config` by reading and parsing a key=value file.
    pub fn from_file(path: &str) -> Result<Self, GatherError> {
        let text = fs::read_to_string(path)
            .map_err(|e| GatherError::Config(format!("failed to read config '{path}': {e}")))?;
        let mut kv = parse_kv(&text)?;
        let base_dir = Path::new(path)
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut config = Config {
            base_dir,
            ..Config::default()
        };
        if let Some(v) = kv.shift_remove("http_addr") {
            config.http_addr = v;
        }
        if let Some(v) = kv.shift_remove("http_port") {
            config.http_port = Some(v.parse().map_err(|_| {
                GatherError::Config(format!("invalid http_port '{v}'"))
            })?);
        }
        if let Some(v) = kv.shift_remove("log_level") {
            config.log_level = v;
        }
        if let Some(v) = kv.shift_remove("log_file") {
            config.log_file = Some(v);
        }
        if let Some(v) = kv.shift_remove("dns_cache_ttl") {
            config.dns_cache_ttl = v.parse().map_err(|_| {
                GatherError::Config(format!("invalid dns_cache_ttl '{v}'"))
            })?;
        }
        if let Some(v) = kv.shift_remove("prefer_ipv6") {
            config.prefer_ipv6 = matches!(v.as_str(), "1" | "true" | "yes" | "on");
        }
        for (key, field) in [
            ("parsers", &mut config.parsers),
            ("filters", &mut config.filters),
            ("storage", &mut config.storage),
            ("source_groups", &mut config.source_groups),
        ] {
            if let Some(v) = kv.shift_remove(key) {
                *field = v
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
        if let Some(unknown) = kv.keys().next() {
            return Err(GatherError::UnknownConfigKey(unknown.clone()));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration for logical consistency.
    fn validate(&self) -> Result<(), GatherError> {
        if self.http_addr.trim().is_empty() {
            return Err(GatherError::Config("http_addr cannot be empty".into()));
        }
        if self.http_port == Some(0) {
            return Err(GatherError::Config("http_port cannot be 0".into()));
        }
        if self.dns_cache_ttl == 0 {
            return Err(GatherError::Config("dns_cache_ttl cannot be 0".into()));
        }
        Ok(())
    }

    /// The bind address the telemetry listener uses; `*` maps to all
    /// interfaces.
    pub fn bind_addr(&self) -> &str {
        if self.http_addr == "*" {
            "0.0.0.0"
        } else {
            &self.http_addr
        }
    }
}

/// Everything configuration describes: the top file plus all discovered
/// driver fragments, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub parsers: Vec<Fragment>,
    pub filters: Vec<Fragment>,
    pub storages: Vec<Fragment>,
    pub sources: Vec<Fragment>,
}

/// Expands the config's fragment globs and loads every matching fragment.
pub fn load_fragments(config: &Config) -> Result<LoadedConfig, GatherError> {
    let mut loaded = LoadedConfig::default();
    for (patterns, bucket) in [
        (&config.parsers, &mut loaded.parsers),
        (&config.filters, &mut loaded.filters),
        (&config.storage, &mut loaded.storages),
        (&config.source_groups, &mut loaded.sources),
    ] {
        for pattern in patterns {
            for path in expand_glob(&config.base_dir, pattern)? {
                debug!("Loading fragment {}", path.display());
                bucket.push(Fragment::load(&path)?);
            }
        }
    }
    info!(
        "Loaded {} parser, {} filter, {} storage and {} source fragments.",
        loaded.parsers.len(),
        loaded.filters.len(),
        loaded.storages.len(),
        loaded.sources.len()
    );
    Ok(loaded)
}

/// Expands one glob (or plain filename) relative to `base`. Only the file
/// component may carry wildcards; matches come back sorted for a stable
/// load order.
fn expand_glob(base: &Path, pattern: &str) -> Result<Vec<PathBuf>, GatherError> {
    let full = base.join(pattern);
    let file_pat = full
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| GatherError::Config(format!("bad fragment pattern '{pattern}'")))?
        .to_string();

    if !file_pat.contains('*') && !file_pat.contains('?') {
        if full.is_file() {
            return Ok(vec![full]);
        }
        return Err(GatherError::Config(format!(
            "fragment '{}' does not exist",
            full.display()
        )));
    }

    let dir = full.parent().unwrap_or(base);
    if !dir.is_dir() {
        // A missing fragment directory is an empty set, not an error; a
        // skeleton config may not use every driver class.
        return Ok(Vec::new());
    }
    let matcher = WildMatch::new(&file_pat);
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| GatherError::Config(format!("failed to list '{}': {e}", dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .is_some_and(|name| matcher.matches(name))
        })
        .collect();
    matches.sort();
    Ok(matches)
}
