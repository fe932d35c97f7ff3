// src/core/resolver.rs

//! The process-wide DNS service and its TTL'd host cache.
//!
//! All lookups funnel through a single request queue owned by the
//! [`Resolver`] task; callers hold a cheap [`ResolverHandle`]. Results,
//! including failures ("negative cache" entries), land in the shared
//! [`HostCache`], which is read-mostly and keyed by hostname.

use crate::core::errors::GatherError;
use crate::core::metrics;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default TTL for cache entries, positive and negative alike.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Capacity of the resolver's request queue.
const RESOLVER_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct CacheEntry {
    /// Empty means the name failed to resolve and the failure is cached.
    addrs: Vec<IpAddr>,
    inserted: Instant,
}

/// In-process resolver cache keyed by hostname.
#[derive(Debug)]
pub struct HostCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl HostCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// A live entry for `host`, or `None` when absent or expired.
    /// `Some(vec![])` is a cached negative result and still consumes TTL.
    pub fn get(&self, host: &str) -> Option<Vec<IpAddr>> {
        let entry = self.entries.get(host)?;
        if entry.inserted.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(host);
            metrics::HOST_CACHE_ENTRIES.set(self.entries.len() as f64);
            return None;
        }
        Some(entry.addrs.clone())
    }

    pub fn insert(&self, host: &str, addrs: Vec<IpAddr>) {
        self.entries.insert(
            host.to_string(),
            CacheEntry {
                addrs,
                inserted: Instant::now(),
            },
        );
        metrics::HOST_CACHE_ENTRIES.set(self.entries.len() as f64);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct ResolveRequest {
    host: String,
    timeout: Duration,
    reply: oneshot::Sender<Result<Vec<IpAddr>, GatherError>>,
}

/// A cheap, cloneable handle to the resolver service.
#[derive(Clone)]
pub struct ResolverHandle {
    tx: mpsc::Sender<ResolveRequest>,
    cache: Arc<HostCache>,
}

impl ResolverHandle {
    /// Resolves `host`, consulting the cache first. A cached negative entry
    /// fails immediately without hitting the queue.
    pub async fn resolve(&self, host: &str, timeout: Duration) -> Result<Vec<IpAddr>, GatherError> {
        if let Some(addrs) = self.cache.get(host) {
            if addrs.is_empty() {
                return Err(GatherError::DnsFailed(host.to_string()));
            }
            return Ok(addrs);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let req = ResolveRequest {
            host: host.to_string(),
            timeout,
            reply: reply_tx,
        };
        self.tx
            .send(req)
            .await
            .map_err(|_| GatherError::ShuttingDown)?;
        reply_rx.await.map_err(|_| GatherError::ShuttingDown)?
    }

    pub fn cache(&self) -> &HostCache {
        &self.cache
    }
}

/// The resolver service task. One per process.
pub struct Resolver {
    rx: mpsc::Receiver<ResolveRequest>,
    cache: Arc<HostCache>,
    prefer_ipv6: bool,
}

impl Resolver {
    /// Creates the service and its handle.
    pub fn new(cache_ttl: Duration, prefer_ipv6: bool) -> (Self, ResolverHandle) {
        let (tx, rx) = mpsc::channel(RESOLVER_QUEUE_CAPACITY);
        let cache = Arc::new(HostCache::new(cache_ttl));
        let resolver = Self {
            rx,
            cache: cache.clone(),
            prefer_ipv6,
        };
        (resolver, ResolverHandle { tx, cache })
    }

    /// Runs the request loop until shutdown.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Resolver service started.");
        loop {
            tokio::select! {
                Some(req) = self.rx.recv() => {
                    self.handle_request(req).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Resolver service shutting down.");
                    return;
                }
            }
        }
    }

    async fn handle_request(&self, req: ResolveRequest) {
        // Another request for the same host may have populated the cache
        // while this one sat in the queue.
        if let Some(addrs) = self.cache.get(&req.host) {
            let result = if addrs.is_empty() {
                Err(GatherError::DnsFailed(req.host.clone()))
            } else {
                Ok(addrs)
            };
            let _ = req.reply.send(result);
            return;
        }

        let result = self.lookup(&req.host, req.timeout).await;
        match &result {
            Ok(addrs) => self.cache.insert(&req.host, addrs.clone()),
            Err(GatherError::DnsFailed(_)) => {
                // Negative-cache the failure so a flapping name does not
                // hammer the upstream resolver every cycle.
                self.cache.insert(&req.host, Vec::new());
            }
            Err(_) => {}
        }
        let _ = req.reply.send(result);
    }

    /// One lookup, bounded by the request's timeout. `tokio::net::lookup_host`
    /// performs the blocking system lookup on a worker thread.
    async fn lookup(&self, host: &str, timeout: Duration) -> Result<Vec<IpAddr>, GatherError> {
        let lookup = tokio::net::lookup_host((host, 0u16));
        let addrs = match tokio::time::timeout(timeout, lookup).await {
            Err(_) => return Err(GatherError::DnsTimeout(host.to_string())),
            Ok(Err(e)) => {
                warn!("DNS lookup for '{}' failed: {}", host, e);
                return Err(GatherError::DnsFailed(host.to_string()));
            }
            Ok(Ok(iter)) => iter.map(|sa| sa.ip()).collect::<Vec<_>>(),
        };
        if addrs.is_empty() {
            return Err(GatherError::DnsFailed(host.to_string()));
        }
        Ok(order_addrs(addrs, self.prefer_ipv6))
    }
}

/// Applies the ordering policy: IPv6 first when the stack has any v6 address
/// and the preference is set, else resolver-natural order. Per-source
/// shuffling, when requested, happens at the caller.
fn order_addrs(addrs: Vec<IpAddr>, prefer_ipv6: bool) -> Vec<IpAddr> {
    if !prefer_ipv6 || !addrs.iter().any(|a| a.is_ipv6()) {
        return addrs;
    }
    let (v6, v4): (Vec<IpAddr>, Vec<IpAddr>) = addrs.into_iter().partition(|a| a.is_ipv6());
    v6.into_iter().chain(v4).collect()
}
