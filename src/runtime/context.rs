// src/runtime/context.rs

use crate::core::pipeline::Coordinator;
use crate::core::resolver::{Resolver, ResolverHandle};
use crate::core::source::SourceRunner;
use crate::core::stats::StatsRegistry;
use crate::core::storage::StorageTask;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the daemon's main loop.
pub struct RuntimeContext {
    pub stats: Arc<StatsRegistry>,
    pub resolver_handle: ResolverHandle,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    /// The self-telemetry listener, already bound so privileges can drop.
    /// The spawner moves it into the server task.
    pub listener: Option<TcpListener>,
    /// Tasks not yet spawned; the spawner consumes these.
    pub resolver: Option<Resolver>,
    pub coordinator: Option<Coordinator>,
    pub sources: Vec<SourceRunner>,
    pub storage_tasks: Vec<StorageTask>,
}
