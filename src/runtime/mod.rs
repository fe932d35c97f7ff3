// src/runtime/mod.rs

//! Daemon startup orchestration: initialization, task spawning, the signal
//! loop and graceful shutdown.

mod context;
mod spawner;
pub mod telemetry;

pub use context::RuntimeContext;

use crate::config::{Config, LoadedConfig};
use crate::core::filter::FilterRegistry;
use crate::core::parser::ParserRegistry;
use crate::core::pipeline::{
    Coordinator, RAW_CHANNEL_CAPACITY, RESULT_CHANNEL_CAPACITY,
};
use crate::core::record::RecordIdGen;
use crate::core::resolver::Resolver;
use crate::core::source::{SourceRunner, build_source};
use crate::core::stats::StatsRegistry;
use crate::core::storage::StorageRegistry;
use crate::daemon::{self, ReopenableLog};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long shutdown waits for every task to finish before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Everything a binary hands the runtime.
pub struct RunOptions {
    pub config: Config,
    pub fragments: LoadedConfig,
    pub listen_addr: String,
    pub listen_port: u16,
    /// Privileges to drop to after the listener is bound.
    pub user: Option<String>,
    pub group: Option<String>,
    /// The log destination USR1 reopens, when logging to a file.
    pub log: Option<ReopenableLog>,
}

/// The main runtime entry, orchestrating all setup phases.
pub async fn run(opts: RunOptions) -> Result<()> {
    let mut ctx = setup(&opts).await?;

    // Privileges drop only after the socket is bound.
    if opts.user.is_some() || opts.group.is_some() {
        daemon::drop_privileges(opts.user.as_deref(), opts.group.as_deref())?;
    }

    spawner::spawn_all(&mut ctx)?;
    main_loop(ctx, opts.log).await;
    Ok(())
}

/// Initializes all components before starting the main loop.
async fn setup(opts: &RunOptions) -> Result<RuntimeContext> {
    let (shutdown_tx, _) = broadcast::channel(1);
    let stats = Arc::new(StatsRegistry::new());

    let (resolver, resolver_handle) = Resolver::new(
        Duration::from_secs(opts.config.dns_cache_ttl),
        opts.config.prefer_ipv6,
    );

    let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
    let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

    let mut fragments = opts.fragments.clone();
    let parsers = Arc::new(ParserRegistry::build(&mut fragments.parsers, &stats)?);
    let filters = Arc::new(FilterRegistry::build(&mut fragments.filters, &stats)?);
    let (storages, storage_tasks) = StorageRegistry::build(
        &mut fragments.storages,
        &resolver_handle,
        &results_tx,
        &stats,
    )?;
    let storages = Arc::new(storages);

    let ids = Arc::new(RecordIdGen::new());
    let mut sources = Vec::new();
    for frag in fragments.sources.iter_mut() {
        let name = frag.name.clone();
        let (schedule, driver) = build_source(frag)?;
        // Bindings must resolve at startup, never at runtime.
        for parser in &schedule.parsers {
            if !parsers.contains(parser) {
                return Err(anyhow!("source '{name}' binds unknown parser '{parser}'"));
            }
        }
        for filter in &schedule.filters {
            if !filters.contains(filter) {
                return Err(anyhow!("source '{name}' binds unknown filter '{filter}'"));
            }
        }
        for storage in &schedule.storages {
            if !storages.contains(storage) {
                return Err(anyhow!("source '{name}' binds unknown storage '{storage}'"));
            }
        }
        let session = stats.register(&format!("source.{name}"));
        sources.push(SourceRunner::new(
            name,
            schedule,
            driver,
            resolver_handle.clone(),
            raw_tx.clone(),
            ids.clone(),
            session,
        ));
    }

    let coordinator = Coordinator::new(
        raw_rx,
        results_rx,
        parsers,
        filters,
        storages,
        stats.register("pipeline"),
        shutdown_tx.clone(),
    );

    let listener = TcpListener::bind((opts.listen_addr.as_str(), opts.listen_port))
        .await
        .map_err(|e| {
            anyhow!(
                "failed to bind telemetry listener on {}:{}: {e}",
                opts.listen_addr,
                opts.listen_port
            )
        })?;
    info!(
        "Telemetry surface bound on {}:{}; {} sources configured.",
        opts.listen_addr,
        opts.listen_port,
        sources.len()
    );

    Ok(RuntimeContext {
        stats,
        resolver_handle,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        listener: Some(listener),
        resolver: Some(resolver),
        coordinator: Some(coordinator),
        sources,
        storage_tasks,
    })
}

/// Waits for a shutdown signal: SIGINT or SIGTERM on Unix, Ctrl+C
/// elsewhere. SIGUSR1 reopens the log file and keeps waiting.
async fn await_shutdown_signal(log: &Option<ReopenableLog>) {
    #[cfg(unix)]
    {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");
        let mut sigusr1 =
            signal(SignalKind::user_defined1()).expect("Failed to create SIGUSR1 stream");
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("SIGINT received, initiating graceful shutdown.");
                    return;
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received, initiating graceful shutdown.");
                    return;
                }
                _ = sigusr1.recv() => {
                    match log {
                        Some(log) => match log.reopen() {
                            Ok(()) => info!("SIGUSR1 received, log file reopened."),
                            Err(e) => warn!("SIGUSR1: failed to reopen log file: {}", e),
                        },
                        None => info!("SIGUSR1 received, but no log file is configured."),
                    }
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = log;
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to create Ctrl+C stream");
        info!("Ctrl-C received, initiating graceful shutdown.");
    }
}

/// The main loop: waits for signals and watches the background tasks for
/// unexpected termination, then runs the graceful shutdown sequence.
async fn main_loop(mut ctx: RuntimeContext, log: Option<ReopenableLog>) {
    loop {
        tokio::select! {
            biased; // Prioritize shutdown signals over other events.

            _ = await_shutdown_signal(&log) => {
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => info!("A background task completed."),
                    Ok(Err(e)) => {
                        error!("CRITICAL: Background task failed: {}. Shutting down.", e);
                        break;
                    }
                    Err(e) => {
                        error!("CRITICAL: Background task panicked: {e:?}. Shutting down.");
                        break;
                    }
                }
            }
        }
    }

    // --- Graceful Shutdown Sequence ---
    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
    }

    let drain = async {
        while let Some(res) = ctx.background_tasks.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    error!("A task panicked during shutdown: {e:?}");
                }
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            "Shutdown grace of {:?} expired; {} tasks abandoned.",
            SHUTDOWN_GRACE,
            ctx.background_tasks.len()
        );
        ctx.background_tasks.abort_all();
    }
    info!("Shutdown complete.");
}
