// src/runtime/spawner.rs

//! Spawns all of the daemon's long-running tasks.

use super::context::RuntimeContext;
use super::telemetry;
use anyhow::anyhow;
use tracing::info;

/// Spawns the resolver service, every storage sink, the pipeline
/// coordinator, every source runner and the telemetry server into the
/// context's JoinSet. Each task gets its own shutdown subscription.
pub fn spawn_all(ctx: &mut RuntimeContext) -> Result<(), anyhow::Error> {
    let shutdown_tx = ctx.shutdown_tx.clone();

    // --- Resolver service ---
    let resolver = ctx
        .resolver
        .take()
        .ok_or_else(|| anyhow!("resolver already spawned"))?;
    let shutdown_rx_resolver = shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        resolver.run(shutdown_rx_resolver).await;
        Ok(())
    });

    // --- Storage sinks ---
    for task in ctx.storage_tasks.drain(..) {
        let shutdown_rx_storage = shutdown_tx.subscribe();
        info!("Starting storage sink '{}'.", task.name());
        ctx.background_tasks.spawn(async move {
            task.run(shutdown_rx_storage).await;
            Ok(())
        });
    }

    // --- Pipeline coordinator ---
    let coordinator = ctx
        .coordinator
        .take()
        .ok_or_else(|| anyhow!("coordinator already spawned"))?;
    let shutdown_rx_coord = shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        coordinator.run(shutdown_rx_coord).await;
        Ok(())
    });

    // --- Source runners ---
    for source in ctx.sources.drain(..) {
        let shutdown_rx_source = shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            source.run(shutdown_rx_source).await;
            Ok(())
        });
    }

    // --- Telemetry server ---
    let listener = ctx
        .listener
        .take()
        .ok_or_else(|| anyhow!("telemetry listener already spawned"))?;
    let stats = ctx.stats.clone();
    let shutdown_rx_telemetry = shutdown_tx.subscribe();
    ctx.background_tasks.spawn(async move {
        telemetry::run_telemetry_server(listener, stats, shutdown_rx_telemetry).await
    });

    Ok(())
}
