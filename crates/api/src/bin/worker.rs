//! Standalone worker process for the persistent (Redis) backend.

use std::sync::{Arc, PoisonError};

use anyhow::{bail, Context};
use tracing::info;

use jobrelay_api::app::services::connect_backend;
use jobrelay_api::config::WorkerConfig;
use jobrelay_classify::ProductCategorizer;
use jobrelay_infra::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    jobrelay_observability::init();

    let config = WorkerConfig::from_env()?;
    if !config.backend.persistent {
        bail!("jobrelay-worker needs a shared backend; set USE_PERSISTENT_STORES=true");
    }

    let backend =
        connect_backend(&config.backend, config.pool.visibility_timeout()).context("failed to connect backend")?;
    let compute = Arc::new(ProductCategorizer::new());

    let handle = WorkerPool::new(backend.store, backend.channel, compute)
        .spawn(config.pool.clone())
        .context("failed to start workers")?;

    info!(
        name = %config.pool.name,
        workers = handle.worker_count(),
        stream = %config.backend.stream_key,
        "worker pool running"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("stopping workers");

    let stats = tokio::task::spawn_blocking(move || {
        let stats = handle.stats_source();
        handle.shutdown();
        stats
    })
    .await?;

    let stats = stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
    info!(?stats, "worker pool stopped");

    Ok(())
}
