//! fnsched scheduler
//!
//! Reads schedule requests as JSON lines on stdin and writes one result
//! per line on stdout.

use std::sync::Arc;

use anyhow::Result;
use fnsched_scheduler::driver::run_driver;
use fnsched_scheduler::source::load_snapshot;
use fnsched_scheduler::{init_tracing, spawn_schedule_queue, Config, ResourceViewSource, StaticResourceView, TomlFileSource};
use tokio::io::{stdin, stdout, BufReader};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    info!(
        max_priority = config.max_priority,
        aggregation = %config.aggregation,
        policy = %config.priority_policy,
        relaxed = config.relaxed,
        "Starting fnsched scheduler"
    );

    let source: Arc<dyn ResourceViewSource> = match &config.resource_view {
        Some(path) => {
            // Fail fast on a broken snapshot.
            load_snapshot(path)?;
            info!(path = %path.display(), "Using resource view snapshot");
            Arc::new(TomlFileSource::new(path))
        }
        None => Arc::new(StaticResourceView::default()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, actor_task) = spawn_schedule_queue(&config, source, shutdown_rx.clone());
    handle.update_resource_info().await?;

    let mut driver = tokio::spawn(run_driver(
        handle,
        BufReader::new(stdin()),
        stdout(),
        shutdown_rx,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut driver => {
            match result {
                Ok(Ok(submitted)) => info!(submitted, "Input finished"),
                Ok(Err(e)) => error!(error = %e, "Driver error"),
                Err(e) => error!(error = %e, "Driver task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !driver.is_finished() {
        let _ = driver.await;
    }
    let _ = actor_task.await;

    info!("Scheduler shutdown complete");
    Ok(())
}
