//! Background step tracking.
//!
//! Readings from a cumulative hardware step counter are turned into step
//! deltas, added to local daily and lifetime totals, credited to goals, and
//! pushed to a remote store under a batching policy.

pub mod db;
pub mod goals;
pub mod sensing;
pub mod settings;
pub mod steps;
pub mod sync;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info};
use tokio::io::BufReader;
use tokio::task::JoinError;

use db::Database;
use goals::{GoalProgress, LocalGoalTracker};
use sensing::{pump_lines, StepService};
use settings::{Paths, Settings};
use sync::{HttpRemoteStore, RemoteStore};

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Runs the daemon until the sensor feed on stdin ends or Ctrl-C arrives.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    let default_level = if settings::debug_mode() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    info!("stepsync starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    let result = runtime.block_on(run_daemon());
    // stdin reads park a blocking thread that never returns on its own.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run_daemon() -> Result<()> {
    let paths = Paths::from_env();
    let settings = Settings::load(&paths.config_path)?;

    let database = Database::new(settings.database_path(&paths.data_dir))?;
    info!("step ledger at {}", database.path().display());
    let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(&settings.remote)?);
    let goals: Arc<dyn GoalProgress> =
        Arc::new(LocalGoalTracker::new(database.clone(), Arc::clone(&remote)));

    let service = StepService::start(database, remote, goals, &settings.sync).await?;

    let sink = service.sink();
    let mut feed = tokio::spawn(async move {
        pump_lines(BufReader::new(tokio::io::stdin()), &sink).await
    });

    tokio::select! {
        joined = &mut feed => {
            log_feed_end(joined);
        }
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("interrupt received; shutting down"),
            Err(err) => {
                error!("failed to listen for Ctrl-C: {err}; running until the feed ends");
                log_feed_end((&mut feed).await);
            }
        },
    }

    service.shutdown().await?;
    feed.abort();
    Ok(())
}

/// Logs how the stdin feed finished. Returns true when it reached EOF cleanly.
fn log_feed_end(joined: Result<Result<usize>, JoinError>) -> bool {
    match joined {
        Ok(Ok(count)) => {
            info!("sensor feed ended after {count} readings");
            true
        }
        Ok(Err(err)) => {
            error!("sensor feed failed: {err:#}");
            false
        }
        Err(join_err) => {
            error!("sensor feed task failed: {join_err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feed_end_distinguishes_eof_from_failures() {
        assert!(log_feed_end(Ok(Ok(3))));
        assert!(!log_feed_end(Ok(Err(anyhow::anyhow!("stdin closed abruptly")))));

        let crashed = tokio::spawn(async {
            let lines: Vec<usize> = Vec::new();
            Ok::<usize, anyhow::Error>(lines[0])
        })
        .await;
        assert!(!log_feed_end(crashed));
    }
}
