use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    goals::GoalProgress,
    settings::SyncSettings,
    steps::{CounterDeltaTracker, StepLedger},
    sync::{RemoteStore, SyncAck, SyncExecutor, SyncState},
};

use super::loop_worker::{step_loop, StepPipeline};
use super::source::SensorSink;

/// Runs the step pipeline for the lifetime of the process.
///
/// Startup restores the counter baseline and primes the throttle from the
/// stored total for today. Shutdown drains queued readings, makes one final
/// bounded push, and only then stops the step loop.
pub struct StepService {
    sink: SensorSink,
    ledger: StepLedger,
    executor: SyncExecutor,
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
    flush_timeout: Duration,
}

impl StepService {
    pub async fn start(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        goals: Arc<dyn GoalProgress>,
        settings: &SyncSettings,
    ) -> Result<Self> {
        let ledger = StepLedger::new(db);
        let tracker = CounterDeltaTracker::load(ledger.clone()).await?;

        let today = Local::now().date_naive();
        let stored_today = ledger
            .today_total(today)
            .await
            .context("failed to read today's step total")?;
        info!(
            "Step service starting at {stored_today} steps for {today} (counter baseline {:?})",
            tracker.last_raw()
        );

        let executor = SyncExecutor::new(remote, Arc::clone(&goals));
        let pipeline = StepPipeline::new(
            tracker,
            goals,
            executor.clone(),
            settings.policy(),
            SyncState::primed(today, stored_today),
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(step_loop(
            pipeline,
            command_rx,
            executor.clone(),
            cancel_token.clone(),
        ));

        Ok(Self {
            sink: SensorSink::new(command_tx),
            ledger,
            executor,
            handle: Some(handle),
            cancel_token,
            flush_timeout: settings.flush_timeout(),
        })
    }

    pub fn sink(&self) -> SensorSink {
        self.sink.clone()
    }

    /// Resolves once every reading submitted so far has been handled.
    pub async fn settle(&self) -> Result<()> {
        self.sink
            .barrier()?
            .await
            .context("step loop exited before settling")
    }

    /// Final push and teardown. Flush failures are logged and reported as
    /// `None`; only a step loop that fails to join is an error.
    pub async fn shutdown(mut self) -> Result<Option<SyncAck>> {
        let flushed = match tokio::time::timeout(self.flush_timeout, self.final_flush()).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(err)) => {
                error!("final step flush failed: {err:#}");
                None
            }
            Err(_) => {
                warn!(
                    "final step flush timed out after {}s",
                    self.flush_timeout.as_secs()
                );
                None
            }
        };

        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.context("step loop task failed to join")?;
        }
        info!("Step service stopped");
        Ok(flushed)
    }

    async fn final_flush(&self) -> Result<Option<SyncAck>> {
        if let Err(err) = self.settle().await {
            warn!("flushing without draining queued readings: {err:#}");
        }

        let today = Local::now().date_naive();
        let today_total = self.ledger.today_total(today).await?;
        let lifetime_total = self.ledger.lifetime_total().await?;

        Ok(self
            .executor
            .flush_final(today, today_total, lifetime_total)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensing::SensorEvent;
    use crate::sync::executor::tests::{RecordingRemote, ScriptedGoals};

    async fn service(
        dir: &tempfile::TempDir,
        remote: Arc<RecordingRemote>,
    ) -> StepService {
        service_with(dir, remote, &SyncSettings::default()).await
    }

    async fn service_with(
        dir: &tempfile::TempDir,
        remote: Arc<RecordingRemote>,
        settings: &SyncSettings,
    ) -> StepService {
        let db = Database::new(dir.path().join("svc.sqlite3")).unwrap();
        StepService::start(db, remote, Arc::new(ScriptedGoals::default()), settings)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn readings_flow_through_to_remote_and_final_flush() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(RecordingRemote::default());
        let svc = service(&dir, remote.clone()).await;
        let sink = svc.sink();

        for raw in [100.0, 130.0, 131.0] {
            sink.submit(SensorEvent::now(raw)).unwrap();
        }
        svc.settle().await.unwrap();

        let ack = svc.shutdown().await.unwrap().unwrap();
        assert_eq!(ack.today_total, 31);
        assert_eq!(ack.lifetime_total, 31);

        let calls = remote.calls();
        let today = Local::now().date_naive();
        // First delta pushes (no upload yet this run), then the final flush.
        assert!(calls.contains(&format!("daily {today} 30")));
        assert!(calls.contains(&"group 30".to_string()));
        assert_eq!(calls.last().unwrap(), &format!("stats {today} 31"));
    }

    #[tokio::test]
    async fn restart_resumes_counter_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(RecordingRemote::default());

        let svc = service(&dir, remote.clone()).await;
        svc.sink().submit(SensorEvent::now(1000.0)).unwrap();
        svc.sink().submit(SensorEvent::now(1020.0)).unwrap();
        svc.shutdown().await.unwrap();

        let svc = service(&dir, remote.clone()).await;
        svc.sink().submit(SensorEvent::now(1025.0)).unwrap();
        let ack = svc.shutdown().await.unwrap().unwrap();

        assert_eq!(ack.today_total, 25);
        assert_eq!(ack.lifetime_total, 25);
    }

    #[tokio::test]
    async fn empty_day_skips_final_flush() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(RecordingRemote::default());
        let svc = service(&dir, remote.clone()).await;

        assert_eq!(svc.shutdown().await.unwrap(), None);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_remote_does_not_block_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(RecordingRemote::default());
        *remote.fail_on.lock().unwrap() = Some("daily");
        let svc = service(&dir, remote.clone()).await;

        svc.sink().submit(SensorEvent::now(1.0)).unwrap();
        svc.sink().submit(SensorEvent::now(9.0)).unwrap();

        assert_eq!(svc.shutdown().await.unwrap(), None);
    }

    #[tokio::test]
    async fn slow_remote_cannot_hold_up_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(RecordingRemote {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let settings = SyncSettings {
            shutdown_flush_timeout_secs: 1,
            ..SyncSettings::default()
        };
        let svc = service_with(&dir, remote.clone(), &settings).await;

        svc.sink().submit(SensorEvent::now(1.0)).unwrap();
        svc.sink().submit(SensorEvent::now(9.0)).unwrap();
        svc.settle().await.unwrap();

        let started = std::time::Instant::now();
        assert_eq!(svc.shutdown().await.unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(remote.calls().is_empty());
    }
}
