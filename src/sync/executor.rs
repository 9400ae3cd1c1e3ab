use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::goals::GoalProgress;

use super::{RemoteStore, SyncFailure, SyncStage};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// What one push writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub date: NaiveDate,
    pub today_total: u64,
    pub lifetime_total: u64,
    /// Steps accrued since the previous push, added to the group total.
    pub delta_since_last_sync: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncAck {
    pub date: NaiveDate,
    pub today_total: u64,
    pub lifetime_total: u64,
    pub goals_synced: bool,
}

/// Exclusive right to run one push. Dropping it reopens the slot, whichever
/// way the push ended.
pub type UploadPermit = OwnedSemaphorePermit;

/// Writes local totals to the remote store, one push at a time.
///
/// Writes run in order and stop at the first failure. Nothing is rolled back
/// and nothing is retried; the local ledger stays authoritative and a later
/// push carries the newer totals.
#[derive(Clone)]
pub struct SyncExecutor {
    remote: Arc<dyn RemoteStore>,
    goals: Arc<dyn GoalProgress>,
    slot: Arc<Semaphore>,
}

impl SyncExecutor {
    pub fn new(remote: Arc<dyn RemoteStore>, goals: Arc<dyn GoalProgress>) -> Self {
        Self {
            remote,
            goals,
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Claims the single upload slot, or `None` if a push is running.
    pub fn try_acquire(&self) -> Option<UploadPermit> {
        Arc::clone(&self.slot).try_acquire_owned().ok()
    }

    /// Daily total, lifetime total, stats record, group increment, then goals.
    /// A goal sync failure is logged and reported in the ack only.
    pub async fn push(
        &self,
        permit: UploadPermit,
        request: SyncRequest,
    ) -> Result<SyncAck, SyncFailure> {
        let _permit = permit;
        log_debug!(
            "pushing {} steps for {} (lifetime {}, +{} since last push)",
            request.today_total,
            request.date,
            request.lifetime_total,
            request.delta_since_last_sync
        );

        self.write_totals(request.date, request.today_total, request.lifetime_total)
            .await?;

        if request.delta_since_last_sync > 0 {
            self.remote
                .add_steps_to_group(request.delta_since_last_sync)
                .await
                .map_err(|err| SyncFailure::new(SyncStage::GroupSteps, err))?;
        }

        let goals_synced = self.sync_goals(request.date).await;

        Ok(SyncAck {
            date: request.date,
            today_total: request.today_total,
            lifetime_total: request.lifetime_total,
            goals_synced,
        })
    }

    /// Last push before exit: same as `push` minus the group increment.
    /// Waits for a running push to finish first. Skipped when nothing was
    /// walked on `date`.
    pub async fn flush_final(
        &self,
        date: NaiveDate,
        today_total: u64,
        lifetime_total: u64,
    ) -> Result<Option<SyncAck>, SyncFailure> {
        if today_total == 0 {
            log_info!("final flush skipped: no steps recorded for {date}");
            return Ok(None);
        }

        let _permit = Arc::clone(&self.slot)
            .acquire_owned()
            .await
            .map_err(|err| SyncFailure::new(SyncStage::UploadSlot, err))?;
        self.write_totals(date, today_total, lifetime_total).await?;
        let goals_synced = self.sync_goals(date).await;

        log_info!("final flush wrote {today_total} steps for {date} (lifetime {lifetime_total})");
        Ok(Some(SyncAck {
            date,
            today_total,
            lifetime_total,
            goals_synced,
        }))
    }

    async fn write_totals(
        &self,
        date: NaiveDate,
        today_total: u64,
        lifetime_total: u64,
    ) -> Result<(), SyncFailure> {
        self.remote
            .upload_daily_steps(date, today_total)
            .await
            .map_err(|err| SyncFailure::new(SyncStage::DailySteps, err))?;
        self.remote
            .upload_total_steps(lifetime_total)
            .await
            .map_err(|err| SyncFailure::new(SyncStage::TotalSteps, err))?;
        self.remote
            .update_step_stats(date, lifetime_total)
            .await
            .map_err(|err| SyncFailure::new(SyncStage::StepStats, err))?;
        Ok(())
    }

    async fn sync_goals(&self, date: NaiveDate) -> bool {
        match self.goals.sync_active_goals(date).await {
            Ok(()) => true,
            Err(err) => {
                let failure = SyncFailure::new(SyncStage::Goals, err);
                log_warn!("{failure}");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Goal;
    use crate::sync::RemoteError;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    /// Records every remote call; can be told to fail one kind of write.
    #[derive(Default)]
    pub(crate) struct RecordingRemote {
        pub calls: Mutex<Vec<String>>,
        pub fail_on: Mutex<Option<&'static str>>,
        pub delay: Option<Duration>,
    }

    impl RecordingRemote {
        async fn record(&self, call: String) -> Result<(), RemoteError> {
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            let failing = *self.fail_on.lock().unwrap();
            let kind = call.split(' ').next().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(call);
            match failing {
                Some(target) if target == kind => Err(RemoteError::Status {
                    url: format!("memory://{kind}"),
                    status: 503,
                }),
                _ => Ok(()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteStore for RecordingRemote {
        async fn upload_daily_steps(&self, date: NaiveDate, total: u64) -> Result<(), RemoteError> {
            self.record(format!("daily {date} {total}")).await
        }
        async fn upload_total_steps(&self, total: u64) -> Result<(), RemoteError> {
            self.record(format!("total {total}")).await
        }
        async fn update_step_stats(&self, date: NaiveDate, total: u64) -> Result<(), RemoteError> {
            self.record(format!("stats {date} {total}")).await
        }
        async fn add_steps_to_group(&self, delta: u64) -> Result<(), RemoteError> {
            self.record(format!("group {delta}")).await
        }
        async fn upload_goal(&self, goal: &Goal) -> Result<(), RemoteError> {
            self.record(format!("goal {}", goal.id)).await
        }
    }

    /// Goal double with a scripted completion answer.
    #[derive(Default)]
    pub(crate) struct ScriptedGoals {
        pub complete_on_next: Mutex<bool>,
        pub credited: Mutex<u64>,
        pub syncs: Mutex<u32>,
        pub fail_sync: bool,
    }

    #[async_trait]
    impl GoalProgress for ScriptedGoals {
        async fn update_active_goals_progress_local(&self, _date: NaiveDate, delta: u64) -> Result<bool> {
            *self.credited.lock().unwrap() += delta;
            Ok(std::mem::take(&mut *self.complete_on_next.lock().unwrap()))
        }

        async fn sync_active_goals(&self, _date: NaiveDate) -> Result<()> {
            *self.syncs.lock().unwrap() += 1;
            if self.fail_sync {
                bail!("goal backend unavailable");
            }
            Ok(())
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn request() -> SyncRequest {
        SyncRequest {
            date: day(),
            today_total: 160,
            lifetime_total: 9160,
            delta_since_last_sync: 60,
        }
    }

    #[tokio::test]
    async fn push_writes_every_stage_in_order() {
        let remote = Arc::new(RecordingRemote::default());
        let goals = Arc::new(ScriptedGoals::default());
        let executor = SyncExecutor::new(remote.clone(), goals.clone());

        let permit = executor.try_acquire().unwrap();
        let ack = executor.push(permit, request()).await.unwrap();

        assert!(ack.goals_synced);
        assert_eq!(
            remote.calls(),
            vec![
                "daily 2024-05-01 160",
                "total 9160",
                "stats 2024-05-01 9160",
                "group 60",
            ]
        );
        assert_eq!(*goals.syncs.lock().unwrap(), 1);
        assert!(!executor.is_in_flight());
    }

    #[tokio::test]
    async fn failure_stops_later_stages_and_releases_slot() {
        let remote = Arc::new(RecordingRemote::default());
        *remote.fail_on.lock().unwrap() = Some("total");
        let goals = Arc::new(ScriptedGoals::default());
        let executor = SyncExecutor::new(remote.clone(), goals.clone());

        let permit = executor.try_acquire().unwrap();
        let failure = executor.push(permit, request()).await.unwrap_err();

        assert_eq!(failure.stage, SyncStage::TotalSteps);
        assert_eq!(remote.calls(), vec!["daily 2024-05-01 160", "total 9160"]);
        assert_eq!(*goals.syncs.lock().unwrap(), 0);
        assert!(!executor.is_in_flight());
        assert!(executor.try_acquire().is_some());
    }

    #[tokio::test]
    async fn goal_sync_failure_does_not_fail_push() {
        let remote = Arc::new(RecordingRemote::default());
        let goals = Arc::new(ScriptedGoals {
            fail_sync: true,
            ..Default::default()
        });
        let executor = SyncExecutor::new(remote, goals);

        let permit = executor.try_acquire().unwrap();
        let ack = executor.push(permit, request()).await.unwrap();
        assert!(!ack.goals_synced);
    }

    #[tokio::test]
    async fn only_one_permit_at_a_time() {
        let executor = SyncExecutor::new(
            Arc::new(RecordingRemote::default()),
            Arc::new(ScriptedGoals::default()),
        );

        let first = executor.try_acquire().unwrap();
        assert!(executor.is_in_flight());
        assert!(executor.try_acquire().is_none());
        drop(first);
        assert!(executor.try_acquire().is_some());
    }

    #[tokio::test]
    async fn aborted_push_reopens_slot() {
        let remote = Arc::new(RecordingRemote {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let executor = SyncExecutor::new(remote, Arc::new(ScriptedGoals::default()));

        let permit = executor.try_acquire().unwrap();
        let running = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.push(permit, request()).await })
        };
        assert!(executor.is_in_flight());

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());
        assert!(!executor.is_in_flight());
        assert!(executor.try_acquire().is_some());
    }

    #[tokio::test]
    async fn zero_delta_skips_group_increment() {
        let remote = Arc::new(RecordingRemote::default());
        let executor = SyncExecutor::new(remote.clone(), Arc::new(ScriptedGoals::default()));

        let permit = executor.try_acquire().unwrap();
        let mut req = request();
        req.delta_since_last_sync = 0;
        executor.push(permit, req).await.unwrap();

        assert!(!remote.calls().iter().any(|c| c.starts_with("group")));
    }

    #[tokio::test]
    async fn final_flush_skips_group_and_empty_days() {
        let remote = Arc::new(RecordingRemote::default());
        let goals = Arc::new(ScriptedGoals::default());
        let executor = SyncExecutor::new(remote.clone(), goals.clone());

        assert_eq!(executor.flush_final(day(), 0, 500).await.unwrap(), None);
        assert!(remote.calls().is_empty());

        let ack = executor.flush_final(day(), 42, 542).await.unwrap().unwrap();
        assert_eq!(ack.today_total, 42);
        assert_eq!(
            remote.calls(),
            vec!["daily 2024-05-01 42", "total 542", "stats 2024-05-01 542"]
        );
        assert_eq!(*goals.syncs.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn final_flush_waits_for_running_push() {
        let remote = Arc::new(RecordingRemote::default());
        let executor = SyncExecutor::new(remote.clone(), Arc::new(ScriptedGoals::default()));

        let permit = executor.try_acquire().unwrap();
        let releaser = tokio::spawn(async move {
            sleep(Duration::from_millis(60)).await;
            drop(permit);
        });

        executor.flush_final(day(), 10, 10).await.unwrap();
        releaser.await.unwrap();
        assert_eq!(remote.calls().len(), 3);
    }
}
