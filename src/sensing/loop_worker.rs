use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    db::StepTotals,
    goals::GoalProgress,
    steps::{CounterDeltaTracker, DeltaResult},
    sync::{SyncAck, SyncExecutor, SyncFailure, SyncPolicy, SyncRequest, SyncState, UploadPermit},
};

use super::source::{SensorEvent, StepCommand};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// What a single reading did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingOutcome {
    Skipped(DeltaResult),
    Applied {
        delta: u64,
        totals: StepTotals,
        goal_just_completed: bool,
        push_started: bool,
    },
}

/// Reading → delta → ledger → goals → throttle. Owned by the step loop, so
/// readings are handled strictly one after another in arrival order.
pub struct StepPipeline {
    tracker: CounterDeltaTracker,
    goals: Arc<dyn GoalProgress>,
    executor: SyncExecutor,
    policy: SyncPolicy,
    state: SyncState,
}

impl StepPipeline {
    pub fn new(
        tracker: CounterDeltaTracker,
        goals: Arc<dyn GoalProgress>,
        executor: SyncExecutor,
        policy: SyncPolicy,
        state: SyncState,
    ) -> Self {
        Self {
            tracker,
            goals,
            executor,
            policy,
            state,
        }
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.state
    }

    /// Handles one reading. When a push is due, the upload slot is already
    /// claimed and the throttle state advanced; the caller runs the push.
    pub async fn process(
        &mut self,
        event: &SensorEvent,
    ) -> Result<(ReadingOutcome, Option<(UploadPermit, SyncRequest)>)> {
        let date = event.local_date();
        let (delta, totals) = match self
            .tracker
            .observe(event.raw_value, date)
            .await?
        {
            (DeltaResult::Delta(delta), Some(totals)) => (delta, totals),
            (other, _) => return Ok((ReadingOutcome::Skipped(other), None)),
        };

        let goal_just_completed = match self
            .goals
            .update_active_goals_progress_local(date, delta)
            .await
        {
            Ok(completed) => completed,
            Err(err) => {
                log_warn!("goal progress update failed: {err:#}");
                false
            }
        };
        if goal_just_completed {
            log_info!("goal completed; pushing immediately");
        }

        let now = event.timestamp;
        let due = self.state.should_sync(
            &self.policy,
            date,
            totals.today,
            now,
            goal_just_completed,
            self.executor.is_in_flight(),
        );

        let push = if due {
            self.executor.try_acquire().map(|permit| {
                let delta_since_last_sync = self.state.advance(date, totals.today, now);
                let request = SyncRequest {
                    date,
                    today_total: totals.today,
                    lifetime_total: totals.lifetime,
                    delta_since_last_sync,
                };
                (permit, request)
            })
        } else {
            None
        };

        let outcome = ReadingOutcome::Applied {
            delta,
            totals,
            goal_just_completed,
            push_started: push.is_some(),
        };
        Ok((outcome, push))
    }
}

pub(crate) async fn step_loop(
    mut pipeline: StepPipeline,
    mut commands: mpsc::UnboundedReceiver<StepCommand>,
    executor: SyncExecutor,
    cancel_token: CancellationToken,
) {
    let mut pushes: JoinSet<Result<SyncAck, SyncFailure>> = JoinSet::new();
    let mut feed_open = true;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("step loop shutting down");
                break;
            }
            command = commands.recv(), if feed_open => {
                match command {
                    Some(StepCommand::Reading(event)) => {
                        match pipeline.process(&event).await {
                            Ok((outcome, push)) => {
                                log_debug!(
                                    "reading {} at {}: {:?}",
                                    event.raw_value,
                                    event.timestamp,
                                    outcome
                                );
                                if let Some((permit, request)) = push {
                                    let executor = executor.clone();
                                    pushes.spawn(async move { executor.push(permit, request).await });
                                }
                            }
                            Err(err) => log_error!(
                                "failed to process reading {} at {}: {err:#}",
                                event.raw_value,
                                event.timestamp
                            ),
                        }
                    }
                    Some(StepCommand::Barrier(done)) => {
                        let _ = done.send(());
                    }
                    None => {
                        log_info!("sensor feed closed; waiting for shutdown");
                        feed_open = false;
                    }
                }
            }
            Some(joined) = pushes.join_next(), if !pushes.is_empty() => {
                match joined {
                    Ok(Ok(ack)) => log_info!(
                        "synced {} steps for {} (lifetime {})",
                        ack.today_total,
                        ack.date,
                        ack.lifetime_total
                    ),
                    Ok(Err(failure)) => log_warn!("{failure}; will retry on a later trigger"),
                    Err(join_err) => log_error!("sync task failed to join: {join_err}"),
                }
            }
        }
    }

    if !pushes.is_empty() {
        log_warn!("aborting {} in-flight sync push(es)", pushes.len());
        pushes.abort_all();
    }
}
