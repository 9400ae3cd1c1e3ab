//! When to push local step totals to the remote store.
//!
//! Pushes are batched: a push starts when enough steps have piled up, when a
//! goal has just been completed, or when some progress has been waiting for
//! longer than the staleness window. An upload already in flight blocks all
//! of these; the next reading re-evaluates.

use chrono::{DateTime, Duration, NaiveDate, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub magnitude_threshold: u64,
    pub staleness: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            magnitude_threshold: 50,
            staleness: Duration::minutes(3),
        }
    }
}

impl SyncPolicy {
    /// `last_upload_at` is `None` until this process has pushed once, which
    /// counts as stale.
    pub fn should_sync(
        &self,
        today_total: u64,
        last_uploaded_today_steps: u64,
        last_upload_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        goal_just_completed: bool,
        upload_in_flight: bool,
    ) -> bool {
        if upload_in_flight {
            return false;
        }

        let pending = today_total.saturating_sub(last_uploaded_today_steps);
        if pending >= self.magnitude_threshold || goal_just_completed {
            return true;
        }

        let stale = match last_upload_at {
            Some(at) => now.signed_duration_since(at) >= self.staleness,
            None => true,
        };
        pending > 0 && stale
    }
}

/// Throttle bookkeeping for one process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    last_uploaded_date: NaiveDate,
    last_uploaded_today_steps: u64,
    last_upload_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Starts from the stored total for `date` so a restart does not push
    /// steps that were already pushed before it.
    pub fn primed(date: NaiveDate, today_total: u64) -> Self {
        Self {
            last_uploaded_date: date,
            last_uploaded_today_steps: today_total,
            last_upload_at: None,
        }
    }

    /// Uploaded snapshot for `date`; a different day has nothing uploaded yet.
    pub fn uploaded_steps_for(&self, date: NaiveDate) -> u64 {
        if date == self.last_uploaded_date {
            self.last_uploaded_today_steps
        } else {
            0
        }
    }

    pub fn should_sync(
        &self,
        policy: &SyncPolicy,
        date: NaiveDate,
        today_total: u64,
        now: DateTime<Utc>,
        goal_just_completed: bool,
        upload_in_flight: bool,
    ) -> bool {
        policy.should_sync(
            today_total,
            self.uploaded_steps_for(date),
            self.last_upload_at,
            now,
            goal_just_completed,
            upload_in_flight,
        )
    }

    /// Records a push of `today_total` as started at `now` and returns the
    /// steps accrued since the previous snapshot. This runs before the push
    /// is attempted, so a failed push is only retried once a trigger fires
    /// again.
    pub fn advance(&mut self, date: NaiveDate, today_total: u64, now: DateTime<Utc>) -> u64 {
        let delta = today_total.saturating_sub(self.uploaded_steps_for(date));
        self.last_uploaded_date = date;
        self.last_uploaded_today_steps = today_total;
        self.last_upload_at = Some(now);
        delta
    }
}
