//! Goal tracking as seen by the step pipeline.

pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub use local::LocalGoalTracker;

#[async_trait]
pub trait GoalProgress: Send + Sync {
    /// Credits `delta` steps taken on `date` to the active goals. Returns
    /// true when at least one goal reached its target in this call.
    async fn update_active_goals_progress_local(&self, date: NaiveDate, delta: u64) -> Result<bool>;

    /// Pushes goal state to the remote store. Best-effort.
    async fn sync_active_goals(&self, date: NaiveDate) -> Result<()>;
}
