use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use log::{info, warn};
use uuid::Uuid;

use crate::{
    db::{Database, Goal},
    sync::RemoteStore,
};

use super::GoalProgress;

/// Goals kept in the local step store and mirrored to the remote store.
pub struct LocalGoalTracker {
    db: Database,
    remote: Arc<dyn RemoteStore>,
}

impl LocalGoalTracker {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        Self { db, remote }
    }

    pub async fn add_goal(
        &self,
        title: &str,
        target_steps: u64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Goal> {
        ensure!(target_steps > 0, "goal target must be positive");
        ensure!(
            start_date <= end_date,
            "goal window ends ({end_date}) before it starts ({start_date})"
        );

        let now = Utc::now();
        let goal = Goal {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            target_steps,
            progress_steps: 0,
            start_date,
            end_date,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_goal(&goal).await?;
        Ok(goal)
    }
}

#[async_trait]
impl GoalProgress for LocalGoalTracker {
    async fn update_active_goals_progress_local(&self, date: NaiveDate, delta: u64) -> Result<bool> {
        let completed = self
            .db
            .apply_goal_progress(date, delta, Utc::now())
            .await
            .context("failed to apply goal progress")?;

        for goal in &completed {
            info!(
                "Goal '{}' reached {} / {} steps",
                goal.title, goal.progress_steps, goal.target_steps
            );
        }
        Ok(!completed.is_empty())
    }

    async fn sync_active_goals(&self, date: NaiveDate) -> Result<()> {
        let goals = self.db.list_goals_for_date(date).await?;

        let mut failures = 0usize;
        for goal in &goals {
            if let Err(err) = self.remote.upload_goal(goal).await {
                warn!("failed to upload goal {}: {err}", goal.id);
                failures += 1;
            }
        }

        ensure!(
            failures == 0,
            "{failures} of {} goal uploads failed",
            goals.len()
        );
        Ok(())
    }
}
