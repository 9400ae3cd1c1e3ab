use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{date_key, parse_date, parse_datetime, parse_optional_datetime, to_i64, to_u64},
    models::Goal,
};

const GOAL_COLUMNS: &str = "id, title, target_steps, progress_steps, start_date, end_date, completed_at, created_at, updated_at";

fn row_to_goal(row: &Row) -> Result<Goal> {
    let target_steps: i64 = row.get("target_steps")?;
    let progress_steps: i64 = row.get("progress_steps")?;
    let start_date: String = row.get("start_date")?;
    let end_date: String = row.get("end_date")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Goal {
        id: row.get("id")?,
        title: row.get("title")?,
        target_steps: to_u64(target_steps, "target_steps")?,
        progress_steps: to_u64(progress_steps, "progress_steps")?,
        start_date: parse_date(&start_date, "start_date")?,
        end_date: parse_date(&end_date, "end_date")?,
        completed_at: parse_optional_datetime(completed_at, "completed_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn query_active_goals(conn: &Connection, date: &str) -> Result<Vec<Goal>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GOAL_COLUMNS}
         FROM goals
         WHERE completed_at IS NULL AND start_date <= ?1 AND end_date >= ?1
         ORDER BY created_at ASC"
    ))?;

    let mut rows = stmt.query(params![date])?;
    let mut goals = Vec::new();
    while let Some(row) = rows.next()? {
        goals.push(row_to_goal(row)?);
    }
    Ok(goals)
}

impl Database {
    pub async fn insert_goal(&self, goal: &Goal) -> Result<()> {
        let record = goal.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO goals (id, title, target_steps, progress_steps, start_date, end_date, completed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.title,
                    to_i64(record.target_steps)?,
                    to_i64(record.progress_steps)?,
                    date_key(record.start_date),
                    date_key(record.end_date),
                    record.completed_at.map(|dt| dt.to_rfc3339()),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert goal")?;
            Ok(())
        })
        .await
    }

    /// Goals whose window covers `date`, completed ones included.
    pub async fn list_goals_for_date(&self, date: NaiveDate) -> Result<Vec<Goal>> {
        let key = date_key(date);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GOAL_COLUMNS}
                 FROM goals
                 WHERE start_date <= ?1 AND end_date >= ?1
                 ORDER BY created_at ASC"
            ))?;

            let mut rows = stmt.query(params![key])?;
            let mut goals = Vec::new();
            while let Some(row) = rows.next()? {
                goals.push(row_to_goal(row)?);
            }
            Ok(goals)
        })
        .await
    }

    /// Adds `delta` to every goal active on `date`. Returns the goals that
    /// reached their target during this call, already marked completed.
    pub async fn apply_goal_progress(
        &self,
        date: NaiveDate,
        delta: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Goal>> {
        let key = date_key(date);
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open goal transaction")?;
            let active = query_active_goals(&tx, &key)?;

            let mut completed = Vec::new();
            for mut goal in active {
                goal.progress_steps = goal.progress_steps.saturating_add(delta);
                goal.updated_at = now;
                if goal.progress_steps >= goal.target_steps {
                    goal.completed_at = Some(now);
                }

                tx.execute(
                    "UPDATE goals
                     SET progress_steps = ?1,
                         completed_at = ?2,
                         updated_at = ?3
                     WHERE id = ?4",
                    params![
                        to_i64(goal.progress_steps)?,
                        goal.completed_at.map(|dt| dt.to_rfc3339()),
                        now.to_rfc3339(),
                        goal.id,
                    ],
                )
                .with_context(|| format!("failed to update goal {}", goal.id))?;

                if goal.completed_at.is_some() {
                    completed.push(goal);
                }
            }

            tx.commit().context("failed to commit goal progress")?;
            Ok(completed)
        })
        .await
    }
}
