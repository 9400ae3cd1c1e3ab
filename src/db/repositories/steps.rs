use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::db::{
    connection::Database,
    helpers::{date_key, parse_date, parse_datetime, to_i64, to_u64},
    models::{DailySteps, StepTotals},
};

fn upsert_last_counter(conn: &Connection, value: f64, now: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO counter_state (id, last_counter, updated_at)
         VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE
         SET last_counter = excluded.last_counter,
             updated_at = excluded.updated_at",
        params![value, now],
    )
    .context("failed to save last counter")?;
    Ok(())
}

fn add_steps_for_date(tx: &Transaction<'_>, date: &str, delta: i64, now: &str) -> Result<u64> {
    tx.execute(
        "INSERT INTO daily_steps (date, steps, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(date) DO UPDATE
         SET steps = steps + excluded.steps,
             updated_at = excluded.updated_at",
        params![date, delta, now],
    )
    .context("failed to add daily steps")?;

    let steps: i64 = tx.query_row(
        "SELECT steps FROM daily_steps WHERE date = ?1",
        params![date],
        |row| row.get(0),
    )?;
    to_u64(steps, "daily_steps.steps")
}

fn add_to_total(tx: &Transaction<'_>, delta: i64, now: &str) -> Result<u64> {
    tx.execute(
        "INSERT INTO lifetime_steps (id, total, updated_at)
         VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE
         SET total = total + excluded.total,
             updated_at = excluded.updated_at",
        params![delta, now],
    )
    .context("failed to add lifetime steps")?;

    let total: i64 = tx.query_row("SELECT total FROM lifetime_steps WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    to_u64(total, "lifetime_steps.total")
}

impl Database {
    pub async fn get_last_counter(&self) -> Result<Option<f64>> {
        self.execute(|conn| {
            let value = conn
                .query_row(
                    "SELECT last_counter FROM counter_state WHERE id = 1",
                    [],
                    |row| row.get::<_, f64>(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn save_last_counter(&self, value: f64) -> Result<()> {
        self.execute(move |conn| upsert_last_counter(conn, value, &Utc::now().to_rfc3339()))
            .await
    }

    pub async fn get_daily_steps(&self, date: NaiveDate) -> Result<Option<DailySteps>> {
        let key = date_key(date);
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT date, steps, updated_at FROM daily_steps WHERE date = ?1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(date, steps, updated_at)| {
                Ok(DailySteps {
                    date: parse_date(&date, "date")?,
                    steps: to_u64(steps, "steps")?,
                    updated_at: parse_datetime(&updated_at, "updated_at")?,
                })
            })
            .transpose()
        })
        .await
    }

    pub async fn get_steps_of_date(&self, date: NaiveDate) -> Result<u64> {
        Ok(self
            .get_daily_steps(date)
            .await?
            .map(|day| day.steps)
            .unwrap_or(0))
    }

    pub async fn get_total_steps(&self) -> Result<u64> {
        self.execute(|conn| {
            let total = conn
                .query_row("SELECT total FROM lifetime_steps WHERE id = 1", [], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?;
            match total {
                Some(total) => to_u64(total, "total"),
                None => Ok(0),
            }
        })
        .await
    }

    /// Adds `delta` to the day's total and to the lifetime total and moves
    /// the counter baseline to `raw_value`, all in one transaction. Returns
    /// both post-update totals.
    pub async fn add_steps(
        &self,
        date: NaiveDate,
        delta: u64,
        raw_value: f64,
    ) -> Result<StepTotals> {
        let key = date_key(date);
        self.execute(move |conn| {
            let delta = to_i64(delta)?;
            let now = Utc::now().to_rfc3339();
            let tx = conn
                .transaction()
                .context("failed to open step transaction")?;
            upsert_last_counter(&tx, raw_value, &now)?;
            let today = add_steps_for_date(&tx, &key, delta, &now)?;
            let lifetime = add_to_total(&tx, delta, &now)?;
            tx.commit().context("failed to commit step transaction")?;
            Ok(StepTotals { today, lifetime })
        })
        .await
    }
}
