use anyhow::{ensure, Result};
use chrono::NaiveDate;

use crate::db::{Database, StepTotals};

/// Sole owner of the durable step state: the raw counter baseline, the
/// per-day totals and the lifetime total.
///
/// Increments go through one store transaction each, and the store runs
/// transactions one at a time, so concurrent callers cannot lose updates.
#[derive(Clone)]
pub struct StepLedger {
    db: Database,
}

impl StepLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Credits `delta` to `date` and the lifetime total, moving the counter
    /// baseline to `raw_value` in the same store transaction.
    pub async fn apply_delta(
        &self,
        date: NaiveDate,
        delta: u64,
        raw_value: f64,
    ) -> Result<StepTotals> {
        ensure!(delta > 0, "step delta must be positive");
        self.db.add_steps(date, delta, raw_value).await
    }

    pub async fn today_total(&self, date: NaiveDate) -> Result<u64> {
        self.db.get_steps_of_date(date).await
    }

    pub async fn lifetime_total(&self) -> Result<u64> {
        self.db.get_total_steps().await
    }

    pub async fn last_counter(&self) -> Result<Option<f64>> {
        self.db.get_last_counter().await
    }

    pub async fn set_last_counter(&self, value: f64) -> Result<()> {
        self.db.save_last_counter(value).await
    }
}
