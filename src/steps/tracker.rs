//! Turns raw readings from a monotonic hardware step counter into step
//! deltas.
//!
//! The counter restarts from a low value whenever the device reboots, so a
//! reading below the previous one is treated as a new baseline rather than
//! a negative (or wrapped, huge) delta.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use crate::db::StepTotals;

use super::StepLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaResult {
    /// First reading ever seen; it only establishes the baseline.
    NoBaseline,
    /// Counter went backwards; the reading became the new baseline.
    Reset,
    /// Counter moved by less than one whole step (or not at all).
    Unchanged,
    Delta(u64),
}

pub struct CounterDeltaTracker {
    ledger: StepLedger,
    last_raw: Option<f64>,
}

impl CounterDeltaTracker {
    /// Restores the baseline persisted by a previous run.
    pub async fn load(ledger: StepLedger) -> Result<Self> {
        let last_raw = ledger
            .last_counter()
            .await
            .context("failed to load last counter value")?;
        Ok(Self { ledger, last_raw })
    }

    pub fn last_raw(&self) -> Option<f64> {
        self.last_raw
    }

    /// Feeds one raw reading taken on `date`. Whenever the baseline changes
    /// it is persisted before the in-memory copy moves. A whole-step delta is
    /// credited to the ledger in the same store transaction, so a failed
    /// write keeps the old baseline and the next reading covers both
    /// intervals.
    pub async fn observe(
        &mut self,
        raw_value: f64,
        date: NaiveDate,
    ) -> Result<(DeltaResult, Option<StepTotals>)> {
        match self.classify(raw_value)? {
            DeltaResult::Delta(delta) => {
                let totals = self
                    .ledger
                    .apply_delta(date, delta, raw_value)
                    .await
                    .context("failed to record step reading")?;
                self.last_raw = Some(raw_value);
                Ok((DeltaResult::Delta(delta), Some(totals)))
            }
            other => {
                if self.last_raw != Some(raw_value) {
                    self.move_baseline(raw_value).await?;
                }
                Ok((other, None))
            }
        }
    }

    fn classify(&self, raw_value: f64) -> Result<DeltaResult> {
        if !raw_value.is_finite() || raw_value < 0.0 {
            bail!("invalid step counter reading {raw_value}");
        }

        let Some(last) = self.last_raw else {
            return Ok(DeltaResult::NoBaseline);
        };
        if raw_value < last {
            return Ok(DeltaResult::Reset);
        }

        match (raw_value - last).floor() as u64 {
            0 => Ok(DeltaResult::Unchanged),
            delta => Ok(DeltaResult::Delta(delta)),
        }
    }

    async fn move_baseline(&mut self, raw_value: f64) -> Result<()> {
        self.ledger
            .set_last_counter(raw_value)
            .await
            .context("failed to persist step counter baseline")?;
        self.last_raw = Some(raw_value);
        Ok(())
    }
}
