//! Step totals as stored locally.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Accumulated steps for one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailySteps {
    pub date: NaiveDate,
    pub steps: u64,
    pub updated_at: DateTime<Utc>,
}

/// Post-update values returned by an atomic ledger increment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StepTotals {
    pub today: u64,
    pub lifetime: u64,
}
