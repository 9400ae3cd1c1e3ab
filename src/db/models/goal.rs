//! Step goal data model.
//!
//! A goal counts steps taken inside an inclusive date window and completes
//! the first time its progress reaches the target.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub target_steps: u64,
    pub progress_steps: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
