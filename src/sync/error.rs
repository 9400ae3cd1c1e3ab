use std::fmt;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure talking to the remote step store.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Which remote write of a push failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    UploadSlot,
    DailySteps,
    TotalSteps,
    StepStats,
    GroupSteps,
    Goals,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::UploadSlot => "upload slot",
            SyncStage::DailySteps => "daily steps upload",
            SyncStage::TotalSteps => "total steps upload",
            SyncStage::StepStats => "step stats update",
            SyncStage::GroupSteps => "group steps increment",
            SyncStage::Goals => "goal sync",
        };
        f.write_str(name)
    }
}

/// A push stopped at `stage`. Writes before it stay applied.
#[derive(Error, Debug)]
#[error("sync failed at {stage}: {source}")]
pub struct SyncFailure {
    pub stage: SyncStage,
    #[source]
    pub source: BoxError,
}

impl SyncFailure {
    pub fn new(stage: SyncStage, source: impl Into<BoxError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}
