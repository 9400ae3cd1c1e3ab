use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::sync::SyncPolicy;

const DEFAULT_DATA_DIR: &str = ".stepsync";
const MAX_STALENESS_SECS: u64 = (i64::MAX / 1000) as u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub magnitude_threshold: u64,
    pub staleness_secs: u64,
    pub shutdown_flush_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            magnitude_threshold: 50,
            staleness_secs: 180,
            shutdown_flush_timeout_secs: 10,
        }
    }
}

impl SyncSettings {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            magnitude_threshold: self.magnitude_threshold,
            staleness: chrono::Duration::seconds(
                self.staleness_secs.min(MAX_STALENESS_SECS) as i64,
            ),
        }
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_flush_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteSettings {
    pub base_url: String,
    pub user_id: String,
    /// Organisation/department aggregate; group increments are skipped when unset.
    pub group_id: Option<String>,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".into(),
            user_id: "local".into(),
            group_id: None,
            auth_token: None,
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub database_path: Option<PathBuf>,
    pub sync: SyncSettings,
    pub remote: RemoteSettings,
}

impl Settings {
    /// Reads settings from `path`. A missing file yields defaults, and so does
    /// an unreadable one after a warning.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                warn!(
                    "Ignoring malformed settings at {}: {err}; using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_dir.join("stepsync.sqlite3"))
    }
}

/// Filesystem locations, taken from the environment.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
}

impl Paths {
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os("STEPSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let config_path = std::env::var_os("STEPSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("settings.json"));
        Self {
            data_dir,
            config_path,
        }
    }
}

pub fn debug_mode() -> bool {
    std::env::var("STEPSYNC_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
