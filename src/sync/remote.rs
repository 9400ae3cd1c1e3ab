//! Remote step store.
//!
//! The backend is a Firebase-style JSON tree addressed by path. Every write
//! is independent; nothing here batches or retries.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::json;

use crate::{
    db::{helpers::date_key, Goal},
    settings::RemoteSettings,
};

use super::RemoteError;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upload_daily_steps(&self, date: NaiveDate, total: u64) -> Result<(), RemoteError>;

    async fn upload_total_steps(&self, total: u64) -> Result<(), RemoteError>;

    /// Stats record keyed by `date`, carrying the lifetime total at that time.
    async fn update_step_stats(&self, date: NaiveDate, total: u64) -> Result<(), RemoteError>;

    /// Adds `delta` to the shared organisation/department running total.
    async fn add_steps_to_group(&self, delta: u64) -> Result<(), RemoteError>;

    async fn upload_goal(&self, goal: &Goal) -> Result<(), RemoteError>;
}

pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    user_id: String,
    group_id: Option<String>,
    auth_token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            user_id: settings.user_id.clone(),
            group_id: settings.group_id.clone(),
            auth_token: settings.auth_token.clone(),
        })
    }

    async fn send<B>(&self, method: Method, path: &str, body: &B) -> Result<(), RemoteError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.request(method, &url).json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| RemoteError::Transport {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn user_path(&self, rest: &str) -> String {
        format!("users/{}/{}", self.user_id, rest)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upload_daily_steps(&self, date: NaiveDate, total: u64) -> Result<(), RemoteError> {
        let path = self.user_path(&format!("daily_steps/{}.json", date_key(date)));
        self.send(Method::PUT, &path, &json!({ "steps": total })).await
    }

    async fn upload_total_steps(&self, total: u64) -> Result<(), RemoteError> {
        let path = self.user_path("total_steps.json");
        self.send(Method::PUT, &path, &total).await
    }

    async fn update_step_stats(&self, date: NaiveDate, total: u64) -> Result<(), RemoteError> {
        let path = self.user_path(&format!("stats/{}.json", date_key(date)));
        self.send(Method::PATCH, &path, &json!({ "total_steps": total }))
            .await
    }

    async fn add_steps_to_group(&self, delta: u64) -> Result<(), RemoteError> {
        let Some(group_id) = &self.group_id else {
            debug!("no group configured; skipping group increment of {delta}");
            return Ok(());
        };
        let path = format!("groups/{group_id}/increments.json");
        self.send(
            Method::POST,
            &path,
            &json!({ "user": self.user_id, "delta": delta }),
        )
        .await
    }

    async fn upload_goal(&self, goal: &Goal) -> Result<(), RemoteError> {
        let path = self.user_path(&format!("goals/{}.json", goal.id));
        self.send(Method::PUT, &path, goal).await
    }
}
