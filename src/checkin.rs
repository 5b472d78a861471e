//! HTTP check-in side channel.
//!
//! Before a transfer the remote is asked whether the id may be delivered;
//! after a transfer the delivery is recorded under a keyed MD5 signature.
//! Both calls succeed only on a 2xx response whose body is exactly `ok`.

use crate::error::{Result, SyncError};
use crate::task::{md5_hex, Task};
use std::time::Duration;
use tracing::debug;

const ACCEPTED: &str = "ok";

pub struct CheckIn {
    http: reqwest::Client,
    url: String,
    key: String,
}

impl CheckIn {
    pub fn new(url: impl Into<String>, key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
            key: key.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask whether `id` may be delivered.
    pub async fn pre_check(&self, id: &str) -> Result<()> {
        self.get(&[("id", id), ("action", "check")])
            .await
            .map_err(|reason| SyncError::Check {
                id: id.to_string(),
                reason,
            })
    }

    /// Record a completed delivery.
    pub async fn commit(&self, task: &Task) -> Result<()> {
        let signature = commit_signature(&task.id, &task.report_id, &self.key);
        self.get(&[
            ("id", task.id.as_str()),
            ("report_id", task.report_id.as_str()),
            ("hash", signature.as_str()),
        ])
        .await
        .map_err(|reason| SyncError::Commit {
            report_id: task.report_id.clone(),
            reason,
        })
    }

    /// Issues the GET and returns a reason string on rejection.
    async fn get(&self, params: &[(&str, &str)]) -> std::result::Result<(), String> {
        let resp = self
            .http
            .get(&self.url)
            .query(params)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("reading body failed: {}", e))?;
        debug!("check-in {} -> {} `{}`", self.url, status, body);

        if !status.is_success() {
            return Err(format!("HTTP {} `{}`", status.as_u16(), body));
        }
        if body != ACCEPTED {
            return Err(format!("unexpected body `{}`", body));
        }
        Ok(())
    }
}

/// `md5_hex(id + "-" + report_id + "-" + key)`
pub fn commit_signature(id: &str, report_id: &str, key: &str) -> String {
    md5_hex(format!("{}-{}-{}", id, report_id, key).as_bytes())
}
