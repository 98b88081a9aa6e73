// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destinations for merged collapsed profiles.
//!
//! Upload is fire-and-forget per cycle: a sink gets one bounded attempt,
//! a failure is logged, and the cycle's bytes are dropped. There is no
//! retry queue; the next cycle brings fresh data anyway.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use strobe_core::CycleId;

/// Bound on one upload attempt.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected profile: status {0}")]
    Rejected(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One destination for a cycle's collapsed profile.
#[async_trait]
pub trait ProfileSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit one cycle's profile; returns a backend-assigned id when the
    /// destination produces one.
    async fn submit(&self, collapsed: &[u8], cycle: CycleId) -> Result<Option<String>, SinkError>;
}

/// POSTs profiles to the backend API.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    token: String,
    service: String,
}

impl HttpSink {
    pub fn new(host: &str, token: &str, service: &str) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/api/v1/profiles", host.trim_end_matches('/')),
            token: token.to_string(),
            service: service.to_string(),
        })
    }
}

#[async_trait]
impl ProfileSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn submit(&self, collapsed: &[u8], cycle: CycleId) -> Result<Option<String>, SinkError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .query(&[("service", self.service.as_str())])
            .header("content-type", "text/plain")
            .body(collapsed.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(status.as_u16()));
        }
        let gpid = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("gpid").and_then(|g| g.as_str()).map(String::from));
        debug!(cycle = %cycle, gpid = gpid.as_deref().unwrap_or(""), "profile uploaded");
        Ok(gpid)
    }
}

/// Writes each cycle's profile into a local directory (`-o`).
pub struct DirSink {
    dir: PathBuf,
}

impl DirSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl ProfileSink for DirSink {
    fn name(&self) -> &'static str {
        "dir"
    }

    async fn submit(&self, collapsed: &[u8], cycle: CycleId) -> Result<Option<String>, SinkError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("profile_{cycle}.col"));
        tokio::fs::write(&path, collapsed).await?;
        debug!(path = %path.display(), "profile written");
        Ok(None)
    }
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
