// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Polling client for the remote control endpoint.
//!
//! In heartbeat mode the agent stays idle and asks the backend for
//! commands on a fixed interval. Each request has its own timeout,
//! independent of any profiling activity.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use strobe_core::CommandId;

/// Bound on one poll or ack request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the control endpoint is polled.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("control endpoint returned status {0}")]
    Status(u16),
}

/// What a command tells the orchestrator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Stop,
    Reconfigure,
}

/// One remote control command.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCommand {
    pub id: CommandId,
    pub kind: CommandKind,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CommandsResponse {
    #[serde(default)]
    commands: Vec<RemoteCommand>,
}

pub struct HeartbeatClient {
    client: reqwest::Client,
    base: String,
    token: String,
    service: String,
    hostname: String,
}

impl HeartbeatClient {
    pub fn new(host: &str, token: &str, service: &str) -> Result<Self, HeartbeatError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: host.trim_end_matches('/').to_string(),
            token: token.to_string(),
            service: service.to_string(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        })
    }

    /// Fetch pending commands for this host.
    pub async fn poll(&self) -> Result<Vec<RemoteCommand>, HeartbeatError> {
        let response = self
            .client
            .get(format!("{}/api/v1/commands", self.base))
            .bearer_auth(&self.token)
            .query(&[
                ("hostname", self.hostname.as_str()),
                ("service", self.service.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HeartbeatError::Status(status.as_u16()));
        }
        let parsed: CommandsResponse = response.json().await?;
        if !parsed.commands.is_empty() {
            debug!(count = parsed.commands.len(), "received control commands");
        }
        Ok(parsed.commands)
    }

    /// Acknowledge an executed (or idempotently skipped) command.
    /// Best-effort; the id history is what guarantees idempotence.
    pub async fn ack(&self, id: &CommandId, status: &str) {
        let result = self
            .client
            .post(format!("{}/api/v1/commands/{id}/ack", self.base))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await;
        if let Err(e) = result {
            debug!(error = %e, command = %id, "command ack failed");
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
