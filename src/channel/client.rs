//! HTTP client for the peer node

use super::protocol::{Ack, PeerMessage, RejectionBody};
use crate::config::ChannelConfig;
use crate::error::{NodeError, NodeResult};
use crate::reminders::{Reminder, ReminderSource, RemindersBody};
use async_trait::async_trait;
use std::time::Duration;

/// Request/response link to the other node
///
/// Nothing here retries. Callers decide whether a failure aborts what they
/// were doing or is logged and dropped.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Reachability check (`GET /health`)
    async fn ping(&self) -> NodeResult<()>;

    /// Deliver one message and wait for the peer's answer
    async fn send(&self, message: &PeerMessage) -> NodeResult<Ack>;
}

/// `reqwest`-backed peer link with per-call timeouts
#[derive(Debug, Clone)]
pub struct PeerClient {
    base_url: String,
    client: reqwest::Client,
    command_timeout: Duration,
    ping_timeout: Duration,
}

impl PeerClient {
    pub fn new(base_url: &str, config: &ChannelConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            ping_timeout: Duration::from_secs(config.ping_timeout_secs),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport_error(err: reqwest::Error) -> NodeError {
    if err.is_timeout() {
        NodeError::Unreachable("request timed out".to_string())
    } else if err.is_connect() {
        NodeError::Unreachable(format!("connection failed: {}", err))
    } else {
        NodeError::Unreachable(err.to_string())
    }
}

#[async_trait]
impl PeerLink for PeerClient {
    async fn ping(&self) -> NodeResult<()> {
        let response = self
            .client
            .get(self.url("/health"))
            .timeout(self.ping_timeout)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NodeError::Unreachable(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    async fn send(&self, message: &PeerMessage) -> NodeResult<Ack> {
        tracing::debug!("Sending {} to {}", message, self.base_url);

        let response = self
            .client
            .post(self.url(message.path()))
            .json(&message.body())
            .timeout(self.command_timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body: RejectionBody = response.json().await.unwrap_or_default();
            let reason = body.into_reason(status.as_u16());
            tracing::warn!("Peer rejected {}: {} ({})", message, reason, status);
            return Err(NodeError::Rejected { reason });
        }

        // Peers answer with varying bodies; anything that parses as an Ack is kept
        match response.json::<Ack>().await {
            Ok(ack) => Ok(ack),
            Err(_) => Ok(Ack {
                status: "ok".to_string(),
                message: None,
            }),
        }
    }
}

#[async_trait]
impl ReminderSource for PeerClient {
    /// The panel's list from `GET /reminders`
    async fn reminders(&self) -> NodeResult<Vec<Reminder>> {
        let response = self
            .client
            .get(self.url("/reminders"))
            .timeout(self.command_timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::Rejected {
                reason: format!("http_{}", status.as_u16()),
            });
        }
        let body: RemindersBody = response
            .json()
            .await
            .map_err(|e| NodeError::InvalidInput(format!("unreadable reminder list: {}", e)))?;
        Ok(body.reminders)
    }
}
