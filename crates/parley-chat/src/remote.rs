//! Client for the remote reasoning service.
//!
//! The service takes one conversation turn as JSON and answers with the
//! agent's text and optional feedback. Field names are camelCase on the wire.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use parley_core::types::{Feedback, Role, Turn};

use crate::error::ChatError;

// =============================================================================
// Wire types
// =============================================================================

/// One prior turn, as sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

impl From<&Turn> for HistoryEntry {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            text: turn.text.clone(),
        }
    }
}

/// Request body POSTed to the reasoning endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTurnRequest {
    pub session_id: Uuid,
    pub agent_id: String,
    pub utterance: String,
    pub history: Vec<HistoryEntry>,
}

/// Response body from the reasoning endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTurnResponse {
    pub text: String,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

// =============================================================================
// ReasoningService
// =============================================================================

/// Remote reasoning backend.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Ask the service for the agent's reply to one turn.
    async fn respond(&self, request: &RemoteTurnRequest) -> Result<RemoteTurnResponse, ChatError>;

    /// Check that the service is up.
    async fn health(&self) -> Result<(), ChatError>;

    /// Whether `health` checks anything. Services without a health check
    /// are never probed.
    fn has_health_endpoint(&self) -> bool {
        true
    }
}

/// `ReasoningService` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpReasoningService {
    client: reqwest::Client,
    endpoint: String,
    health_endpoint: Option<String>,
}

impl HttpReasoningService {
    /// Build a client. `timeout` bounds each HTTP request.
    pub fn new(
        endpoint: impl Into<String>,
        health_endpoint: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            health_endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `host:port` of the reasoning endpoint, for plain TCP reachability
    /// checks. `None` when the endpoint is not a URL with a host.
    pub fn socket_target(&self) -> Option<String> {
        let url = reqwest::Url::parse(&self.endpoint).ok()?;
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(format!("{}:{}", host, port))
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    async fn respond(&self, request: &RemoteTurnRequest) -> Result<RemoteTurnResponse, ChatError> {
        debug!(
            session_id = %request.session_id,
            endpoint = %self.endpoint,
            history = request.history.len(),
            "POST reasoning turn"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Remote(format!("HTTP {}: {}", status, body)));
        }

        Ok(response.json::<RemoteTurnResponse>().await?)
    }

    fn has_health_endpoint(&self) -> bool {
        self.health_endpoint.is_some()
    }

    async fn health(&self) -> Result<(), ChatError> {
        let url = self
            .health_endpoint
            .as_deref()
            .ok_or_else(|| ChatError::Remote("no health endpoint configured".to_string()))?;
        let status = self.client.get(url).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ChatError::Remote(format!("health check returned HTTP {}", status)))
        }
    }
}
