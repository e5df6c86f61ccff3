//! Remote-or-local routing for agent responses.
//!
//! `ConnectionManager::send` decides per call whether to ask the remote
//! reasoning service or synthesize locally. A failed remote attempt falls
//! back to local synthesis within the same call, so callers always get a
//! turn; they only see which mode produced it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_core::types::{ConnectivityMode, Turn};

use crate::connectivity::ConnectivityMonitor;
use crate::error::ChatError;
use crate::personality::Personality;
use crate::remote::{HistoryEntry, ReasoningService, RemoteTurnRequest};
use crate::synthesizer::ResponseSynthesizer;

/// Default bound on a single remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_millis(4_000);

/// Everything `send` needs to produce the next agent turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub session_id: Uuid,
    pub utterance: &'a str,
    /// Session turns before this utterance.
    pub history: &'a [Turn],
    pub personality: &'a Personality,
}

/// The agent turn and the mode that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub turn: Turn,
    pub mode: ConnectivityMode,
}

/// Chooses between the remote service and local synthesis.
pub struct ConnectionManager {
    remote: Option<Arc<dyn ReasoningService>>,
    monitor: ConnectivityMonitor,
    synthesizer: Arc<ResponseSynthesizer>,
    timeout: Duration,
}

impl ConnectionManager {
    /// Local-only manager.
    pub fn local(synthesizer: Arc<ResponseSynthesizer>, monitor: ConnectivityMonitor) -> Self {
        Self {
            remote: None,
            monitor,
            synthesizer,
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    /// Manager that tries `remote` first.
    pub fn with_remote(
        remote: Arc<dyn ReasoningService>,
        synthesizer: Arc<ResponseSynthesizer>,
        monitor: ConnectivityMonitor,
        timeout: Duration,
    ) -> Self {
        Self {
            remote: Some(remote),
            monitor,
            synthesizer,
            timeout,
        }
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Mode the next `send` would start in.
    pub fn preferred_mode(&self) -> ConnectivityMode {
        if self.remote.is_some() && self.monitor.should_attempt_remote() {
            ConnectivityMode::Connected
        } else {
            ConnectivityMode::Local
        }
    }

    /// Produce the agent turn for `request`.
    ///
    /// Remote failures (timeout, transport error, non-success status, empty
    /// text) are absorbed: the service is marked unreachable for the
    /// cool-down window and the turn is synthesized locally. The only error
    /// is `InternalSynthesis`.
    pub async fn send(&self, request: TurnRequest<'_>) -> Result<Reply, ChatError> {
        if let Some(remote) = &self.remote {
            if self.monitor.should_attempt_remote() {
                debug!(session_id = %request.session_id, "Routing turn to remote service");
                if let Some(reply) = self.try_remote(remote.as_ref(), &request).await? {
                    return Ok(reply);
                }
            } else {
                debug!(
                    session_id = %request.session_id,
                    state = ?self.monitor.snapshot(),
                    in_cooldown = self.monitor.in_cooldown(),
                    "Skipping remote service"
                );
            }
        } else {
            debug!(session_id = %request.session_id, "No remote service configured");
        }

        self.synthesize_locally(&request)
    }

    async fn try_remote(
        &self,
        remote: &dyn ReasoningService,
        request: &TurnRequest<'_>,
    ) -> Result<Option<Reply>, ChatError> {
        let wire = RemoteTurnRequest {
            session_id: request.session_id,
            agent_id: request.personality.id.clone(),
            utterance: request.utterance.to_string(),
            history: request.history.iter().map(HistoryEntry::from).collect(),
        };

        let failure = match tokio::time::timeout(self.timeout, remote.respond(&wire)).await {
            Ok(Ok(response)) if !response.text.trim().is_empty() => {
                self.monitor.record_success();
                let feedback = match response.feedback {
                    Some(feedback) => feedback.clamped(),
                    None => self.synthesizer.feedback(request.utterance)?,
                };
                return Ok(Some(Reply {
                    turn: Turn::agent(response.text, Some(feedback)),
                    mode: ConnectivityMode::Connected,
                }));
            }
            Ok(Ok(_)) => "empty response text".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {} ms", self.timeout.as_millis()),
        };

        warn!(
            session_id = %request.session_id,
            reason = %failure,
            "Remote call failed, falling back to local synthesis"
        );
        self.monitor.record_failure();
        Ok(None)
    }

    fn synthesize_locally(&self, request: &TurnRequest<'_>) -> Result<Reply, ChatError> {
        let synthesis =
            self.synthesizer
                .synthesize(request.utterance, request.history, request.personality)?;
        Ok(Reply {
            turn: Turn::agent(synthesis.text, Some(synthesis.feedback)),
            mode: ConnectivityMode::Local,
        })
    }

    /// Periodically re-check the remote service and feed the result into
    /// the connectivity state. Returns `None` without a remote service or
    /// when the service has no health check; reachability then follows call
    /// outcomes only.
    pub fn spawn_health_probe(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let remote = self.remote.clone()?;
        if !remote.has_health_endpoint() {
            debug!("Remote service has no health endpoint; not probing");
            return None;
        }
        let monitor = self.monitor.clone();
        let timeout = self.timeout;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !monitor.snapshot().network_online {
                    continue;
                }
                match tokio::time::timeout(timeout, remote.health()).await {
                    Ok(Ok(())) => monitor.record_success(),
                    Ok(Err(e)) => {
                        debug!(error = %e, "Health probe failed");
                        monitor.record_failure();
                    }
                    Err(_) => {
                        debug!("Health probe timed out");
                        monitor.record_failure();
                    }
                }
            }
        }))
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("has_remote", &self.remote.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
