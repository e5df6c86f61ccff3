use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Who produced a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A finalized user utterance (typed or transcribed).
    User,
    /// A response produced by the agent, remotely or locally.
    Agent,
}

/// Where agent responses for a session are currently coming from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityMode {
    /// Responses come from the remote reasoning service.
    #[default]
    Connected,
    /// Responses are synthesized on-device.
    Local,
}

impl std::fmt::Display for ConnectivityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityMode::Connected => write!(f, "connected"),
            ConnectivityMode::Local => write!(f, "local"),
        }
    }
}

// =============================================================================
// Feedback
// =============================================================================

/// Per-turn language feedback attached to the agent turn answering it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Grammar score, 0 to 100.
    pub grammar_score: u8,
    /// Fluency score, 0 to 100.
    pub fluency_score: u8,
    /// Vocabulary score, 0 to 100.
    pub vocabulary_score: u8,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub corrections: Vec<String>,
    #[serde(default)]
    pub encouragement: String,
}

impl Feedback {
    /// Upper bound for every score.
    pub const MAX_SCORE: u8 = 100;

    /// Returns a copy with every score clamped into `0..=100`.
    pub fn clamped(mut self) -> Self {
        self.grammar_score = self.grammar_score.min(Self::MAX_SCORE);
        self.fluency_score = self.fluency_score.min(Self::MAX_SCORE);
        self.vocabulary_score = self.vocabulary_score.min(Self::MAX_SCORE);
        self
    }
}

// =============================================================================
// Turn
// =============================================================================

/// One utterance (user) or one generated response (agent).
///
/// Turns are immutable once created; a session only ever appends them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Recognition confidence for transcribed user input, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    /// Opaque handle to rendered audio, if the speech facility produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
}

impl Turn {
    /// Create a finalized user turn. Confidence is clamped into `0.0..=1.0`.
    pub fn user(text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            confidence: confidence.map(|c| if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) }),
            feedback: None,
            audio_ref: None,
        }
    }

    /// Create an agent turn carrying the feedback for the preceding user turn.
    pub fn agent(text: impl Into<String>, feedback: Option<Feedback>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Agent,
            text: text.into(),
            timestamp: Utc::now(),
            confidence: None,
            feedback,
            audio_ref: None,
        }
    }
}

/// Text of the most recent agent turn in `turns`, if any.
pub fn last_agent_text(turns: &[Turn]) -> Option<&str> {
    turns
        .iter()
        .rev()
        .find(|t| t.role == Role::Agent)
        .map(|t| t.text.as_str())
}

// =============================================================================
// Session
// =============================================================================

/// One continuous practice conversation with one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    turns: Vec<Turn>,
    pub mode: ConnectivityMode,
}

impl Session {
    /// Create an empty session for the given agent.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            started_at: Utc::now(),
            turns: Vec::new(),
            mode: ConnectivityMode::default(),
        }
    }

    /// Ordered, append-only turn log.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Append a turn. Existing turns cannot be edited or removed.
    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Timestamp of the newest turn, or the start time for an empty session.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.turns
            .last()
            .map(|t| t.timestamp)
            .unwrap_or(self.started_at)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            agent_id: self.agent_id.clone(),
            started_at: self.started_at,
            last_activity_at: self.last_activity_at(),
            turn_count: self.turns.len(),
            mode: self.mode,
        }
    }
}

/// Lightweight listing entry for a persisted session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub turn_count: usize,
    pub mode: ConnectivityMode,
}

// =============================================================================
// Connectivity
// =============================================================================

/// Point-in-time view of network and remote-service reachability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub network_online: bool,
    pub remote_service_reachable: bool,
}

impl Default for ConnectivityState {
    /// Optimistic until the first platform event or call outcome says otherwise.
    fn default() -> Self {
        Self {
            network_online: true,
            remote_service_reachable: true,
        }
    }
}
