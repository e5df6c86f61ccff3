use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConnectivityMode, ConnectivityState, Role};

/// Domain events emitted by the conversation engine.
///
/// Every session state transition carries the event that caused it, so the
/// presentation layer can react to the cause as well as the new state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConversationEvent {
    // =========================================================================
    // Session lifecycle
    // =========================================================================
    /// A fresh session was started with an agent.
    SessionStarted {
        session_id: Uuid,
        agent_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A persisted session was loaded and made active again.
    SessionResumed {
        session_id: Uuid,
        agent_id: String,
        turn_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// The active session was ended (explicitly or by switching agents).
    SessionEnded {
        session_id: Uuid,
        turn_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// The engine returned to idle with no active session.
    SessionCleared { timestamp: DateTime<Utc> },

    // =========================================================================
    // Turns
    // =========================================================================
    /// A turn was appended to the session log.
    TurnAppended {
        session_id: Uuid,
        turn_id: Uuid,
        role: Role,
        timestamp: DateTime<Utc>,
    },

    /// The session switched between remote and local responses.
    ModeChanged {
        session_id: Uuid,
        from: ConnectivityMode,
        to: ConnectivityMode,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Speech output
    // =========================================================================
    /// The agent turn is being spoken.
    SpeechStarted {
        session_id: Uuid,
        turn_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Playback reported completion (or failure) for the agent turn.
    SpeechFinished {
        session_id: Uuid,
        turn_id: Uuid,
        spoken: bool,
        timestamp: DateTime<Utc>,
    },

    /// No speech facility is available; the turn was shown but not spoken.
    SpeechUnsupported {
        session_id: Uuid,
        turn_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Infrastructure
    // =========================================================================
    /// Writing the session to the store failed; the session continues in memory.
    PersistenceFailed {
        session_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Network or remote-service reachability changed.
    ConnectivityChanged {
        state: ConnectivityState,
        timestamp: DateTime<Utc>,
    },
}

impl ConversationEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ConversationEvent::SessionStarted { timestamp, .. }
            | ConversationEvent::SessionResumed { timestamp, .. }
            | ConversationEvent::SessionEnded { timestamp, .. }
            | ConversationEvent::SessionCleared { timestamp }
            | ConversationEvent::TurnAppended { timestamp, .. }
            | ConversationEvent::ModeChanged { timestamp, .. }
            | ConversationEvent::SpeechStarted { timestamp, .. }
            | ConversationEvent::SpeechFinished { timestamp, .. }
            | ConversationEvent::SpeechUnsupported { timestamp, .. }
            | ConversationEvent::PersistenceFailed { timestamp, .. }
            | ConversationEvent::ConnectivityChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a stable event name for logging and UI routing.
    pub fn event_name(&self) -> &'static str {
        match self {
            ConversationEvent::SessionStarted { .. } => "session_started",
            ConversationEvent::SessionResumed { .. } => "session_resumed",
            ConversationEvent::SessionEnded { .. } => "session_ended",
            ConversationEvent::SessionCleared { .. } => "session_cleared",
            ConversationEvent::TurnAppended { .. } => "turn_appended",
            ConversationEvent::ModeChanged { .. } => "mode_changed",
            ConversationEvent::SpeechStarted { .. } => "speech_started",
            ConversationEvent::SpeechFinished { .. } => "speech_finished",
            ConversationEvent::SpeechUnsupported { .. } => "speech_unsupported",
            ConversationEvent::PersistenceFailed { .. } => "persistence_failed",
            ConversationEvent::ConnectivityChanged { .. } => "connectivity_changed",
        }
    }

    /// Session the event belongs to, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ConversationEvent::SessionStarted { session_id, .. }
            | ConversationEvent::SessionResumed { session_id, .. }
            | ConversationEvent::SessionEnded { session_id, .. }
            | ConversationEvent::TurnAppended { session_id, .. }
            | ConversationEvent::ModeChanged { session_id, .. }
            | ConversationEvent::SpeechStarted { session_id, .. }
            | ConversationEvent::SpeechFinished { session_id, .. }
            | ConversationEvent::SpeechUnsupported { session_id, .. }
            | ConversationEvent::PersistenceFailed { session_id, .. } => Some(*session_id),
            ConversationEvent::SessionCleared { .. }
            | ConversationEvent::ConnectivityChanged { .. } => None,
        }
    }
}
