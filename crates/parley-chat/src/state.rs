//! Conversation state machine.
//!
//! Valid transitions:
//! - Idle -> AwaitingUserTurn (start or resume a session)
//! - AwaitingUserTurn -> ProcessingTurn (utterance submitted)
//! - ProcessingTurn -> SpeakingResponse (agent turn appended)
//! - SpeakingResponse -> AwaitingUserTurn (speech finished or unsupported)
//! - ProcessingTurn -> AwaitingUserTurn (no response could be produced)
//! - AwaitingUserTurn | ProcessingTurn | SpeakingResponse -> Ended (end, switch agent)
//! - Ended -> Idle

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Turn-taking state of a [`ConversationSession`](crate::session::ConversationSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No session.
    Idle,
    /// A session is active and waiting for the user.
    AwaitingUserTurn,
    /// A user turn was recorded and a response is being obtained.
    ProcessingTurn,
    /// The agent turn is being spoken.
    SpeakingResponse,
    /// The session was persisted and closed; about to become idle.
    Ended,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationState::Idle => write!(f, "Idle"),
            ConversationState::AwaitingUserTurn => write!(f, "AwaitingUserTurn"),
            ConversationState::ProcessingTurn => write!(f, "ProcessingTurn"),
            ConversationState::SpeakingResponse => write!(f, "SpeakingResponse"),
            ConversationState::Ended => write!(f, "Ended"),
        }
    }
}

impl ConversationState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &ConversationState) -> bool {
        use ConversationState::*;
        matches!(
            (self, target),
            (Idle, AwaitingUserTurn)
                | (AwaitingUserTurn, ProcessingTurn)
                | (ProcessingTurn, SpeakingResponse)
                | (SpeakingResponse, AwaitingUserTurn)
                // Recovery when synthesis fails
                | (ProcessingTurn, AwaitingUserTurn)
                | (AwaitingUserTurn, Ended)
                | (ProcessingTurn, Ended)
                | (SpeakingResponse, Ended)
                | (Ended, Idle)
        )
    }

    /// Whether a turn is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConversationState::ProcessingTurn | ConversationState::SpeakingResponse
        )
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        !matches!(self, ConversationState::Idle | ConversationState::Ended)
    }
}

/// Validated state holder.
///
/// Lives inside the session's lock together with the session it describes, so
/// state and turn log always change together.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ConversationState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine initialized to `Idle`.
    pub fn new() -> Self {
        Self {
            state: ConversationState::Idle,
        }
    }

    pub fn current(&self) -> ConversationState {
        self.state
    }

    /// Attempt to transition to the target state.
    pub fn transition(&mut self, target: ConversationState) -> Result<(), ChatError> {
        if self.state.can_transition_to(&target) {
            tracing::debug!("Conversation state: {} -> {}", self.state, target);
            self.state = target;
            Ok(())
        } else {
            Err(ChatError::InvalidTransition {
                from: self.state,
                to: target,
            })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
