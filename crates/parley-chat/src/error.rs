//! Error types for the conversation engine.

use parley_core::error::ParleyError;

use crate::state::ConversationState;

/// Errors from the conversation engine.
///
/// Remote-service and speech failures are absorbed by fallback inside the
/// engine; `Remote` and `Speech` only surface from the lower-level clients.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("unknown agent: {0}")]
    InvalidAgent(String),
    #[error("a turn is already in progress")]
    SessionBusy,
    #[error("no active session")]
    NoActiveSession,
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
    #[error("utterance exceeds maximum length of {0} characters")]
    UtteranceTooLong(usize),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: ConversationState,
        to: ConversationState,
    },
    #[error("local synthesis failed: {0}")]
    InternalSynthesis(String),
    #[error("malformed personality: {0}")]
    MalformedPersonality(String),
    #[error("remote service error: {0}")]
    Remote(String),
    #[error("speech error: {0}")]
    Speech(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Remote(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_chat_error_display() {
        let err = ChatError::InvalidAgent("pirate".to_string());
        assert_eq!(err.to_string(), "unknown agent: pirate");

        let err = ChatError::SessionBusy;
        assert_eq!(err.to_string(), "a turn is already in progress");

        let err = ChatError::NoActiveSession;
        assert_eq!(err.to_string(), "no active session");

        let err = ChatError::UtteranceTooLong(2000);
        assert_eq!(
            err.to_string(),
            "utterance exceeds maximum length of 2000 characters"
        );

        let err = ChatError::InvalidTransition {
            from: ConversationState::Idle,
            to: ConversationState::SpeakingResponse,
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition: Idle -> SpeakingResponse"
        );

        let err = ChatError::InternalSynthesis("no templates".to_string());
        assert_eq!(err.to_string(), "local synthesis failed: no templates");

        let err = ChatError::MalformedPersonality("empty id".to_string());
        assert_eq!(err.to_string(), "malformed personality: empty id");

        let err = ChatError::Remote("HTTP 503".to_string());
        assert_eq!(err.to_string(), "remote service error: HTTP 503");

        let err = ChatError::Speech("no voices".to_string());
        assert_eq!(err.to_string(), "speech error: no voices");

        let err = ChatError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "storage error: disk full");
    }

    #[test]
    fn test_session_not_found_preserves_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let err = ChatError::SessionNotFound(id);
        assert_eq!(
            err.to_string(),
            "session not found: 550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_chat_error_from_parley_error() {
        let err: ChatError = ParleyError::Storage("connection lost".to_string()).into();
        assert!(matches!(err, ChatError::Storage(_)));
        assert!(err.to_string().contains("connection lost"));

        let err: ChatError = ParleyError::Serialization("bad json".to_string()).into();
        assert!(matches!(err, ChatError::Storage(_)));
    }
}
