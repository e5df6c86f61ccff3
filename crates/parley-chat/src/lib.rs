//! Resilient conversation engine for Parley.
//!
//! Manages turn-taking with agent personalities, routes each turn to the
//! remote reasoning service or to local synthesis, and speaks agent turns,
//! staying usable while the network comes and goes.

pub mod classifier;
pub mod connection;
pub mod connectivity;
pub mod error;
pub mod personality;
pub mod remote;
pub mod session;
pub mod speech;
pub mod state;
pub mod synthesizer;

pub use classifier::classify;
pub use connection::{ConnectionManager, Reply, TurnRequest};
pub use connectivity::ConnectivityMonitor;
pub use error::ChatError;
pub use personality::{Personality, PersonalityCatalog, ResponseCategory, VoiceParams};
pub use remote::{HttpReasoningService, ReasoningService, RemoteTurnRequest, RemoteTurnResponse};
pub use session::{ConversationSession, SessionUpdate, SubmitOutcome, MAX_UTTERANCE_CHARS};
pub use speech::{
    CommandSpeechBackend, PlaybackEvent, SpeechBackend, SpeechOutcome, SpeechOutputDriver,
    SpeechRequest, SpeechTicket, VoiceInfo,
};
pub use state::ConversationState;
pub use synthesizer::{ResponseSynthesizer, Synthesis};
