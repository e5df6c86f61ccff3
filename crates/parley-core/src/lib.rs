//! Shared domain types, configuration, errors and events for Parley.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use events::ConversationEvent;
pub use types::*;
