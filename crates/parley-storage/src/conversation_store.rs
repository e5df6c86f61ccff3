//! Session persistence on top of a [`KeyValueStore`].
//!
//! Each session is stored as one JSON document under
//! `conversation-<session id>`. The store owns that key namespace.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use parley_core::error::ParleyError;
use parley_core::types::{Session, SessionSummary};

use crate::kv::KeyValueStore;

/// Key prefix for persisted sessions.
pub const SESSION_KEY_PREFIX: &str = "conversation-";

/// Default number of summaries returned by [`ConversationStore::list_recent`].
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// Storage key for a session id.
pub fn session_key(id: Uuid) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, id)
}

/// Saves, loads and lists conversation sessions.
///
/// Concurrent writers to the same session id are last-write-wins.
#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KeyValueStore>,
    recent_limit: usize,
}

impl ConversationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }

    /// Cap the number of summaries returned by `list_recent`.
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Persist the whole session, replacing any earlier copy.
    pub async fn save(&self, session: &Session) -> Result<(), ParleyError> {
        let json = serde_json::to_string(session)?;
        self.kv.set(&session_key(session.id), &json).await?;
        debug!(
            session_id = %session.id,
            turns = session.turns().len(),
            "Session saved"
        );
        Ok(())
    }

    /// Load a session by id. Returns `None` if nothing is stored under it.
    pub async fn load(&self, id: Uuid) -> Result<Option<Session>, ParleyError> {
        match self.kv.get(&session_key(id)).await? {
            Some(json) => {
                let session: Session = serde_json::from_str(&json)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Remove a persisted session. Returns whether it existed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, ParleyError> {
        let removed = self.kv.remove(&session_key(id)).await?;
        if removed {
            debug!(session_id = %id, "Session deleted");
        }
        Ok(removed)
    }

    /// Summaries of persisted sessions, most recently active first.
    ///
    /// Entries that no longer deserialize are skipped with a warning.
    pub async fn list_recent(&self) -> Result<Vec<SessionSummary>, ParleyError> {
        let keys = self.kv.keys_with_prefix(SESSION_KEY_PREFIX).await?;
        let mut summaries = Vec::with_capacity(keys.len());

        for key in keys {
            let Some(json) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<Session>(&json) {
                Ok(session) => summaries.push(session.summary()),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable session entry"),
            }
        }

        summaries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        summaries.truncate(self.recent_limit);
        Ok(summaries)
    }
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("recent_limit", &self.recent_limit)
            .finish()
    }
}
