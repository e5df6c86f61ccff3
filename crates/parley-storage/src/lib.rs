//! Parley storage crate - durable client-side key-value store and the
//! conversation store built on top of it.
//!
//! Provides a WAL-mode SQLite key-value table with migrations, an in-memory
//! store for tests and ephemeral runs, and `ConversationStore`, which owns the
//! `conversation-<sessionId>` key namespace.

pub mod conversation_store;
pub mod db;
pub mod kv;
pub mod migrations;

pub use conversation_store::{
    session_key, ConversationStore, DEFAULT_RECENT_LIMIT, SESSION_KEY_PREFIX,
};
pub use db::Database;
pub use kv::{KeyValueStore, MemoryStore, SqliteStore};
