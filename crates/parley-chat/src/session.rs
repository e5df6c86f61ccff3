//! Per-session turn-taking.
//!
//! `ConversationSession` ties the personality catalog, connection manager,
//! speech driver and store together. It owns at most one active [`Session`]
//! and moves it through [`ConversationState`]. Every transition is published
//! as a [`SessionUpdate`] on a broadcast channel.
//!
//! The inner lock is never held across an await. A turn suspends while the
//! response is obtained, while the agent turn is persisted and while it is
//! spoken; after each suspension the session generation is re-checked so a
//! turn that outlived its session is dropped instead of appended.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::events::ConversationEvent;
use parley_core::types::{ConnectivityMode, Role, Session, SessionSummary, Turn};
use parley_storage::ConversationStore;

use crate::connection::{ConnectionManager, TurnRequest};
use crate::error::ChatError;
use crate::personality::{Personality, PersonalityCatalog};
use crate::speech::{SpeechOutcome, SpeechOutputDriver};
use crate::state::{ConversationState, StateMachine};

/// Longest accepted utterance, in characters.
pub const MAX_UTTERANCE_CHARS: usize = 2000;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Change notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub session_id: Option<Uuid>,
    pub agent_id: Option<String>,
    pub state: ConversationState,
    pub turns: Vec<Turn>,
    pub mode: ConnectivityMode,
    /// What caused this update. `None` for snapshots.
    pub event: Option<ConversationEvent>,
}

/// Result of `submit_utterance`.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Whitespace-only input. Nothing was recorded.
    Ignored,
    /// The agent answered and speech finished (or was unsupported).
    Completed {
        agent_turn: Turn,
        speech: SpeechOutcome,
    },
    /// The session ended or was replaced while the turn was in flight.
    Superseded,
}

struct Inner {
    machine: StateMachine,
    session: Option<Session>,
    personality: Option<Arc<Personality>>,
    /// Bumped whenever the active session changes.
    generation: u64,
}

impl Inner {
    fn update(&self, event: Option<ConversationEvent>) -> SessionUpdate {
        SessionUpdate {
            session_id: self.session.as_ref().map(|s| s.id),
            agent_id: self.session.as_ref().map(|s| s.agent_id.clone()),
            state: self.machine.current(),
            turns: self
                .session
                .as_ref()
                .map(|s| s.turns().to_vec())
                .unwrap_or_default(),
            mode: self
                .session
                .as_ref()
                .map(|s| s.mode)
                .unwrap_or_default(),
            event,
        }
    }

    fn is_current(&self, generation: u64, expected: ConversationState) -> bool {
        self.generation == generation && self.machine.current() == expected
    }
}

/// The conversation engine's state machine.
pub struct ConversationSession {
    catalog: Arc<PersonalityCatalog>,
    connection: Arc<ConnectionManager>,
    speech: Arc<SpeechOutputDriver>,
    store: ConversationStore,
    inner: Mutex<Inner>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl ConversationSession {
    pub fn new(
        catalog: Arc<PersonalityCatalog>,
        connection: Arc<ConnectionManager>,
        speech: Arc<SpeechOutputDriver>,
        store: ConversationStore,
    ) -> Self {
        let (updates, _rx) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            catalog,
            connection,
            speech,
            store,
            inner: Mutex::new(Inner {
                machine: StateMachine::new(),
                session: None,
                personality: None,
                generation: 0,
            }),
            updates,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, ChatError> {
        self.inner
            .lock()
            .map_err(|e| ChatError::Storage(format!("session lock poisoned: {}", e)))
    }

    fn publish(&self, update: SessionUpdate) {
        if let Some(event) = &update.event {
            debug!(event = event.event_name(), state = %update.state, "Session update");
        }
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    pub fn catalog(&self) -> &PersonalityCatalog {
        &self.catalog
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Receive one `SessionUpdate` per transition.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Current state, turns and mode.
    pub fn snapshot(&self) -> Result<SessionUpdate, ChatError> {
        Ok(self.lock()?.update(None))
    }

    pub fn state(&self) -> Result<ConversationState, ChatError> {
        Ok(self.lock()?.machine.current())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a fresh session with `agent_id`. Valid only when idle.
    pub async fn start(&self, agent_id: &str) -> Result<Uuid, ChatError> {
        let personality = self.catalog.get(agent_id)?;

        let mut session = Session::new(agent_id);
        session.mode = self.connection.preferred_mode();
        let session_id = session.id;

        let update = {
            let mut inner = self.lock()?;
            inner.machine.transition(ConversationState::AwaitingUserTurn)?;
            inner.session = Some(session);
            inner.personality = Some(personality);
            inner.generation += 1;
            inner.update(Some(ConversationEvent::SessionStarted {
                session_id,
                agent_id: agent_id.to_string(),
                timestamp: Utc::now(),
            }))
        };

        info!(session_id = %session_id, agent = %agent_id, "Session started");
        self.publish(update);
        Ok(session_id)
    }

    /// Continue a persisted session. Valid only when idle.
    pub async fn resume(&self, session_id: Uuid) -> Result<(), ChatError> {
        {
            let inner = self.lock()?;
            let current = inner.machine.current();
            if current != ConversationState::Idle {
                return Err(ChatError::InvalidTransition {
                    from: current,
                    to: ConversationState::AwaitingUserTurn,
                });
            }
        }

        let session = self
            .store
            .load(session_id)
            .await?
            .ok_or(ChatError::SessionNotFound(session_id))?;
        let personality = self.catalog.get(&session.agent_id)?;
        let agent_id = session.agent_id.clone();
        let turn_count = session.turns().len();

        let update = {
            let mut inner = self.lock()?;
            inner.machine.transition(ConversationState::AwaitingUserTurn)?;
            inner.session = Some(session);
            inner.personality = Some(personality);
            inner.generation += 1;
            inner.update(Some(ConversationEvent::SessionResumed {
                session_id,
                agent_id: agent_id.clone(),
                turn_count,
                timestamp: Utc::now(),
            }))
        };

        info!(session_id = %session_id, agent = %agent_id, turns = turn_count, "Session resumed");
        self.publish(update);
        Ok(())
    }

    /// End the active session: stop speech, persist, return to idle.
    ///
    /// Any turn still in flight is discarded. Sessions without turns are
    /// not persisted.
    pub async fn end(&self) -> Result<(), ChatError> {
        let (session, update) = {
            let mut inner = self.lock()?;
            if !inner.machine.current().is_active() {
                return Err(ChatError::NoActiveSession);
            }
            inner.machine.transition(ConversationState::Ended)?;
            inner.generation += 1;
            let session = inner.session.take().ok_or(ChatError::NoActiveSession)?;
            inner.personality = None;
            let update = SessionUpdate {
                session_id: Some(session.id),
                agent_id: Some(session.agent_id.clone()),
                state: ConversationState::Ended,
                turns: session.turns().to_vec(),
                mode: session.mode,
                event: Some(ConversationEvent::SessionEnded {
                    session_id: session.id,
                    turn_count: session.turns().len(),
                    timestamp: Utc::now(),
                }),
            };
            (session, update)
        };
        self.publish(update);

        self.speech.stop().await;
        if !session.turns().is_empty() {
            self.persist(&session).await;
        }

        let update = {
            let mut inner = self.lock()?;
            inner.machine.transition(ConversationState::Idle)?;
            inner.update(Some(ConversationEvent::SessionCleared {
                timestamp: Utc::now(),
            }))
        };
        info!(session_id = %session.id, turns = session.turns().len(), "Session ended");
        self.publish(update);
        Ok(())
    }

    /// End the active session and start a new one with `agent_id`.
    ///
    /// The new id is checked first; an unknown agent leaves the current
    /// session untouched.
    pub async fn switch_agent(&self, agent_id: &str) -> Result<Uuid, ChatError> {
        self.catalog.get(agent_id)?;
        self.end().await?;
        self.start(agent_id).await
    }

    /// Persisted sessions, most recent first.
    pub async fn recent_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        Ok(self.store.list_recent().await?)
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Record a user utterance, obtain and record the agent's answer, and
    /// speak it.
    ///
    /// Valid only in `AwaitingUserTurn`: idle fails with `NoActiveSession`,
    /// a turn in flight with `SessionBusy`. Whitespace-only text is ignored.
    pub async fn submit_utterance(
        &self,
        text: &str,
        confidence: Option<f32>,
    ) -> Result<SubmitOutcome, ChatError> {
        // ---- Record the user turn ----
        let (generation, session_id, utterance, history, personality, update) = {
            let mut inner = self.lock()?;
            let state = inner.machine.current();
            if state.is_busy() {
                return Err(ChatError::SessionBusy);
            }
            if state != ConversationState::AwaitingUserTurn {
                return Err(ChatError::NoActiveSession);
            }

            let utterance = text.trim();
            if utterance.is_empty() {
                return Ok(SubmitOutcome::Ignored);
            }
            if utterance.chars().count() > MAX_UTTERANCE_CHARS {
                return Err(ChatError::UtteranceTooLong(MAX_UTTERANCE_CHARS));
            }

            let personality = inner.personality.clone().ok_or(ChatError::NoActiveSession)?;
            let generation = inner.generation;
            inner.machine.transition(ConversationState::ProcessingTurn)?;

            let session = inner.session.as_mut().ok_or(ChatError::NoActiveSession)?;
            let history = session.turns().to_vec();
            let turn = Turn::user(utterance, confidence);
            let turn_id = turn.id;
            session.push_turn(turn);
            let session_id = session.id;

            let update = inner.update(Some(ConversationEvent::TurnAppended {
                session_id,
                turn_id,
                role: Role::User,
                timestamp: Utc::now(),
            }));
            (
                generation,
                session_id,
                utterance.to_string(),
                history,
                personality,
                update,
            )
        };
        self.publish(update);

        // ---- Obtain the agent turn ----
        let reply = self
            .connection
            .send(TurnRequest {
                session_id,
                utterance: &utterance,
                history: &history,
                personality: &personality,
            })
            .await;

        let (agent_turn, snapshot, updates) = {
            let mut inner = self.lock()?;
            if !inner.is_current(generation, ConversationState::ProcessingTurn) {
                debug!(session_id = %session_id, "Discarding response for a closed session");
                return Ok(SubmitOutcome::Superseded);
            }

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    inner.machine.transition(ConversationState::AwaitingUserTurn)?;
                    let update = inner.update(None);
                    drop(inner);
                    self.publish(update);
                    return Err(e);
                }
            };

            let mut updates = Vec::with_capacity(2);
            let session = inner.session.as_mut().ok_or(ChatError::NoActiveSession)?;
            let previous_mode = session.mode;
            session.mode = reply.mode;
            session.push_turn(reply.turn.clone());
            let snapshot = session.clone();
            inner.machine.transition(ConversationState::SpeakingResponse)?;

            if previous_mode != reply.mode {
                info!(session_id = %session_id, from = %previous_mode, to = %reply.mode, "Connectivity mode changed");
                updates.push(inner.update(Some(ConversationEvent::ModeChanged {
                    session_id,
                    from: previous_mode,
                    to: reply.mode,
                    timestamp: Utc::now(),
                })));
            }
            updates.push(inner.update(Some(ConversationEvent::TurnAppended {
                session_id,
                turn_id: reply.turn.id,
                role: Role::Agent,
                timestamp: Utc::now(),
            })));
            (reply.turn, snapshot, updates)
        };
        for update in updates {
            self.publish(update);
        }

        // ---- Persist ----
        self.persist(&snapshot).await;

        // ---- Speak ----
        // The ticket is taken under the lock, so an `end` that runs after this
        // check cancels the speech even before playback starts.
        let (ticket, update) = {
            let inner = self.lock()?;
            if !inner.is_current(generation, ConversationState::SpeakingResponse) {
                return Ok(SubmitOutcome::Superseded);
            }
            let ticket = self.speech.ticket();
            let update = inner.update(Some(ConversationEvent::SpeechStarted {
                session_id,
                turn_id: agent_turn.id,
                timestamp: Utc::now(),
            }));
            (ticket, update)
        };
        self.publish(update);

        let speech = self
            .speech
            .speak_with_ticket(&agent_turn.text, &personality, ticket)
            .await;

        let update = {
            let mut inner = self.lock()?;
            if !inner.is_current(generation, ConversationState::SpeakingResponse) {
                debug!(session_id = %session_id, "Session closed during speech");
                return Ok(SubmitOutcome::Superseded);
            }
            inner.machine.transition(ConversationState::AwaitingUserTurn)?;
            let event = match speech {
                SpeechOutcome::Unsupported => ConversationEvent::SpeechUnsupported {
                    session_id,
                    turn_id: agent_turn.id,
                    timestamp: Utc::now(),
                },
                ref outcome => ConversationEvent::SpeechFinished {
                    session_id,
                    turn_id: agent_turn.id,
                    spoken: outcome.was_spoken(),
                    timestamp: Utc::now(),
                },
            };
            inner.update(Some(event))
        };
        self.publish(update);

        Ok(SubmitOutcome::Completed { agent_turn, speech })
    }

    /// Save a session; failures are logged and published, never returned.
    async fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save(session).await {
            warn!(session_id = %session.id, error = %e, "Failed to persist session; continuing in memory");
            let update = match self.lock() {
                Ok(inner) => {
                    let mut update = inner.update(None);
                    update.event = Some(ConversationEvent::PersistenceFailed {
                        session_id: session.id,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    update
                }
                Err(_) => return,
            };
            self.publish(update);
        }
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Forward connectivity changes onto the update stream until the
    /// session is dropped.
    pub fn watch_connectivity(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let mut rx = self.connection.monitor().subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                let Some(this) = weak.upgrade() else {
                    break;
                };
                let update = match this.lock() {
                    Ok(inner) => inner.update(Some(ConversationEvent::ConnectivityChanged {
                        state,
                        timestamp: Utc::now(),
                    })),
                    Err(_) => break,
                };
                this.publish(update);
            }
        })
    }
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("connection", &self.connection)
            .field("speech", &self.speech)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::synthesizer::ResponseSynthesizer;
    use parley_storage::MemoryStore;

    fn engine() -> ConversationSession {
        let connection = ConnectionManager::local(
            Arc::new(ResponseSynthesizer::with_seed(3)),
            ConnectivityMonitor::default(),
        );
        ConversationSession::new(
            Arc::new(PersonalityCatalog::builtin()),
            Arc::new(connection),
            Arc::new(SpeechOutputDriver::disabled()),
            ConversationStore::new(Arc::new(MemoryStore::new())),
        )
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let engine = engine();
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.state, ConversationState::Idle);
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.turns.is_empty());
    }

    #[tokio::test]
    async fn test_start_unknown_agent() {
        let engine = engine();
        let err = engine.start("pirate").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidAgent(_)));
        assert_eq!(engine.state().unwrap(), ConversationState::Idle);
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_transition() {
        let engine = engine();
        engine.start("friendly-tutor").await.unwrap();
        let err = engine.start("business-coach").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_local_session_starts_in_local_mode() {
        let engine = engine();
        engine.start("friendly-tutor").await.unwrap();
        assert_eq!(engine.snapshot().unwrap().mode, ConnectivityMode::Local);
    }

    #[tokio::test]
    async fn test_submit_records_user_and_agent_turns() {
        let engine = engine();
        engine.start("friendly-tutor").await.unwrap();

        let outcome = engine
            .submit_utterance("  Hello, how are you?  ", Some(0.9))
            .await
            .unwrap();
        let SubmitOutcome::Completed { agent_turn, speech } = outcome else {
            panic!("expected a completed turn");
        };
        assert_eq!(speech, SpeechOutcome::Unsupported);
        assert!(agent_turn.feedback.is_some());

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.state, ConversationState::AwaitingUserTurn);
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.turns[0].role, Role::User);
        assert_eq!(snapshot.turns[0].text, "Hello, how are you?");
        assert_eq!(snapshot.turns[0].confidence, Some(0.9));
        assert_eq!(snapshot.turns[1], agent_turn);
    }

    #[tokio::test]
    async fn test_submit_without_session() {
        let engine = engine();
        let err = engine.submit_utterance("hi", None).await.unwrap_err();
        assert!(matches!(err, ChatError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_utterance_too_long() {
        let engine = engine();
        engine.start("friendly-tutor").await.unwrap();
        let text = "a".repeat(MAX_UTTERANCE_CHARS + 1);
        let err = engine.submit_utterance(&text, None).await.unwrap_err();
        assert!(matches!(err, ChatError::UtteranceTooLong(MAX_UTTERANCE_CHARS)));
        assert!(engine.snapshot().unwrap().turns.is_empty());

        let text = "a".repeat(MAX_UTTERANCE_CHARS);
        assert!(matches!(
            engine.submit_utterance(&text, None).await.unwrap(),
            SubmitOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_end_persists_and_returns_to_idle() {
        let engine = engine();
        let id = engine.start("travel-guide").await.unwrap();
        engine.submit_utterance("Where is the station?", None).await.unwrap();
        engine.end().await.unwrap();

        assert_eq!(engine.state().unwrap(), ConversationState::Idle);
        let recent = engine.recent_sessions().await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, id);
        assert_eq!(recent[0].turn_count, 2);

        let err = engine.end().await.unwrap_err();
        assert!(matches!(err, ChatError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_empty_session_is_not_persisted() {
        let engine = engine();
        engine.start("friendly-tutor").await.unwrap();
        engine.end().await.unwrap();
        assert!(engine.recent_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_continues_persisted_session() {
        let engine = engine();
        let id = engine.start("grammar-expert").await.unwrap();
        engine.submit_utterance("Teach me verb tenses", None).await.unwrap();
        engine.end().await.unwrap();

        engine.resume(id).await.unwrap();
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.session_id, Some(id));
        assert_eq!(snapshot.agent_id.as_deref(), Some("grammar-expert"));
        assert_eq!(snapshot.state, ConversationState::AwaitingUserTurn);
        assert_eq!(snapshot.turns.len(), 2);

        engine.submit_utterance("And plurals?", None).await.unwrap();
        assert_eq!(engine.snapshot().unwrap().turns.len(), 4);
    }

    #[tokio::test]
    async fn test_resume_unknown_session() {
        let engine = engine();
        let id = Uuid::new_v4();
        let err = engine.resume(id).await.unwrap_err();
        assert!(matches!(err, ChatError::SessionNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_update_stream_carries_events() {
        let engine = engine();
        let mut rx = engine.subscribe();
        engine.start("friendly-tutor").await.unwrap();
        engine.submit_utterance("Hello", None).await.unwrap();

        let mut names = Vec::new();
        while let Ok(update) = rx.try_recv() {
            names.push(update.event.map(|e| e.event_name()).unwrap_or("none"));
        }
        assert_eq!(
            names,
            vec![
                "session_started",
                "turn_appended",
                "turn_appended",
                "speech_started",
                "speech_unsupported",
            ]
        );
    }
}
