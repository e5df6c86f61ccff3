//! Speech output for agent turns.
//!
//! `SpeechOutputDriver` speaks one text at a time through a `SpeechBackend`.
//! Completion is taken from the backend's playback events (end or error),
//! never from a timer. Starting new speech cancels the old one, and `stop`
//! is safe to call at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::personality::{Personality, VoiceParams};

// =============================================================================
// Backend seam
// =============================================================================

/// Playback event reported by a speech backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started,
    Ended,
    Error(String),
}

/// A voice the backend can speak with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    /// BCP-47 language tag, e.g. `en-GB`.
    pub language: String,
}

/// What the backend is asked to speak.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    /// Selected voice name, or `None` for the platform default.
    pub voice: Option<String>,
    pub pitch: f32,
    pub rate: f32,
    pub language: String,
}

/// Platform or remote speech facility.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Whether speech can be produced at all.
    fn is_supported(&self) -> bool;

    async fn voices(&self) -> Vec<VoiceInfo>;

    /// Begin speaking. Events arrive on the returned channel until `Ended`
    /// or `Error`.
    async fn start(&self, request: SpeechRequest) -> Result<mpsc::Receiver<PlaybackEvent>, ChatError>;

    /// Stop whatever is playing. Must be a no-op when idle.
    async fn cancel(&self);
}

/// How a `speak` call finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    Completed,
    Failed(String),
    Cancelled,
    Unsupported,
}

impl SpeechOutcome {
    pub fn was_spoken(&self) -> bool {
        matches!(self, SpeechOutcome::Completed)
    }
}

// =============================================================================
// Voice selection
// =============================================================================

fn language_matches(voice_language: &str, wanted: &str) -> bool {
    let voice_language = voice_language.to_ascii_lowercase();
    let wanted = wanted.to_ascii_lowercase();
    voice_language == wanted
        || voice_language
            .split(['-', '_'])
            .next()
            .is_some_and(|primary| primary == wanted)
}

/// Pick a voice: the first preference matching a voice name or language,
/// else any voice for `language` (exact tag first, then primary subtag),
/// else `None` for the platform default.
pub fn select_voice(voices: &[VoiceInfo], preferences: &[String], language: &str) -> Option<String> {
    for preference in preferences {
        if let Some(voice) = voices.iter().find(|v| {
            v.name.eq_ignore_ascii_case(preference) || language_matches(&v.language, preference)
        }) {
            return Some(voice.name.clone());
        }
    }

    if let Some(voice) = voices
        .iter()
        .find(|v| v.language.eq_ignore_ascii_case(language))
    {
        return Some(voice.name.clone());
    }

    let primary = language.split(['-', '_']).next().unwrap_or(language);
    voices
        .iter()
        .find(|v| language_matches(&v.language, primary))
        .map(|v| v.name.clone())
}

// =============================================================================
// SpeechOutputDriver
// =============================================================================

/// Stop count observed when speech was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechTicket(u64);

struct ActivePlayback {
    id: u64,
    cancel: oneshot::Sender<()>,
}

/// Speaks agent turns and reports how playback finished.
pub struct SpeechOutputDriver {
    backend: Option<Arc<dyn SpeechBackend>>,
    language: String,
    active: Mutex<Option<ActivePlayback>>,
    next_id: AtomicU64,
    /// Incremented by every `stop`.
    stops: AtomicU64,
}

impl SpeechOutputDriver {
    pub fn new(backend: Arc<dyn SpeechBackend>, language: impl Into<String>) -> Self {
        Self {
            backend: Some(backend),
            language: language.into(),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            stops: AtomicU64::new(0),
        }
    }

    /// Driver without any speech facility. Every `speak` is `Unsupported`.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            language: "en-US".to_string(),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            stops: AtomicU64::new(0),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_supported())
    }

    pub fn is_speaking(&self) -> bool {
        self.lock_active().is_some()
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActivePlayback>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ticket for a later `speak_with_ticket`. Any `stop` after this call
    /// cancels speech started with it.
    pub fn ticket(&self) -> SpeechTicket {
        SpeechTicket(self.stops.load(Ordering::SeqCst))
    }

    /// Speak `text` with the personality's voice. Resolves when playback
    /// ends, fails, is cancelled, or immediately when unsupported.
    pub async fn speak(&self, text: &str, personality: &Personality) -> SpeechOutcome {
        self.speak_with_ticket(text, personality, self.ticket()).await
    }

    /// Like `speak`, but cancelled if `stop` was called since `ticket` was
    /// taken, even when that `stop` found nothing playing.
    pub async fn speak_with_ticket(
        &self,
        text: &str,
        personality: &Personality,
        ticket: SpeechTicket,
    ) -> SpeechOutcome {
        self.cancel_active().await;
        let stops = ticket.0;
        if self.stops.load(Ordering::SeqCst) != stops {
            debug!(agent = %personality.id, "Speech stopped before it started");
            return SpeechOutcome::Cancelled;
        }

        if text.trim().is_empty() {
            return SpeechOutcome::Completed;
        }

        let backend = match &self.backend {
            Some(backend) if backend.is_supported() => backend.clone(),
            _ => {
                info!(agent = %personality.id, "Speech output unsupported; turn shown as text only");
                return SpeechOutcome::Unsupported;
            }
        };

        let request = self.build_request(backend.as_ref(), text, &personality.voice).await;
        debug!(agent = %personality.id, voice = ?request.voice, "Starting speech");

        let mut events = match backend.start(request).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Speech backend failed to start");
                return SpeechOutcome::Failed(e.to_string());
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.lock_active() = Some(ActivePlayback {
            id,
            cancel: cancel_tx,
        });

        // A stop that arrived while the backend was starting.
        if self.stops.load(Ordering::SeqCst) != stops {
            self.release(id);
            backend.cancel().await;
            return SpeechOutcome::Cancelled;
        }

        let outcome = loop {
            tokio::select! {
                _ = &mut cancel_rx => break SpeechOutcome::Cancelled,
                event = events.recv() => match event {
                    Some(PlaybackEvent::Started) => debug!("Playback started"),
                    Some(PlaybackEvent::Ended) => break SpeechOutcome::Completed,
                    Some(PlaybackEvent::Error(e)) => break SpeechOutcome::Failed(e),
                    None => break SpeechOutcome::Failed("playback stream closed".to_string()),
                },
            }
        };

        self.release(id);

        if let SpeechOutcome::Failed(reason) = &outcome {
            warn!(reason = %reason, "Speech playback failed");
        }
        outcome
    }

    fn release(&self, id: u64) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    /// Cancel in-flight speech and invalidate outstanding tickets. Safe to
    /// call when nothing is playing.
    pub async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.cancel_active().await;
    }

    async fn cancel_active(&self) {
        let active = self.lock_active().take();
        if let Some(active) = active {
            debug!("Stopping speech");
            let _ = active.cancel.send(());
            if let Some(backend) = &self.backend {
                backend.cancel().await;
            }
        }
    }

    async fn build_request(
        &self,
        backend: &dyn SpeechBackend,
        text: &str,
        voice: &VoiceParams,
    ) -> SpeechRequest {
        let voices = backend.voices().await;
        SpeechRequest {
            text: text.to_string(),
            voice: select_voice(&voices, &voice.preferences, &self.language),
            pitch: voice.pitch,
            rate: voice.rate,
            language: self.language.clone(),
        }
    }
}

impl std::fmt::Debug for SpeechOutputDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechOutputDriver")
            .field("supported", &self.is_supported())
            .field("language", &self.language)
            .finish()
    }
}

// =============================================================================
// CommandSpeechBackend
// =============================================================================

/// Speaks by running an external text-to-speech program such as `espeak-ng`.
///
/// The program is invoked as `<program> [-v voice] -p <pitch> -s <wpm> <text>`.
/// Playback ends when the process exits.
pub struct CommandSpeechBackend {
    program: String,
    voices: Vec<VoiceInfo>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl CommandSpeechBackend {
    pub fn new(program: impl Into<String>, voices: Vec<VoiceInfo>) -> Self {
        Self {
            program: program.into(),
            voices,
            kill: Mutex::new(None),
        }
    }

    fn command(&self, request: &SpeechRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(voice) = &request.voice {
            cmd.arg("-v").arg(voice);
        }
        // espeak-ng: pitch 0-99 (50 normal), speed in words per minute (175 normal).
        let pitch = (request.pitch * 50.0).round().clamp(0.0, 99.0) as u32;
        let wpm = (request.rate * 175.0).round().clamp(80.0, 450.0) as u32;
        cmd.arg("-p")
            .arg(pitch.to_string())
            .arg("-s")
            .arg(wpm.to_string())
            .arg(&request.text)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SpeechBackend for CommandSpeechBackend {
    fn is_supported(&self) -> bool {
        !self.program.trim().is_empty()
    }

    async fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }

    async fn start(&self, request: SpeechRequest) -> Result<mpsc::Receiver<PlaybackEvent>, ChatError> {
        let mut child = self
            .command(&request)
            .spawn()
            .map_err(|e| ChatError::Speech(format!("failed to run {}: {}", self.program, e)))?;

        let (tx, rx) = mpsc::channel(4);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        *self.kill.lock().unwrap_or_else(PoisonError::into_inner) = Some(kill_tx);

        tokio::spawn(async move {
            let _ = tx.send(PlaybackEvent::Started).await;
            tokio::select! {
                status = child.wait() => {
                    let event = match status {
                        Ok(status) if status.success() => PlaybackEvent::Ended,
                        Ok(status) => PlaybackEvent::Error(format!("speech program exited with {}", status)),
                        Err(e) => PlaybackEvent::Error(e.to_string()),
                    };
                    let _ = tx.send(event).await;
                }
                _ = kill_rx => {
                    let _ = child.kill().await;
                }
            }
        });

        Ok(rx)
    }

    async fn cancel(&self) {
        let kill = self.kill.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(kill) = kill {
            let _ = kill.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personality::PersonalityCatalog;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Backend whose playback is driven by the test.
    struct ScriptedBackend {
        supported: bool,
        voices: Vec<VoiceInfo>,
        script: Vec<PlaybackEvent>,
        hold_open: bool,
        starts: AtomicUsize,
        cancels: AtomicUsize,
        last_request: Mutex<Option<SpeechRequest>>,
        senders: Mutex<Vec<mpsc::Sender<PlaybackEvent>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<PlaybackEvent>, hold_open: bool) -> Arc<Self> {
            Arc::new(Self {
                supported: true,
                voices: vec![
                    VoiceInfo {
                        name: "Samantha".into(),
                        language: "en-US".into(),
                    },
                    VoiceInfo {
                        name: "Amelie".into(),
                        language: "fr-CA".into(),
                    },
                ],
                script,
                hold_open,
                starts: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                last_request: Mutex::new(None),
                senders: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SpeechBackend for ScriptedBackend {
        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn voices(&self) -> Vec<VoiceInfo> {
            self.voices.clone()
        }

        async fn start(
            &self,
            request: SpeechRequest,
        ) -> Result<mpsc::Receiver<PlaybackEvent>, ChatError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request);
            let (tx, rx) = mpsc::channel(8);
            for event in &self.script {
                tx.send(event.clone()).await.unwrap();
            }
            if self.hold_open {
                self.senders.lock().unwrap().push(tx);
            }
            Ok(rx)
        }

        async fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tutor() -> Arc<Personality> {
        PersonalityCatalog::builtin().get("friendly-tutor").unwrap()
    }

    #[tokio::test]
    async fn test_unsupported_resolves() {
        let driver = SpeechOutputDriver::disabled();
        assert!(!driver.is_supported());
        assert_eq!(
            driver.speak("Hello!", &tutor()).await,
            SpeechOutcome::Unsupported
        );
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let backend = ScriptedBackend::new(vec![], false);
        let driver = SpeechOutputDriver::new(backend.clone(), "en-US");
        driver.stop().await;
        driver.stop().await;
        assert_eq!(backend.cancels.load(Ordering::SeqCst), 0);
        SpeechOutputDriver::disabled().stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_speak_cancels_ticket() {
        let backend = ScriptedBackend::new(vec![PlaybackEvent::Started, PlaybackEvent::Ended], false);
        let driver = SpeechOutputDriver::new(backend.clone(), "en-US");

        let stale = driver.ticket();
        driver.stop().await;
        assert_eq!(
            driver.speak_with_ticket("Too late", &tutor(), stale).await,
            SpeechOutcome::Cancelled
        );
        assert_eq!(backend.starts.load(Ordering::SeqCst), 0);

        // A ticket taken after the stop is unaffected.
        let fresh = driver.ticket();
        assert_ne!(fresh, stale);
        assert_eq!(
            driver.speak_with_ticket("Hello", &tutor(), fresh).await,
            SpeechOutcome::Completed
        );
        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_text_completes_without_backend() {
        let backend = ScriptedBackend::new(vec![], false);
        let driver = SpeechOutputDriver::new(backend.clone(), "en-US");
        assert_eq!(driver.speak("   ", &tutor()).await, SpeechOutcome::Completed);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completion_comes_from_end_event() {
        let backend = ScriptedBackend::new(vec![PlaybackEvent::Started, PlaybackEvent::Ended], false);
        let driver = SpeechOutputDriver::new(backend.clone(), "en-US");
        let outcome = driver.speak("Hello there!", &tutor()).await;
        assert_eq!(outcome, SpeechOutcome::Completed);
        assert!(outcome.was_spoken());
        assert!(!driver.is_speaking());

        let request = backend.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.text, "Hello there!");
        assert_eq!(request.voice.as_deref(), Some("Samantha"));
        assert_eq!(request.pitch, tutor().voice.pitch);
    }

    #[tokio::test]
    async fn test_error_event_fails() {
        let backend = ScriptedBackend::new(
            vec![PlaybackEvent::Started, PlaybackEvent::Error("audio device lost".into())],
            false,
        );
        let driver = SpeechOutputDriver::new(backend, "en-US");
        assert_eq!(
            driver.speak("Hello", &tutor()).await,
            SpeechOutcome::Failed("audio device lost".into())
        );
    }

    #[tokio::test]
    async fn test_closed_stream_fails() {
        let backend = ScriptedBackend::new(vec![PlaybackEvent::Started], false);
        let driver = SpeechOutputDriver::new(backend, "en-US");
        assert!(matches!(
            driver.speak("Hello", &tutor()).await,
            SpeechOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_speech() {
        let backend = ScriptedBackend::new(vec![PlaybackEvent::Started], true);
        let driver = Arc::new(SpeechOutputDriver::new(backend.clone(), "en-US"));

        let speaking = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.speak("A long answer", &tutor()).await })
        };
        while !driver.is_speaking() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        driver.stop().await;
        assert_eq!(speaking.await.unwrap(), SpeechOutcome::Cancelled);
        assert_eq!(backend.cancels.load(Ordering::SeqCst), 1);
        assert!(!driver.is_speaking());
    }

    #[tokio::test]
    async fn test_new_speech_cancels_previous() {
        let backend = ScriptedBackend::new(vec![PlaybackEvent::Started], true);
        let driver = Arc::new(SpeechOutputDriver::new(backend.clone(), "en-US"));

        let first = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.speak("first", &tutor()).await })
        };
        while !driver.is_speaking() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let second = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.speak("second", &tutor()).await })
        };
        assert_eq!(first.await.unwrap(), SpeechOutcome::Cancelled);

        while !driver.is_speaking() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        driver.stop().await;
        assert_eq!(second.await.unwrap(), SpeechOutcome::Cancelled);
        assert_eq!(backend.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_while_backend_is_starting() {
        struct SlowStart {
            gate: tokio::sync::Notify,
            starts: AtomicUsize,
            cancels: AtomicUsize,
        }

        #[async_trait]
        impl SpeechBackend for SlowStart {
            fn is_supported(&self) -> bool {
                true
            }

            async fn voices(&self) -> Vec<VoiceInfo> {
                Vec::new()
            }

            async fn start(
                &self,
                _request: SpeechRequest,
            ) -> Result<mpsc::Receiver<PlaybackEvent>, ChatError> {
                self.starts.fetch_add(1, Ordering::SeqCst);
                self.gate.notified().await;
                let (_tx, rx) = mpsc::channel(1);
                Ok(rx)
            }

            async fn cancel(&self) {
                self.cancels.fetch_add(1, Ordering::SeqCst);
            }
        }

        let backend = Arc::new(SlowStart {
            gate: tokio::sync::Notify::new(),
            starts: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        });
        let driver = Arc::new(SpeechOutputDriver::new(backend.clone(), "en-US"));
        let speaking = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.speak("Hello", &tutor()).await })
        };
        while backend.starts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        driver.stop().await;
        backend.gate.notify_one();
        assert_eq!(speaking.await.unwrap(), SpeechOutcome::Cancelled);
        assert_eq!(backend.cancels.load(Ordering::SeqCst), 1);
        assert!(!driver.is_speaking());
    }

    fn voices() -> Vec<VoiceInfo> {
        vec![
            VoiceInfo {
                name: "Daniel".into(),
                language: "en-GB".into(),
            },
            VoiceInfo {
                name: "Samantha".into(),
                language: "en-US".into(),
            },
            VoiceInfo {
                name: "Thomas".into(),
                language: "fr-FR".into(),
            },
        ]
    }

    #[test]
    fn test_select_voice_by_preference_name() {
        let prefs = vec!["Missing".to_string(), "samantha".to_string()];
        assert_eq!(
            select_voice(&voices(), &prefs, "fr-FR").as_deref(),
            Some("Samantha")
        );
    }

    #[test]
    fn test_select_voice_by_preference_language() {
        let prefs = vec!["en-GB".to_string()];
        assert_eq!(
            select_voice(&voices(), &prefs, "en-US").as_deref(),
            Some("Daniel")
        );
    }

    #[test]
    fn test_select_voice_falls_back_to_session_language() {
        assert_eq!(
            select_voice(&voices(), &["Karen".to_string()], "fr-FR").as_deref(),
            Some("Thomas")
        );
        assert_eq!(
            select_voice(&voices(), &[], "fr-CA").as_deref(),
            Some("Thomas")
        );
    }

    #[test]
    fn test_select_voice_platform_default() {
        assert_eq!(select_voice(&voices(), &[], "de-DE"), None);
        assert_eq!(select_voice(&[], &["en-US".to_string()], "en-US"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_backend_success_and_failure() {
        let ok = SpeechOutputDriver::new(Arc::new(CommandSpeechBackend::new("true", vec![])), "en-US");
        assert_eq!(ok.speak("Hello", &tutor()).await, SpeechOutcome::Completed);

        let failing =
            SpeechOutputDriver::new(Arc::new(CommandSpeechBackend::new("false", vec![])), "en-US");
        assert!(matches!(
            failing.speak("Hello", &tutor()).await,
            SpeechOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_command_backend_missing_program() {
        let driver = SpeechOutputDriver::new(
            Arc::new(CommandSpeechBackend::new("/nonexistent/parley-tts", vec![])),
            "en-US",
        );
        assert!(matches!(
            driver.speak("Hello", &tutor()).await,
            SpeechOutcome::Failed(_)
        ));
    }
}
