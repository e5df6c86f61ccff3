//! Parley application binary - composition root.
//!
//! Ties the Parley crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open session storage (SQLite or in-memory)
//! 3. Build the personality catalog, connection manager and speech driver
//! 4. Start the network watch and remote health probe
//! 5. Run a terminal conversation loop that acts as the UI

mod cli;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use parley_chat::{
    ChatError, CommandSpeechBackend, ConnectionManager, ConnectivityMonitor, ConversationSession,
    HttpReasoningService, PersonalityCatalog, ResponseSynthesizer, SessionUpdate,
    SpeechOutputDriver, SubmitOutcome, VoiceInfo,
};
use parley_core::config::ParleyConfig;
use parley_core::events::ConversationEvent;
use parley_core::types::{Role, Turn};
use parley_storage::{ConversationStore, Database, KeyValueStore, MemoryStore, SqliteStore};

use cli::{expand_home, CliArgs};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

const HELP: &str = "\
Commands:
  /agents            list agents
  /switch <agent>    end this session and talk to another agent
  /end               end this session
  /start <agent>     start a session when none is active
  /history           list saved sessions
  /resume <id>       continue a saved session
  /status            show connectivity
  /quit              end the session and exit
Anything else is said to the agent.";

// =============================================================================
// Composition
// =============================================================================

fn build_catalog(config: &ParleyConfig) -> AppResult<PersonalityCatalog> {
    let mut catalog = PersonalityCatalog::builtin();
    if let Some(file) = &config.personalities.file {
        let path = expand_home(file);
        let added = catalog.load_file(&path)?;
        tracing::info!(path = %path.display(), added, "Extra personalities loaded");
    }
    Ok(catalog)
}

fn build_store(config: &ParleyConfig, args: &CliArgs) -> AppResult<ConversationStore> {
    let kv: Arc<dyn KeyValueStore> = match config.storage.backend.as_str() {
        "memory" => {
            tracing::info!("Sessions kept in memory only");
            Arc::new(MemoryStore::new())
        }
        _ => {
            let data_dir = args.resolve_data_dir(&config.general.data_dir);
            if let Err(e) = std::fs::create_dir_all(&data_dir) {
                tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
                return Err(e.into());
            }
            let db_path = data_dir.join(&config.storage.db_file);
            let db = Database::new(&db_path)?;
            tracing::info!(path = %db_path.display(), "SQLite database opened");
            Arc::new(SqliteStore::new(Arc::new(db)))
        }
    };
    Ok(ConversationStore::new(kv).with_recent_limit(config.storage.recent_limit))
}

/// Build the connection manager, plus the `host:port` to watch for network
/// reachability when a remote service is in use.
fn build_connection(
    config: &ParleyConfig,
    args: &CliArgs,
) -> AppResult<(ConnectionManager, Option<String>)> {
    let synthesizer = Arc::new(ResponseSynthesizer::from_seed(
        args.resolve_seed(config.synthesis.seed),
    ));
    let monitor = ConnectivityMonitor::new(Duration::from_millis(config.remote.cooldown_ms));

    if args.offline || !config.remote.enabled {
        tracing::info!(offline_flag = args.offline, "Remote service disabled; local responses only");
        return Ok((ConnectionManager::local(synthesizer, monitor), None));
    }

    let timeout = Duration::from_millis(config.remote.timeout_ms);
    let remote = HttpReasoningService::new(
        config.remote.endpoint.clone(),
        config.remote.health_endpoint.clone(),
        timeout,
    )?;
    tracing::info!(endpoint = %remote.endpoint(), timeout_ms = config.remote.timeout_ms, "Remote reasoning service configured");
    let target = remote.socket_target();
    if target.is_none() {
        tracing::warn!(endpoint = %remote.endpoint(), "Endpoint has no host; network reachability not watched");
    }
    let manager = ConnectionManager::with_remote(Arc::new(remote), synthesizer, monitor, timeout);
    Ok((manager, target))
}

fn build_speech(config: &ParleyConfig) -> SpeechOutputDriver {
    match (&config.speech.command, config.speech.enabled) {
        (Some(command), true) => {
            let voices = config
                .speech
                .voices
                .iter()
                .map(|v| VoiceInfo {
                    name: v.name.clone(),
                    language: v.language.clone(),
                })
                .collect();
            tracing::info!(command = %command, "Speech output enabled");
            SpeechOutputDriver::new(
                Arc::new(CommandSpeechBackend::new(command.clone(), voices)),
                config.general.language.clone(),
            )
        }
        _ => {
            tracing::info!("Speech output disabled; agent turns shown as text only");
            SpeechOutputDriver::disabled()
        }
    }
}

// =============================================================================
// Terminal UI
// =============================================================================

fn print_agent_turn(agent_id: &str, turn: &Turn) {
    println!("{}> {}", agent_id, turn.text);
    if let Some(feedback) = &turn.feedback {
        println!(
            "   [grammar {} | fluency {} | vocabulary {}] {}",
            feedback.grammar_score,
            feedback.fluency_score,
            feedback.vocabulary_score,
            feedback.encouragement
        );
        for suggestion in &feedback.suggestions {
            println!("   - {}", suggestion);
        }
        for correction in &feedback.corrections {
            println!("   * {}", correction);
        }
    }
}

/// Print agent turns and status changes as the engine publishes them.
async fn status_printer(mut rx: broadcast::Receiver<SessionUpdate>) {
    loop {
        let update = match rx.recv().await {
            Ok(update) => update,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Status printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match update.event {
            Some(ConversationEvent::TurnAppended {
                turn_id,
                role: Role::Agent,
                ..
            }) => {
                let agent_id = update.agent_id.as_deref().unwrap_or_default();
                if let Some(turn) = update.turns.iter().find(|t| t.id == turn_id) {
                    print_agent_turn(agent_id, turn);
                }
            }
            Some(ConversationEvent::ModeChanged { to, .. }) => {
                eprintln!("(now answering in {} mode)", to);
            }
            Some(ConversationEvent::ConnectivityChanged { state, .. }) => {
                eprintln!(
                    "(network {}, remote service {})",
                    if state.network_online { "online" } else { "offline" },
                    if state.remote_service_reachable { "reachable" } else { "unreachable" }
                );
            }
            Some(ConversationEvent::PersistenceFailed { reason, .. }) => {
                eprintln!("(could not save this session: {})", reason);
            }
            _ => {}
        }
    }
}

fn print_agents(catalog: &PersonalityCatalog) {
    for personality in catalog.list() {
        println!("  {:<22} {}", personality.id, personality.display_name);
    }
}

async fn print_history(engine: &ConversationSession) -> Result<(), ChatError> {
    let sessions = engine.recent_sessions().await?;
    if sessions.is_empty() {
        println!("No saved sessions.");
    }
    for s in sessions {
        println!(
            "  {}  {:<22} {:>3} turns  {}",
            s.id,
            s.agent_id,
            s.turn_count,
            s.last_activity_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Handle one slash command. Returns `false` when the loop should stop.
async fn handle_command(engine: &ConversationSession, line: &str) -> bool {
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    let result = match command {
        "/quit" | "/exit" => return false,
        "/help" => {
            println!("{}", HELP);
            Ok(())
        }
        "/agents" => {
            print_agents(engine.catalog());
            Ok(())
        }
        "/history" => print_history(engine).await,
        "/status" => {
            let state = engine.connection().monitor().snapshot();
            println!(
                "network online: {}, remote reachable: {}, remote configured: {}",
                state.network_online,
                state.remote_service_reachable,
                engine.connection().has_remote()
            );
            Ok(())
        }
        "/end" => engine.end().await.map(|_| println!("Session ended.")),
        "/start" => engine
            .start(arg)
            .await
            .map(|id| println!("Started session {} with {}.", id, arg)),
        "/switch" => engine
            .switch_agent(arg)
            .await
            .map(|id| println!("Now talking to {} (session {}).", arg, id)),
        "/resume" => match Uuid::parse_str(arg) {
            Ok(id) => engine.resume(id).await.map(|_| {
                if let Ok(snapshot) = engine.snapshot() {
                    println!("Resumed session {} ({} turns).", id, snapshot.turns.len());
                }
            }),
            Err(_) => {
                println!("Usage: /resume <session id>");
                Ok(())
            }
        },
        _ => {
            println!("Unknown command. Type /help.");
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("{}", e);
    }
    true
}

/// Submit `text` in the background so commands such as `/end` stay
/// available while the agent answers. The answer itself is printed by
/// `status_printer`.
fn say(engine: &Arc<ConversationSession>, text: &str) -> JoinHandle<()> {
    let engine = engine.clone();
    let text = text.to_string();
    tokio::spawn(async move {
        match engine.submit_utterance(&text, None).await {
            Ok(SubmitOutcome::Completed { .. })
            | Ok(SubmitOutcome::Ignored)
            | Ok(SubmitOutcome::Superseded) => {}
            Err(ChatError::NoActiveSession) => {
                println!("No active session. Use /start <agent> or /resume <id>.");
            }
            Err(ChatError::SessionBusy) => {
                println!("Still answering. Wait for the reply or use /end.");
            }
            Err(e) => println!("{}", e),
        }
    })
}

async fn run_repl(engine: Arc<ConversationSession>) -> AppResult<()> {
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<JoinHandle<()>> = None;
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.starts_with('/') {
            if !handle_command(&engine, line).await {
                break;
            }
        } else if !line.is_empty() {
            pending = Some(say(&engine, line));
        }
    }

    if engine.state()?.is_active() {
        engine.end().await?;
    }
    if let Some(turn) = pending {
        let _ = turn.await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = ParleyConfig::load_or_default(&config_file);

    // Tracing. RUST_LOG wins over the configured level.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    let catalog = Arc::new(build_catalog(&config)?);
    if args.list_agents {
        print_agents(&catalog);
        return Ok(());
    }

    let store = build_store(&config, &args)?;
    let (connection, network_target) = build_connection(&config, &args)?;
    let connection = Arc::new(connection);
    let speech = Arc::new(build_speech(&config));

    let check_interval = Duration::from_secs(config.remote.health_interval_secs.max(1));
    let probe = connection.spawn_health_probe(check_interval);
    let network = network_target.map(|target| {
        tracing::info!(target = %target, "Watching network reachability");
        connection.monitor().spawn_network_watch(
            target,
            check_interval,
            Duration::from_millis(config.remote.timeout_ms),
        )
    });

    let engine = Arc::new(ConversationSession::new(catalog, connection, speech, store));
    let watcher = engine.watch_connectivity();
    let printer = tokio::spawn(status_printer(engine.subscribe()));

    match args.resume {
        Some(id) => {
            engine.resume(id).await?;
            let snapshot = engine.snapshot()?;
            let agent_id = snapshot.agent_id.unwrap_or_default();
            println!("Resumed session {} with {}.", id, agent_id);
            for turn in &snapshot.turns {
                match turn.role {
                    Role::User => println!("you> {}", turn.text),
                    Role::Agent => print_agent_turn(&agent_id, turn),
                }
            }
        }
        None => {
            let id = engine.start(&args.agent).await?;
            println!("Started session {} with {}.", id, args.agent);
        }
    }
    let result = run_repl(engine).await;

    watcher.abort();
    printer.abort();
    for task in [probe, network].into_iter().flatten() {
        task.abort();
    }
    tracing::info!("Parley stopped");
    result
}
