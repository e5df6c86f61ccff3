//! CLI argument definitions for the Parley application.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;
use uuid::Uuid;

/// Parley: practice conversations with AI tutors, online or offline.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Data directory for the session database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Agent to start talking to.
    #[arg(short = 'a', long = "agent", default_value = "friendly-tutor")]
    pub agent: String,

    /// Never call the remote reasoning service.
    #[arg(long = "offline")]
    pub offline: bool,

    /// Fixed seed for local responses.
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Continue a saved session instead of starting a new one.
    #[arg(short = 'r', long = "resume")]
    pub resume: Option<Uuid>,

    /// Print the available agents and exit.
    #[arg(long = "list-agents")]
    pub list_agents: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PARLEY_CONFIG env var > ~/.parley/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PARLEY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory, with `~` expanded.
    ///
    /// Priority: --data-dir flag > config file value.
    pub fn resolve_data_dir(&self, config_data_dir: &str) -> PathBuf {
        match &self.data_dir {
            Some(p) => p.clone(),
            None => expand_home(config_data_dir),
        }
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    /// Resolve the local synthesis seed.
    pub fn resolve_seed(&self, config_seed: Option<u64>) -> Option<u64> {
        self.seed.or(config_seed)
    }
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE").ok();
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME").ok();
    home
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        let home = home_dir().unwrap_or_else(|| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => PathBuf::from(home).join(".parley").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["parley"]).unwrap();
        assert_eq!(args.agent, "friendly-tutor");
        assert!(!args.offline);
        assert!(!args.list_agents);
        assert!(args.resume.is_none());
        assert_eq!(args.resolve_log_level("warn"), "warn");
        assert_eq!(args.resolve_seed(Some(9)), Some(9));
    }

    #[test]
    fn test_flags_override_config() {
        let args = CliArgs::try_parse_from([
            "parley",
            "--agent",
            "travel-guide",
            "--offline",
            "--seed",
            "7",
            "--log-level",
            "debug",
            "--data-dir",
            "/tmp/parley",
            "--config",
            "/etc/parley.toml",
        ])
        .unwrap();
        assert_eq!(args.agent, "travel-guide");
        assert!(args.offline);
        assert_eq!(args.resolve_seed(Some(9)), Some(7));
        assert_eq!(args.resolve_log_level("info"), "debug");
        assert_eq!(args.resolve_data_dir("~/.parley/data"), PathBuf::from("/tmp/parley"));
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/parley.toml"));
    }

    #[test]
    fn test_resume_requires_uuid() {
        assert!(CliArgs::try_parse_from(["parley", "--resume", "yesterday"]).is_err());
        let id = Uuid::new_v4().to_string();
        let args = CliArgs::try_parse_from(["parley", "--resume", id.as_str()]).unwrap();
        assert_eq!(args.resume.map(|u| u.to_string()), Some(id));
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/lib/parley"), PathBuf::from("/var/lib/parley"));
        assert!(!expand_home("~/.parley/data").starts_with("~"));
    }
}
