use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley client.
///
/// Loaded from `~/.parley/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub personalities: PersonalitiesConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.remote.enabled && self.remote.endpoint.trim().is_empty() {
            return Err(ParleyError::Config(
                "remote.endpoint must be set when remote.enabled is true".to_string(),
            ));
        }
        if self.remote.timeout_ms == 0 {
            return Err(ParleyError::Config(
                "remote.timeout_ms must be greater than zero".to_string(),
            ));
        }
        match self.storage.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ParleyError::Config(format!(
                    "storage.backend must be \"sqlite\" or \"memory\", got \"{}\"",
                    other
                )))
            }
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the session database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Session language as a BCP-47 tag, used for voice fallback.
    pub language: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.parley/data".to_string(),
            log_level: "info".to_string(),
            language: "en-US".to_string(),
        }
    }
}

/// Remote reasoning service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Whether to call the remote service at all.
    pub enabled: bool,
    /// URL the conversation turn is POSTed to.
    pub endpoint: String,
    /// Optional URL probed periodically with GET to re-check reachability.
    pub health_endpoint: Option<String>,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
    /// How long to skip the remote service after a failure, in milliseconds.
    pub cooldown_ms: u64,
    /// Seconds between health probes.
    pub health_interval_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            health_endpoint: None,
            timeout_ms: 4_000,
            cooldown_ms: 5_000,
            health_interval_secs: 30,
        }
    }
}

/// Speech output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Whether agent turns are spoken.
    pub enabled: bool,
    /// External text-to-speech program, e.g. `espeak-ng`.
    pub command: Option<String>,
    /// Voices the speech program offers, as `name` / `language` pairs.
    pub voices: Vec<VoiceEntry>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            voices: Vec::new(),
        }
    }
}

/// A voice offered by the speech facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub name: String,
    pub language: String,
}

/// Session persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// "sqlite" or "memory".
    pub backend: String,
    /// Database file name inside `general.data_dir`.
    pub db_file: String,
    /// Maximum number of sessions returned by recent-session listings.
    pub recent_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            db_file: "parley.db".to_string(),
            recent_limit: 20,
        }
    }
}

/// Local response synthesis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Fixed RNG seed for reproducible local responses. Random when unset.
    pub seed: Option<u64>,
}

/// Extra personality definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalitiesConfig {
    /// TOML file with additional personalities merged into the built-ins.
    pub file: Option<String>,
}
