//! Configuration management with file persistence
//!
//! Layout of the configuration directory (`$HEARTH_CONFIG_DIR` or the
//! platform config dir joined with `hearth`):
//!
//! ```text
//! hearth/
//! ├── config.toml
//! ├── personality/      # IDENTITY.md, SOUL.md, MEMORY.md, BOOTSTRAP.md, ...
//! └── sessions/         # one directory per session plus `.current`
//! ```

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::heartbeat::MAX_INTERVAL;

/// Default Ollama endpoint
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Default chat model
pub const DEFAULT_MODEL: &str = "qwen3:8b";

/// Hearth configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Language the assistant should answer in
    pub language: String,
    pub backend: BackendConfig,
    pub model: ModelConfig,
    pub session: SessionConfig,
    pub memory: MemoryConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Upper bound for the context ladder
    pub max_context: u32,
    /// Timeout for the startup availability probe
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Token budget the compaction engine keeps history under
    pub compaction_max_tokens: usize,
    /// Messages preserved verbatim when compacting
    pub keep_recent: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub max_prompt_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: "English".to_string(),
            backend: BackendConfig::default(),
            model: ModelConfig::default(),
            session: SessionConfig::default(),
            memory: MemoryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_context: 32768,
            probe_timeout_secs: 5,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: DEFAULT_MODEL.to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            compaction_max_tokens: 32768,
            keep_recent: 10,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_prompt_tokens: 2000,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(4 * 60 * 60),
        }
    }
}

impl BackendConfig {
    /// Base URL after applying the `OLLAMA_HOST` override
    pub fn resolved_base_url(&self) -> String {
        match env::var("OLLAMA_HOST") {
            Ok(host) if !host.trim().is_empty() => normalize_base_url(host.trim()),
            _ => self.base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// `OLLAMA_HOST` is commonly set without a scheme (`0.0.0.0:11434`)
fn normalize_base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("HEARTH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("hearth")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory holding one subdirectory per session
    pub fn sessions_dir() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("sessions"))
    }

    /// Directory holding the personality and memory files
    pub fn personality_dir() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("personality"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration, writing defaults on first run
    ///
    /// Returns the configuration and whether this was the first run (no
    /// config file existed yet).
    pub fn load_or_init() -> anyhow::Result<(Self, bool)> {
        let path = Self::config_path()?;
        if path.exists() {
            return Ok((Self::load_from(&path)?, false));
        }
        let config = Config::default();
        config.save_to(&path)?;
        Ok((config, true))
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.backend.base_url.starts_with("http://")
            && !self.backend.base_url.starts_with("https://")
        {
            return Err(anyhow!(
                "backend.base_url must start with http:// or https:// (got {})",
                self.backend.base_url
            ));
        }
        if self.session.keep_recent == 0 {
            return Err(anyhow!("session.keep_recent must be at least 1"));
        }
        if self.heartbeat.interval.is_zero() {
            return Err(anyhow!("heartbeat.interval must be greater than zero"));
        }
        if self.heartbeat.interval > MAX_INTERVAL {
            return Err(anyhow!(
                "heartbeat.interval must be at most {}",
                humantime::format_duration(MAX_INTERVAL)
            ));
        }
        if self.model.default.trim().is_empty() {
            return Err(anyhow!("model.default must not be empty"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "language" => Ok(self.language.clone()),

            "backend.base_url" => Ok(self.backend.base_url.clone()),
            "backend.max_context" => Ok(self.backend.max_context.to_string()),
            "backend.probe_timeout_secs" => Ok(self.backend.probe_timeout_secs.to_string()),

            "model.default" => Ok(self.model.default.clone()),

            "session.compaction_max_tokens" => Ok(self.session.compaction_max_tokens.to_string()),
            "session.keep_recent" => Ok(self.session.keep_recent.to_string()),

            "memory.enabled" => Ok(self.memory.enabled.to_string()),
            "memory.max_prompt_tokens" => Ok(self.memory.max_prompt_tokens.to_string()),

            "heartbeat.enabled" => Ok(self.heartbeat.enabled.to_string()),
            "heartbeat.interval" => Ok(humantime::format_duration(self.heartbeat.interval).to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `hearth config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "language" => {
                if value.trim().is_empty() {
                    return Err(anyhow!("Language must not be empty"));
                }
                self.language = value.trim().to_string();
            }

            "backend.base_url" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err(anyhow!("Base URL must start with http:// or https://"));
                }
                self.backend.base_url = value.trim_end_matches('/').to_string();
            }
            "backend.max_context" => {
                self.backend.max_context = value
                    .parse()
                    .with_context(|| format!("Invalid max_context value: {}", value))?;
            }
            "backend.probe_timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid probe_timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("Probe timeout must be at least 1 second"));
                }
                self.backend.probe_timeout_secs = secs;
            }

            "model.default" => {
                if value.trim().is_empty() {
                    return Err(anyhow!("Model name must not be empty"));
                }
                self.model.default = value.trim().to_string();
            }

            "session.compaction_max_tokens" => {
                self.session.compaction_max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid compaction_max_tokens value: {}", value))?;
            }
            "session.keep_recent" => {
                let keep: usize = value
                    .parse()
                    .with_context(|| format!("Invalid keep_recent value: {}", value))?;
                if keep == 0 {
                    return Err(anyhow!("keep_recent must be at least 1"));
                }
                self.session.keep_recent = keep;
            }

            "memory.enabled" => {
                self.memory.enabled = parse_bool(value)?;
            }
            "memory.max_prompt_tokens" => {
                self.memory.max_prompt_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_prompt_tokens value: {}", value))?;
            }

            "heartbeat.enabled" => {
                self.heartbeat.enabled = parse_bool(value)?;
            }
            "heartbeat.interval" => {
                let interval = humantime::parse_duration(value)
                    .with_context(|| format!("Invalid interval: {} (try 30m, 4h)", value))?;
                if interval.is_zero() {
                    return Err(anyhow!("Heartbeat interval must be greater than zero"));
                }
                if interval > MAX_INTERVAL {
                    return Err(anyhow!(
                        "Heartbeat interval must be at most {}",
                        humantime::format_duration(MAX_INTERVAL)
                    ));
                }
                self.heartbeat.interval = interval;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `hearth config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "language",
            "backend.base_url",
            "backend.max_context",
            "backend.probe_timeout_secs",
            "model.default",
            "session.compaction_max_tokens",
            "session.keep_recent",
            "memory.enabled",
            "memory.max_prompt_tokens",
            "heartbeat.enabled",
            "heartbeat.interval",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(anyhow!("Expected true or false, got: {}", value)),
    }
}
