use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Top-level Cortex configuration.
///
/// Loaded from a TOML file; every field has a default so partial configs
/// are valid. `ingest_api_key` and `llm.model` are the two fields spec.md
/// marks required — `Config::validate` enforces that after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on `/ingest`, `/outbox/poll`, `/outbox/ack`.
    #[serde(default)]
    pub ingest_api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file. `:memory:` is accepted for tests.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the LLM proxy (chat-completions endpoint lives under it).
    #[serde(default = "default_synapse_url")]
    pub synapse_url: String,
    /// Default chat-completion model. Required (non-empty).
    #[serde(default)]
    pub model: String,
    /// Model used for fact/summary extraction. `None` disables extraction.
    #[serde(default)]
    pub extraction_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_engram_url")]
    pub engram_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_poll_batch")]
    pub outbox_poll_default_batch: u32,
    #[serde(default = "default_lease_seconds")]
    pub outbox_lease_seconds: u32,
    #[serde(default = "default_max_attempts")]
    pub outbox_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_interval")]
    pub extraction_interval: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default = "default_poll_busy_ms")]
    pub poll_busy_ms: u64,
    #[serde(default = "default_poll_idle_ms")]
    pub poll_idle_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
/// Falls back to `./data/cortex.db` if the platform has no resolvable
/// data-directory (spec.md §6.2: "stored under a user-specific data
/// directory").
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("cortex").join("cortex.db"))
        .unwrap_or_else(|| PathBuf::from("./data/cortex.db"))
}
fn default_synapse_url() -> String {
    "http://localhost:4001".into()
}
fn default_engram_url() -> String {
    "http://localhost:4002".into()
}
fn default_poll_batch() -> u32 {
    10
}
fn default_lease_seconds() -> u32 {
    60
}
fn default_max_attempts() -> u32 {
    10
}
fn default_extraction_interval() -> u32 {
    6
}
fn default_tool_timeout_ms() -> u64 {
    20_000
}
fn default_max_tool_rounds() -> u32 {
    8
}
fn default_poll_busy_ms() -> u64 {
    100
}
fn default_poll_idle_ms() -> u64 {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ingest_api_key: String::new(),
        }
    }
}
impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            synapse_url: default_synapse_url(),
            model: String::new(),
            extraction_model: None,
        }
    }
}
impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            engram_url: default_engram_url(),
        }
    }
}
impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            outbox_poll_default_batch: default_poll_batch(),
            outbox_lease_seconds: default_lease_seconds(),
            outbox_max_attempts: default_max_attempts(),
        }
    }
}
impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extraction_interval: default_extraction_interval(),
        }
    }
}
impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: default_tool_timeout_ms(),
            max_tool_rounds: default_max_tool_rounds(),
            poll_busy_ms: default_poll_busy_ms(),
            poll_idle_ms: default_poll_idle_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            llm: LlmConfig::default(),
            memory: MemoryConfig::default(),
            outbox: OutboxConfig::default(),
            extraction: ExtractionConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load from file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &std::path::Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_default()
        } else {
            Self::default()
        }
    }

    /// Validate the fields spec.md marks as required and the bounded
    /// numeric ranges from §6.4. Call once at startup before serving.
    pub fn validate(&self) -> Result<()> {
        if self.server.ingest_api_key.trim().is_empty() {
            return Err(Error::Config("server.ingest_api_key is required".into()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(Error::Config("llm.model is required".into()));
        }
        if self.extraction.extraction_interval < 1 {
            return Err(Error::Config(
                "extraction.extraction_interval must be >= 1".into(),
            ));
        }
        if !(1..=100).contains(&self.outbox.outbox_poll_default_batch) {
            return Err(Error::Config(
                "outbox.outbox_poll_default_batch must be in 1..=100".into(),
            ));
        }
        if !(10..=300).contains(&self.outbox.outbox_lease_seconds) {
            return Err(Error::Config(
                "outbox.outbox_lease_seconds must be in 10..=300".into(),
            ));
        }
        if self.outbox.outbox_max_attempts < 1 {
            return Err(Error::Config(
                "outbox.outbox_max_attempts must be >= 1".into(),
            ));
        }
        if self.processor.tool_timeout_ms < 1000 {
            return Err(Error::Config(
                "processor.tool_timeout_ms must be >= 1000".into(),
            ));
        }
        if !(1..=20).contains(&self.processor.max_tool_rounds) {
            return Err(Error::Config(
                "processor.max_tool_rounds must be in 1..=20".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
    }

    #[test]
    fn validate_rejects_missing_api_key() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_lease_seconds() {
        let mut cfg = Config::default();
        cfg.server.ingest_api_key = "k".into();
        cfg.llm.model = "gpt-4o".into();
        cfg.outbox.outbox_lease_seconds = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_filled_required_fields() {
        let mut cfg = Config::default();
        cfg.server.ingest_api_key = "k".into();
        cfg.llm.model = "gpt-4o".into();
        assert!(cfg.validate().is_ok());
    }
}
