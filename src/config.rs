//! Configuration module for the prompt shield.
//!
//! Loads service configuration from YAML files and environment variables.
//! The shielding policy itself lives in its own document (see `policy`) so
//! it can be reloaded without restarting the service.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub shield: ShieldConfig,
    #[serde(default)]
    pub events: EventLogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Generation backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Chat-completions base URL.
    pub base_url: String,
    /// API key; backend-assisted strategies are unavailable without it.
    #[serde(default)]
    pub api_key: String,
    /// Model used for backend-assisted safety classification.
    pub guard_model: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the initial attempt before giving up.
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on a single backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl BackendConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Shielding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShieldConfig {
    /// Path to the JSON policy document.
    pub policy_path: String,
    /// Path to the entity lexicon backing the named-entity pass; the pass is
    /// unavailable when the file cannot be read.
    pub entity_lexicon_path: String,
    /// Upper bound on accepted prompt length, in characters.
    pub max_prompt_chars: usize,
}

/// Event log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventLogConfig {
    /// Path of the append-only event log file.
    pub log_path: String,
    /// Maximum characters kept in event previews.
    pub preview_max_chars: usize,
    /// `/api/logs` limit applied when the query omits one.
    pub default_query_limit: usize,
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (SHIELD_*)
    /// 2. config/local.yaml (if exists)
    /// 3. config/default.yaml
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            // Start with default config
            .add_source(File::with_name("config/default").required(false))
            // Layer on local overrides
            .add_source(File::with_name("config/local").required(false))
            // Layer on environment variables with SHIELD_ prefix
            .add_source(
                Environment::with_prefix("SHIELD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            guard_model: "meta-llama/llama-guard-4-12b".to_string(),
            timeout_secs: 30,
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            policy_path: "config/policy.json".to_string(),
            entity_lexicon_path: "config/entities.txt".to_string(),
            max_prompt_chars: 32_768,
        }
    }
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            log_path: "prompt_shield.log".to_string(),
            preview_max_chars: 200,
            default_query_limit: 200,
        }
    }
}
