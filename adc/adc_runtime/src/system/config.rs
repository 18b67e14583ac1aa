//! Configuration for the ADC runtime
//!
//! Handles loading, validating and merging runtime configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use adc_core::LogLevel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

/// Errors that can occur in configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How an external language's modules are started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Entry file used in development mode, relative to the version directory
    pub source_entry: String,

    /// Entry file used otherwise
    pub compiled_entry: String,

    /// Interpreter for the source entry; empty runs the entry directly
    #[serde(default)]
    pub source_command: Vec<String>,

    /// Interpreter for the compiled entry; empty runs the entry directly
    #[serde(default)]
    pub compiled_command: Vec<String>,
}

impl LanguageConfig {
    pub fn new(source_entry: &str, compiled_entry: &str) -> Self {
        Self {
            source_entry: source_entry.to_string(),
            compiled_entry: compiled_entry.to_string(),
            source_command: Vec::new(),
            compiled_command: Vec::new(),
        }
    }

    pub fn with_commands(mut self, source: &[&str], compiled: &[&str]) -> Self {
        self.source_command = source.iter().map(|s| s.to_string()).collect();
        self.compiled_command = compiled.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Entry file and interpreter for the given mode.
    pub fn entry(&self, dev_mode: bool) -> (&str, &[String]) {
        if dev_mode {
            (self.source_entry.as_str(), self.source_command.as_slice())
        } else {
            (self.compiled_entry.as_str(), self.compiled_command.as_slice())
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory containing `providers/`, `services/`, `presets/` and friends
    #[serde(default = "default_modules_root")]
    pub modules_root: PathBuf,

    /// Language assumed for unnamed modules and used as the loader fallback
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Load source entries instead of compiled ones
    #[serde(default)]
    pub dev_mode: bool,

    /// Minimum severity for the global logger
    #[serde(default)]
    pub log_level: LogLevel,

    /// Bound on each module's `start` (milliseconds)
    #[serde(default = "default_start_timeout")]
    pub start_timeout_ms: u64,

    /// Bound on each module's `stop` (milliseconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// External languages run as child processes
    #[serde(default = "default_languages")]
    pub languages: BTreeMap<String, LanguageConfig>,
}

fn default_modules_root() -> PathBuf {
    PathBuf::from("./modules")
}

fn default_language() -> String {
    "rust".to_string()
}

fn default_start_timeout() -> u64 {
    30_000
}

fn default_shutdown_timeout() -> u64 {
    10_000
}

fn default_languages() -> BTreeMap<String, LanguageConfig> {
    let mut languages = BTreeMap::new();
    languages.insert(
        "python".to_string(),
        LanguageConfig::new("index.py", "index.py").with_commands(&["python3"], &["python3"]),
    );
    languages.insert(
        "cpp".to_string(),
        LanguageConfig::new("bin/index", "bin/index"),
    );
    languages.insert(
        "node".to_string(),
        LanguageConfig::new("index.ts", "index.js").with_commands(&["npx", "tsx"], &["node"]),
    );
    languages
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            modules_root: default_modules_root(),
            default_language: default_language(),
            dev_mode: false,
            log_level: LogLevel::default(),
            start_timeout_ms: default_start_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            languages: default_languages(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a file, then apply environment overrides
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = RuntimeConfig::default();

        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());

            if !path.exists() {
                warn!("Configuration file not found: {}", path.display());
            } else {
                let content = fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;

                config = Self::parse(path, &content)
                    .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
            }
        } else {
            info!("No configuration file specified, using defaults");
        }

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        let config = if is_toml {
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
        } else {
            serde_json::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
        };
        Ok(config)
    }

    /// Overlay `ADC_LOG_LEVEL`, `ADC_DEV_MODE` and `ADC_MODULES_ROOT`
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(level) = var("ADC_LOG_LEVEL") {
            match level.parse() {
                Ok(level) => self.log_level = level,
                Err(e) => warn!("Ignoring ADC_LOG_LEVEL: {}", e),
            }
        }

        if let Some(flag) = var("ADC_DEV_MODE") {
            self.dev_mode = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(root) = var("ADC_MODULES_ROOT") {
            if !root.is_empty() {
                self.modules_root = PathBuf::from(root);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.modules_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("Modules root cannot be empty".to_string()).into());
        }

        if self.default_language.is_empty() {
            return Err(ConfigError::Invalid("Default language cannot be empty".to_string()).into());
        }

        if self.start_timeout_ms == 0 {
            return Err(ConfigError::Invalid("Start timeout cannot be zero".to_string()).into());
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(ConfigError::Invalid("Shutdown timeout cannot be zero".to_string()).into());
        }

        for (language, entry) in &self.languages {
            if entry.source_entry.is_empty() || entry.compiled_entry.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Language '{}' must name both entry files",
                    language
                ))
                .into());
            }
        }

        if self.languages.contains_key(&self.default_language) {
            warn!(
                "Default language '{}' is configured as an external process language",
                self.default_language
            );
        }

        Ok(())
    }

    /// Merge with another configuration
    pub fn merge(&mut self, other: RuntimeConfig) {
        if !other.modules_root.as_os_str().is_empty() {
            self.modules_root = other.modules_root;
        }

        if !other.default_language.is_empty() {
            self.default_language = other.default_language;
        }

        self.dev_mode |= other.dev_mode;
        self.log_level = other.log_level;

        if other.start_timeout_ms > 0 {
            self.start_timeout_ms = other.start_timeout_ms;
        }

        if other.shutdown_timeout_ms > 0 {
            self.shutdown_timeout_ms = other.shutdown_timeout_ms;
        }

        for (language, entry) in other.languages {
            self.languages.insert(language, entry);
        }
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
