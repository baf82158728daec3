//! TOML Configuration File Support
//!
//! Configuration for the bridge host lives at
//! `$XDG_CONFIG_HOME/bridge/bridge.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [streaming]
//! quiet_buffer_ms = 5000
//! debounce_ms = 100
//! cancel_policy = "keep-paced"
//!
//! [endpoint]
//! outbox_capacity = 256
//! max_in_flight = 64
//!
//! [generation]
//! backend = "ollama"
//! model = "llama3.2"
//! ollama_host = "localhost"
//! ollama_port = 11434
//! token_interval_ms = 30
//!
//! [documents]
//! root = "/home/me/Documents/bridge"
//! top_words = 10
//!
//! [settings]
//! secret_keys = ["apiKey"]
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_PORT, DEFAULT_TOKEN_INTERVAL};
use crate::endpoint::EndpointConfig;
use crate::handlers::DEFAULT_TOP_WORDS;
use crate::streaming::{CancelPolicy, StreamingConfig};

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "llama3.2";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Backend Selection
// =============================================================================

/// Which generative backend serves `generate`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Offline scripted producer
    #[default]
    Scripted,
    /// Local Ollama server
    Ollama,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scripted" => Ok(Self::Scripted),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!(
                "unknown backend '{other}' (expected 'scripted' or 'ollama')"
            )),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scripted => write!(f, "scripted"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[streaming]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Quiet-buffer period in milliseconds
    pub quiet_buffer_ms: Option<u64>,
    /// Debounce period in milliseconds
    pub debounce_ms: Option<u64>,
    /// Cancellation policy
    pub cancel_policy: Option<CancelPolicy>,
}

/// `[endpoint]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointToml {
    /// Outbox channel capacity
    pub outbox_capacity: Option<usize>,
    /// Concurrent handler invocations
    pub max_in_flight: Option<usize>,
}

/// `[generation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Backend selection
    pub backend: Option<BackendKind>,
    /// Default model
    pub model: Option<String>,
    /// Ollama host
    pub ollama_host: Option<String>,
    /// Ollama port
    pub ollama_port: Option<u16>,
    /// Scripted backend token spacing in milliseconds
    pub token_interval_ms: Option<u64>,
}

/// `[documents]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsToml {
    /// Directory `saveFile` writes under
    pub root: Option<PathBuf>,
    /// Frequent words reported by default
    pub top_words: Option<usize>,
}

/// `[settings]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsToml {
    /// Keys whose values are never sent to the surface
    pub secret_keys: Option<Vec<String>>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeToml {
    /// Streaming section
    pub streaming: StreamingToml,
    /// Endpoint section
    pub endpoint: EndpointToml,
    /// Generation section
    pub generation: GenerationToml,
    /// Documents section
    pub documents: DocumentsToml,
    /// Settings section
    pub settings: SettingsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Generation settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Backend selection
    pub backend: BackendKind,
    /// Default model
    pub model: String,
    /// Ollama host
    pub ollama_host: String,
    /// Ollama port
    pub ollama_port: u16,
    /// Scripted backend token spacing
    pub token_interval: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            model: DEFAULT_MODEL.to_string(),
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            ollama_port: DEFAULT_OLLAMA_PORT,
            token_interval: DEFAULT_TOKEN_INTERVAL,
        }
    }
}

/// Document settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentsConfig {
    /// Directory `saveFile` writes under
    pub root: PathBuf,
    /// Frequent words reported by default
    pub top_words: usize,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            top_words: DEFAULT_TOP_WORDS,
        }
    }
}

/// Resolved configuration for the bridge host
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Stream pacing
    pub streaming: StreamingConfig,
    /// Endpoint tuning
    pub endpoint: EndpointConfig,
    /// Generation backend
    pub generation: GenerationConfig,
    /// Document handling
    pub documents: DocumentsConfig,
    /// Keys redacted from settings replies
    pub secret_keys: Vec<String>,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            streaming: StreamingConfig::default(),
            endpoint: EndpointConfig::default(),
            generation: GenerationConfig::default(),
            documents: DocumentsConfig::default(),
            secret_keys: vec!["apiKey".to_string()],
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values the runtime cannot work with
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.streaming.quiet_buffer.is_zero() {
            return invalid("streaming.quiet_buffer_ms must be greater than 0");
        }
        if self.streaming.debounce.is_zero() {
            return invalid("streaming.debounce_ms must be greater than 0");
        }
        if self.endpoint.outbox_capacity == 0 {
            return invalid("endpoint.outbox_capacity must be greater than 0");
        }
        if self.endpoint.max_in_flight == 0 {
            return invalid("endpoint.max_in_flight must be greater than 0");
        }
        if self.generation.model.trim().is_empty() {
            return invalid("generation.model must not be empty");
        }
        if self.generation.token_interval.is_zero() {
            return invalid("generation.token_interval_ms must be greater than 0");
        }
        if self.documents.top_words == 0 {
            return invalid("documents.top_words must be greater than 0");
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/bridge/bridge.toml` or
/// `~/.config/bridge/bridge.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("bridge").join("bridge.toml"))
}

fn default_documents_root() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("bridge").join("documents"))
        .unwrap_or_else(|| PathBuf::from("documents"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if a
/// resolved value is invalid. A missing config file is not an error.
pub fn load_config() -> Result<BridgeConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<BridgeConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<BridgeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = BridgeConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: BridgeToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut BridgeConfig, toml: &BridgeToml) {
    if let Some(ms) = toml.streaming.quiet_buffer_ms {
        config.streaming.quiet_buffer = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.streaming.debounce_ms {
        config.streaming.debounce = Duration::from_millis(ms);
    }
    if let Some(policy) = toml.streaming.cancel_policy {
        config.streaming.cancel_policy = policy;
    }

    if let Some(capacity) = toml.endpoint.outbox_capacity {
        config.endpoint.outbox_capacity = capacity;
    }
    if let Some(max) = toml.endpoint.max_in_flight {
        config.endpoint.max_in_flight = max;
    }

    if let Some(backend) = toml.generation.backend {
        config.generation.backend = backend;
    }
    if let Some(ref model) = toml.generation.model {
        config.generation.model = model.clone();
    }
    if let Some(ref host) = toml.generation.ollama_host {
        config.generation.ollama_host = host.clone();
    }
    if let Some(port) = toml.generation.ollama_port {
        config.generation.ollama_port = port;
    }
    if let Some(ms) = toml.generation.token_interval_ms {
        config.generation.token_interval = Duration::from_millis(ms);
    }

    if let Some(ref root) = toml.documents.root {
        config.documents.root = root.clone();
    }
    if let Some(top) = toml.documents.top_words {
        config.documents.top_words = top;
    }

    if let Some(ref keys) = toml.settings.secret_keys {
        config.secret_keys = keys.clone();
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::ValidationError(format!("{key}={raw:?}: {e}"))),
        None => Ok(None),
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut BridgeConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let before = config.source;
    config.source = ConfigSource::Env;

    let mut applied = false;
    if let Some(ms) = parse_env::<u64, _>(&env, "BRIDGE_QUIET_BUFFER_MS")? {
        config.streaming.quiet_buffer = Duration::from_millis(ms);
        applied = true;
    }
    if let Some(ms) = parse_env::<u64, _>(&env, "BRIDGE_DEBOUNCE_MS")? {
        config.streaming.debounce = Duration::from_millis(ms);
        applied = true;
    }
    if let Some(policy) = parse_env::<CancelPolicy, _>(&env, "BRIDGE_CANCEL_POLICY")? {
        config.streaming.cancel_policy = policy;
        applied = true;
    }
    if let Some(backend) = parse_env::<BackendKind, _>(&env, "BRIDGE_BACKEND")? {
        config.generation.backend = backend;
        applied = true;
    }
    if let Some(model) = env("BRIDGE_MODEL") {
        config.generation.model = model;
        applied = true;
    }
    if let Some(host) = env("OLLAMA_HOST") {
        config.generation.ollama_host = host;
        applied = true;
    }
    if let Some(port) = parse_env::<u16, _>(&env, "OLLAMA_PORT")? {
        config.generation.ollama_port = port;
        applied = true;
    }
    if let Some(root) = env("BRIDGE_DOCUMENTS_ROOT") {
        config.documents.root = PathBuf::from(root);
        applied = true;
    }

    if !applied {
        config.source = before;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Quiet-buffer period override (milliseconds)
    pub quiet_buffer_ms: Option<u64>,
    /// Debounce period override (milliseconds)
    pub debounce_ms: Option<u64>,
    /// Cancellation policy override
    pub cancel_policy: Option<CancelPolicy>,
    /// Backend override
    pub backend: Option<BackendKind>,
    /// Model override
    pub model: Option<String>,
    /// Documents root override
    pub documents_root: Option<PathBuf>,
    /// Concurrent handler limit override
    pub max_in_flight: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backend override
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set documents root override
    #[must_use]
    pub fn with_documents_root(mut self, root: PathBuf) -> Self {
        self.documents_root = Some(root);
        self
    }

    /// Set quiet-buffer override
    #[must_use]
    pub fn with_quiet_buffer_ms(mut self, ms: u64) -> Self {
        self.quiet_buffer_ms = Some(ms);
        self
    }

    fn is_empty(&self) -> bool {
        self.quiet_buffer_ms.is_none()
            && self.debounce_ms.is_none()
            && self.cancel_policy.is_none()
            && self.backend.is_none()
            && self.model.is_none()
            && self.documents_root.is_none()
            && self.max_in_flight.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] if an override is invalid.
    pub fn apply(&self, config: &mut BridgeConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Cli;

        if let Some(ms) = self.quiet_buffer_ms {
            config.streaming.quiet_buffer = Duration::from_millis(ms);
        }
        if let Some(ms) = self.debounce_ms {
            config.streaming.debounce = Duration::from_millis(ms);
        }
        if let Some(policy) = self.cancel_policy {
            config.streaming.cancel_policy = policy;
        }
        if let Some(backend) = self.backend {
            config.generation.backend = backend;
        }
        if let Some(ref model) = self.model {
            config.generation.model = model.clone();
        }
        if let Some(ref root) = self.documents_root {
            config.documents.root = root.clone();
        }
        if let Some(max) = self.max_in_flight {
            config.endpoint.max_in_flight = max;
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
