//! Configuration for the statebus daemon and client commands.
//!
//! TOML file plus `STATEBUS_` environment overrides, credential resolution
//! for target passwords (env + keyring + plaintext), and translation into
//! the `statebus_core` runtime types.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use statebus_api::bus::DEFAULT_STREAM;
use statebus_api::transport::TargetConfig;
use statebus_core::config::{
    DEFAULT_MAX_SUBSCRIPTIONS, DEFAULT_MAX_UNARY, DEFAULT_QUEUE_CAPACITY,
};
use statebus_core::schema::STATE_SCHEMA;
use statebus_core::{CollectorConfig, ProducerMode, ServerConfig, StateEntry};
use thiserror::Error;

const KEYRING_SERVICE: &str = "statebus";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub bus: BusSection,

    #[serde(default)]
    pub collector: CollectorSection,

    /// Managed targets keyed by `namespace/name`.
    #[serde(default)]
    pub targets: BTreeMap<String, TargetSection>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_max_unary")]
    pub max_unary: usize,

    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_unary: default_max_unary(),
            max_subscriptions: default_max_subscriptions(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9999".into()
}
fn default_max_unary() -> usize {
    DEFAULT_MAX_UNARY
}
fn default_max_subscriptions() -> usize {
    DEFAULT_MAX_SUBSCRIPTIONS
}

/// Where bus messages go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// In-process streams, lost on exit.
    #[default]
    Memory,
    /// JSON-lines stream files under `bus.dir`.
    File,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BusSection {
    #[serde(default)]
    pub kind: BusKind,

    /// Stream directory for the file bus.
    pub dir: Option<PathBuf>,

    #[serde(default = "default_stream")]
    pub stream: String,

    /// Fixed delay between bus reconnect attempts.
    #[serde(default = "default_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            kind: BusKind::default(),
            dir: None,
            stream: default_stream(),
            reconnect_delay_ms: default_delay_ms(),
        }
    }
}

fn default_stream() -> String {
    DEFAULT_STREAM.into()
}
fn default_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CollectorSection {
    /// `per-session` or `shared`.
    #[serde(default = "default_producer_mode")]
    pub producer_mode: String,

    /// Retry delay for targets that do not set `retry_timer_secs`.
    #[serde(default = "default_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_schema")]
    pub schema: String,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            producer_mode: default_producer_mode(),
            retry_delay_ms: default_delay_ms(),
            queue_capacity: default_queue_capacity(),
            schema: default_schema(),
        }
    }
}

fn default_producer_mode() -> String {
    ProducerMode::default().to_string()
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_schema() -> String {
    STATE_SCHEMA.into()
}

/// One managed target.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TargetSection {
    /// `host:port` or a `ws://` / `wss://` URL.
    pub address: String,

    pub timeout_secs: Option<u64>,

    pub buffer_size: Option<usize>,

    pub retry_timer_secs: Option<u64>,

    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or `password_env`).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// State entries installed at startup.
    #[serde(default)]
    pub state_entries: Vec<StateEntry>,
}

/// A configured target translated for the server.
#[derive(Debug, Clone)]
pub struct SeedTarget {
    pub config: TargetConfig,
    pub state_entries: Vec<StateEntry>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "statebus", "statebus").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("statebus");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Provider chain: defaults, then the TOML file, then `STATEBUS_*`
/// variables (`__` separates nesting levels).
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("STATEBUS_").split("__"))
}

/// Load from an explicit file, which must exist, or from the default
/// path, which may be absent.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            path.to_path_buf()
        }
        None => config_path(),
    };
    let config: Config = figment(&path).extract()?;
    Ok(config)
}

impl Config {
    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    // ── Translation to core types ───────────────────────────────────

    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let listen: SocketAddr = self
            .server
            .listen
            .parse()
            .map_err(|_| invalid("server.listen", format!("not a socket address: {}", self.server.listen)))?;
        if self.server.max_unary == 0 {
            return Err(invalid("server.max_unary", "must be at least 1"));
        }
        Ok(ServerConfig {
            listen,
            max_unary: self.server.max_unary,
            max_subscriptions: self.server.max_subscriptions,
        })
    }

    pub fn collector_config(&self) -> Result<CollectorConfig, ConfigError> {
        let producer_mode: ProducerMode = self.collector.producer_mode.parse().map_err(|_| {
            invalid(
                "collector.producer_mode",
                format!(
                    "expected 'per-session' or 'shared', got '{}'",
                    self.collector.producer_mode
                ),
            )
        })?;
        if self.bus.stream.is_empty() || self.bus.stream.contains(['.', '*', '>', ' ']) {
            return Err(invalid("bus.stream", format!("not a valid stream name: '{}'", self.bus.stream)));
        }
        Ok(CollectorConfig {
            stream: self.bus.stream.clone(),
            producer_mode,
            queue_capacity: self.collector.queue_capacity,
            retry_delay: Duration::from_millis(self.collector.retry_delay_ms),
            bus_reconnect_delay: Duration::from_millis(self.bus.reconnect_delay_ms),
            schema: self.collector.schema.clone(),
        })
    }

    /// Directory for the file bus. Defaults to the platform data dir.
    pub fn bus_dir(&self) -> PathBuf {
        self.bus.dir.clone().unwrap_or_else(|| {
            ProjectDirs::from("io", "statebus", "statebus").map_or_else(
                || dirs_fallback().join("streams"),
                |dirs| dirs.data_dir().join("streams"),
            )
        })
    }

    /// Every configured target with its connection parameters and seed
    /// entries, sorted by name.
    pub fn seed_targets(&self) -> Result<Vec<SeedTarget>, ConfigError> {
        let retry_delay = Duration::from_millis(self.collector.retry_delay_ms);
        self.targets
            .iter()
            .map(|(name, section)| {
                let config = target_config(name, section, retry_delay)?;
                Ok(SeedTarget {
                    config,
                    state_entries: section.state_entries.clone(),
                })
            })
            .collect()
    }
}

fn target_config(name: &str, section: &TargetSection, retry_delay: Duration) -> Result<TargetConfig, ConfigError> {
    if section.address.is_empty() {
        return Err(invalid(format!("targets.\"{name}\".address"), "must not be empty"));
    }
    let mut config = TargetConfig::new(name, section.address.clone());
    if let Some(secs) = section.timeout_secs {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(size) = section.buffer_size {
        config.buffer_size = size;
    }
    config.retry_timer = section.retry_timer_secs.map_or(retry_delay, Duration::from_secs);
    config.username.clone_from(&section.username);
    if section.username.is_some() {
        config.password = resolve_password(section, name);
    }
    Ok(config.normalized())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a target password: `password_env` variable, then the system
/// keyring (`statebus` / `<target>/password`), then plaintext.
pub fn resolve_password(section: &TargetSection, target: &str) -> Option<SecretString> {
    // 1. Env var named by the target
    if let Some(ref env_name) = section.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{target}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Some(SecretString::from(pw));
        }
    }

    // 3. Plaintext in config
    section.password.clone().map(SecretString::from)
}
