//! # Configuration
//!
//! Settings for the listener, the handshake and logging.
//!
//! A config comes from a TOML file ([`NetworkConfig::from_file`]), from
//! `GAMEWIRE_*` environment variables ([`NetworkConfig::from_env`]) or from
//! [`Default`] plus a closure ([`NetworkConfig::default_with_overrides`]).
//! Missing TOML sections fall back to their defaults. Durations are written
//! as whole milliseconds.
//!
//! The 50 ms handshake window is the one the legacy client expects.
//! `max_attempts` and `timeout` have no legacy counterpart; they keep a
//! client that never converges from holding a session in the handshake phase.

use crate::error::{ProtocolError, Result};
use crate::protocol::phase::ServerMode;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Largest frame the server will buffer before closing the connection.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Accepted clock disagreement, in milliseconds.
pub const HANDSHAKE_TOLERANCE_MS: u32 = 50;

const ENV_ADDRESS: &str = "GAMEWIRE_SERVER_ADDRESS";
const ENV_MODE: &str = "GAMEWIRE_SERVER_MODE";
const ENV_MAX_CONNECTIONS: &str = "GAMEWIRE_MAX_CONNECTIONS";
const ENV_TOLERANCE: &str = "GAMEWIRE_HANDSHAKE_TOLERANCE_MS";
const ENV_HANDSHAKE_TIMEOUT: &str = "GAMEWIRE_HANDSHAKE_TIMEOUT_MS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults, overridden by whichever `GAMEWIRE_*` variables are set.
    ///
    /// # Errors
    /// A set variable that does not parse is a `ConfigError`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(address) = env_var::<String>(ENV_ADDRESS)? {
            config.server.address = address;
        }
        if let Some(mode) = env_var::<ServerMode>(ENV_MODE)? {
            config.server.mode = mode;
        }
        if let Some(max) = env_var(ENV_MAX_CONNECTIONS)? {
            config.server.max_connections = max;
        }
        if let Some(tolerance) = env_var(ENV_TOLERANCE)? {
            config.handshake.tolerance_ms = tolerance;
        }
        if let Some(ms) = env_var(ENV_HANDSHAKE_TIMEOUT)? {
            config.handshake.timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// The default config rendered as TOML, for `--print-config` style output.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, text).map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))
    }

    /// Every problem found, one message each. Empty means usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Problems::default();
        self.server.check(&mut problems);
        self.handshake.check(&mut problems);
        self.logging.check(&mut problems);
        problems.0
    }

    /// [`validate`](Self::validate) folded into a single `ConfigError`.
    pub fn validate_strict(&self) -> Result<()> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed: {}",
            problems.join("; ")
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `ip:port`
    pub address: String,
    #[serde(default)]
    pub mode: ServerMode,
    pub max_connections: usize,
    /// Largest frame accepted from a client, in bytes
    pub max_frame_size: usize,
    /// How long shutdown waits for sessions to leave
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:13000".into(),
            mode: ServerMode::Game,
            max_connections: 1000,
            max_frame_size: MAX_FRAME_SIZE,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    fn check(&self, problems: &mut Problems) {
        if self.address.is_empty() {
            problems.push("Server address cannot be empty");
        } else if self.address.parse::<SocketAddr>().is_err() {
            problems.push(format!("Invalid server address '{}', expected ip:port", self.address));
        }

        match self.max_connections {
            0 => problems.push("Max connections must be greater than 0"),
            n if n > 100_000 => problems.push(format!("Max connections very high: {n}")),
            _ => {}
        }

        problems.bounded("Max frame size", self.max_frame_size, 16, 16 * 1024 * 1024, "bytes");
        problems.bounded_duration("Shutdown timeout", self.shutdown_timeout, 100, 60_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Accepted `now - (time + delta)` window, in milliseconds
    pub tolerance_ms: u32,
    /// Replies allowed before the handshake is abandoned
    pub max_attempts: u32,
    /// Limit for the whole handshake phase
    #[serde(with = "millis")]
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: HANDSHAKE_TOLERANCE_MS,
            max_attempts: 8,
            timeout: Duration::from_secs(10),
        }
    }
}

impl HandshakeConfig {
    fn check(&self, problems: &mut Problems) {
        if self.tolerance_ms == 0 {
            problems.push("Handshake tolerance must be greater than 0");
        } else {
            problems.bounded("Handshake tolerance", self.tolerance_ms, 1, 1000, "ms");
        }
        if self.max_attempts == 0 {
            problems.push("Handshake attempts must be greater than 0");
        } else if self.max_attempts > 64 {
            problems.push(format!("Handshake attempts too high: {} (maximum 64)", self.max_attempts));
        }
        problems.bounded_duration("Handshake timeout", self.timeout, 100, 120_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Name attached to every log line
    pub app_name: String,
    #[serde(with = "level")]
    pub log_level: Level,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: "gamewire".into(),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    fn check(&self, problems: &mut Problems) {
        match self.app_name.len() {
            0 => problems.push("Application name cannot be empty"),
            n if n > 64 => problems.push(format!("Application name too long: {n} characters (maximum 64)")),
            _ => {}
        }
    }
}

#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn push(&mut self, problem: impl Into<String>) {
        self.0.push(problem.into());
    }

    fn bounded<T: PartialOrd + Display>(&mut self, what: &str, value: T, min: T, max: T, unit: &str) {
        if value < min {
            self.push(format!("{what} too small: {value} {unit} (minimum {min} {unit})"));
        } else if value > max {
            self.push(format!("{what} too large: {value} {unit} (maximum {max} {unit})"));
        }
    }

    fn bounded_duration(&mut self, what: &str, value: Duration, min_ms: u128, max_ms: u128) {
        let ms = value.as_millis();
        if ms < min_ms {
            self.push(format!("{what} too short: {ms}ms (minimum {min_ms}ms)"));
        } else if ms > max_ms {
            self.push(format!("{what} too long: {ms}ms (maximum {max_ms}ms)"));
        }
    }
}

fn env_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid {name} '{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

/// `Duration` as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `tracing::Level` as a lowercase name.
mod level {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S: Serializer>(value: &Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| D::Error::custom(format!("unknown log level '{name}'")))
    }
}
