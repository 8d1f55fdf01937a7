//! Server configuration parsed from environment variables.

use presence::ControlMode;

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_CURSOR_WRITES_PER_SEC: usize = 60;
pub const DEFAULT_INPUT_WRITES_PER_SEC: usize = 40;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid PORT: {0}")]
    InvalidPort(String),
    #[error("invalid DEFAULT_CONTROL_MODE: {0} (expected free, single, or host_only)")]
    InvalidControlMode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Persistence is disabled when unset.
    pub database_url: Option<String>,
    /// Mode for sessions created without an explicit one.
    pub default_control_mode: ControlMode,
    /// Outbound frame buffer per websocket connection.
    pub client_channel_capacity: usize,
    pub flush_interval_ms: u64,
    pub cursor_writes_per_sec: usize,
    pub input_writes_per_sec: usize,
}

impl ServerConfig {
    /// Build typed config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `DATABASE_URL`: enables Postgres persistence
    /// - `DEFAULT_CONTROL_MODE`: `free` (default), `single`, or `host_only`
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256
    /// - `FLUSH_INTERVAL_MS`: default 100
    /// - `CURSOR_WRITES_PER_SEC`: default 60
    /// - `INPUT_WRITES_PER_SEC`: default 40
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` or `DEFAULT_CONTROL_MODE` is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` or `DEFAULT_CONTROL_MODE` is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };
        let default_control_mode = match lookup("DEFAULT_CONTROL_MODE") {
            Some(raw) => ControlMode::parse(&raw).ok_or(ConfigError::InvalidControlMode(raw))?,
            None => ControlMode::Free,
        };
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            port,
            database_url,
            default_control_mode,
            client_channel_capacity: parse_or(&lookup, "CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY),
            flush_interval_ms: parse_or(&lookup, "FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS),
            cursor_writes_per_sec: parse_or(&lookup, "CURSOR_WRITES_PER_SEC", DEFAULT_CURSOR_WRITES_PER_SEC),
            input_writes_per_sec: parse_or(&lookup, "INPUT_WRITES_PER_SEC", DEFAULT_INPUT_WRITES_PER_SEC),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            default_control_mode: ControlMode::Free,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            cursor_writes_per_sec: DEFAULT_CURSOR_WRITES_PER_SEC,
            input_writes_per_sec: DEFAULT_INPUT_WRITES_PER_SEC,
        }
    }
}

/// Tuning knobs fall back to their default when missing, unparsable, or zero.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + PartialEq + Default,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| *v != T::default())
        .unwrap_or(default)
}
