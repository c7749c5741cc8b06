//! Runtime configuration
//!
//! Values come from `CHAT_HUB_*` environment variables with defaults
//! for everything. The bind address can also be given as the first
//! command-line argument.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::history::DEFAULT_HISTORY_LIMIT;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Channel buffer size for room commands
pub const COMMAND_BUFFER_SIZE: usize = 256;

const DEFAULT_SEND_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_IDENTITY_TIMEOUT_MS: u64 = 10_000;

/// Per-room settings, fixed when the room is created
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Retained history length
    pub history_limit: usize,
    /// Upper bound on a single fan-out delivery
    pub send_timeout: Duration,
    /// Depth of the room's command queue
    pub command_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            command_buffer: COMMAND_BUFFER_SIZE,
        }
    }
}

/// Server settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub addr: String,
    /// Settings applied to every room
    pub room: RoomConfig,
    /// How long a new connection may take to identify itself
    pub identity_timeout: Duration,
    /// Create the default rooms on startup
    pub seed_default_rooms: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            room: RoomConfig::default(),
            identity_timeout: Duration::from_millis(DEFAULT_IDENTITY_TIMEOUT_MS),
            seed_default_rooms: true,
        }
    }
}

impl Config {
    /// Load from the process environment and command line
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::from_lookup(|key| env::var(key).ok())?;
        if let Some(addr) = env::args().nth(1) {
            config.addr = addr;
        }
        Ok(config)
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let addr = lookup("CHAT_HUB_ADDR").unwrap_or(defaults.addr);
        let history_limit =
            parse_var(&lookup, "CHAT_HUB_HISTORY_LIMIT")?.unwrap_or(defaults.room.history_limit);
        let send_timeout = parse_var(&lookup, "CHAT_HUB_SEND_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.room.send_timeout);
        let identity_timeout = parse_var(&lookup, "CHAT_HUB_IDENTITY_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.identity_timeout);
        let seed_default_rooms =
            parse_var(&lookup, "CHAT_HUB_SEED_ROOMS")?.unwrap_or(defaults.seed_default_rooms);

        Ok(Self {
            addr,
            room: RoomConfig {
                history_limit,
                send_timeout,
                command_buffer: defaults.room.command_buffer,
            },
            identity_timeout,
            seed_default_rooms,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{}={:?}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.room.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(config.room.send_timeout, Duration::from_secs(1));
        assert!(config.seed_default_rooms);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("CHAT_HUB_ADDR", "0.0.0.0:9000"),
            ("CHAT_HUB_HISTORY_LIMIT", "5"),
            ("CHAT_HUB_SEND_TIMEOUT_MS", "250"),
            ("CHAT_HUB_SEED_ROOMS", "false"),
        ]))
        .unwrap();
        assert_eq!(config.addr, "0.0.0.0:9000");
        assert_eq!(config.room.history_limit, 5);
        assert_eq!(config.room.send_timeout, Duration::from_millis(250));
        assert!(!config.seed_default_rooms);
    }

    #[test]
    fn test_invalid_value() {
        let err = Config::from_lookup(lookup_from(&[("CHAT_HUB_HISTORY_LIMIT", "lots")]));
        assert!(matches!(err, Err(AppError::Config(_))));
    }
}
