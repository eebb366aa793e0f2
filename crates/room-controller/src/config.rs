//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; a `HashMap`-driven path exists for tests.

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum number of concurrently live rooms.
pub const DEFAULT_MAX_ROOMS: u32 = 1024;

/// Default maximum number of peers per room.
pub const DEFAULT_MAX_PEERS_PER_ROOM: u32 = 64;

/// Default controller instance ID prefix.
pub const DEFAULT_RC_ID_PREFIX: &str = "rc";

/// Media engine backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineBackend {
    /// In-process loopback engine (development and tests).
    Local,
}

impl EngineBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "local" => Ok(EngineBackend::Local),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown engine backend: {other}"
            ))),
        }
    }
}

/// Room Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this controller instance.
    pub rc_id: String,

    /// Maximum concurrently live rooms.
    pub max_rooms: u32,

    /// Maximum peers in a single room.
    pub max_peers_per_room: u32,

    /// Which media engine backend to run against.
    pub engine_backend: EngineBackend,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("health_bind_address", &self.health_bind_address)
            .field("rc_id", &self.rc_id)
            .field("max_rooms", &self.max_rooms)
            .field("max_peers_per_room", &self.max_peers_per_room)
            .field("engine_backend", &self.engine_backend)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_rooms = vars
            .get("RC_MAX_ROOMS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_ROOMS);

        let max_peers_per_room = vars
            .get("RC_MAX_PEERS_PER_ROOM")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_PEERS_PER_ROOM);

        let engine_backend = match vars.get("RC_ENGINE_BACKEND") {
            Some(value) => EngineBackend::parse(value)?,
            None => EngineBackend::Local,
        };

        // Generate an instance ID when none is configured
        let rc_id = vars.get("RC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            health_bind_address,
            rc_id,
            max_rooms,
            max_peers_per_room,
            engine_backend,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = HashMap::new();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_rooms, DEFAULT_MAX_ROOMS);
        assert_eq!(config.max_peers_per_room, DEFAULT_MAX_PEERS_PER_ROOM);
        assert_eq!(config.engine_backend, EngineBackend::Local);
        // Instance ID should be auto-generated
        assert!(config.rc_id.starts_with("rc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            (
                "RC_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:8082".to_string(),
            ),
            ("RC_MAX_ROOMS".to_string(), "16".to_string()),
            ("RC_MAX_PEERS_PER_ROOM".to_string(), "4".to_string()),
            ("RC_ENGINE_BACKEND".to_string(), "local".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.health_bind_address, "127.0.0.1:8082");
        assert_eq!(config.max_rooms, 16);
        assert_eq!(config.max_peers_per_room, 4);
        assert_eq!(config.engine_backend, EngineBackend::Local);
    }

    #[test]
    fn test_rc_id_custom_value() {
        let vars = HashMap::from([("RC_ID".to_string(), "rc-custom-001".to_string())]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.rc_id, "rc-custom-001");
    }

    #[test]
    fn test_unknown_engine_backend_rejected() {
        let vars = HashMap::from([("RC_ENGINE_BACKEND".to_string(), "mediasoup".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
