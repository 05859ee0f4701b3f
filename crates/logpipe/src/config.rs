// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::error::PipeError;
use crate::transport::PeerIdentity;
use crate::value::DEFAULT_MAX_DEPTH;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_CHUNK_SIZE_LIMIT: usize = 20_480;
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_millis(10_000);
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Tunables for one pipe instance.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Session this process streams under; observers must join with the same id.
    pub session_id: String,
    /// Role a peer must carry to count as an observer (e.g. `web`)
    pub observer_role: String,
    /// Role this agent announces itself with in presence
    pub agent_role: String,
    /// Topic entries are published on
    pub log_topic: String,
    /// Topic control acknowledgements are echoed on
    pub feedback_topic: String,
    /// Maximum queued entries before the oldest is evicted
    pub queue_capacity: usize,
    /// Payloads of at least this many bytes are chunked
    pub chunk_size_limit: usize,
    /// Wait between retries after a transient failure
    pub retry_cooldown: Duration,
    /// zstd level used for payload compression
    pub compression_level: i32,
    /// Nesting depth kept when classifying captured values
    pub max_value_depth: usize,
    /// Log level for the pipe's own diagnostics, applied by
    /// [`logger::init`](crate::logger::init)
    pub log_level: String,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            observer_role: "web".to_string(),
            agent_role: "package".to_string(),
            log_topic: "logs".to_string(),
            feedback_topic: "feedback".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            chunk_size_limit: DEFAULT_CHUNK_SIZE_LIMIT,
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_value_depth: DEFAULT_MAX_DEPTH,
            log_level: "info".to_string(),
        }
    }
}

impl PipeConfig {
    /// Defaults for `session_id`.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, PipeError> {
        let defaults = Self::default();

        let session_id = env::var("LOGPIPE_SESSION_ID").unwrap_or_default();
        let observer_role =
            env::var("LOGPIPE_OBSERVER_ROLE").unwrap_or(defaults.observer_role);
        let queue_capacity = env::var("LOGPIPE_QUEUE_CAPACITY")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let chunk_size_limit = env::var("LOGPIPE_CHUNK_SIZE_LIMIT")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CHUNK_SIZE_LIMIT);
        let retry_cooldown = env::var("LOGPIPE_RETRY_COOLDOWN_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(DEFAULT_RETRY_COOLDOWN, Duration::from_millis);
        let compression_level = env::var("LOGPIPE_COMPRESSION_LEVEL")
            .ok()
            .and_then(|val| val.parse::<i32>().ok())
            .unwrap_or(DEFAULT_COMPRESSION_LEVEL);
        let log_level = env::var("LOGPIPE_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            session_id,
            observer_role,
            queue_capacity,
            chunk_size_limit,
            retry_cooldown,
            compression_level,
            log_level,
            ..Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PipeError> {
        validate_identity_part("session id", &self.session_id)?;
        validate_identity_part("observer role", &self.observer_role)?;
        validate_identity_part("agent role", &self.agent_role)?;

        if self.queue_capacity == 0 {
            return Err(PipeError::InvalidConfig(
                "queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.chunk_size_limit == 0 {
            return Err(PipeError::InvalidConfig(
                "chunk size limit must be greater than 0".to_string(),
            ));
        }

        if !(1..=22).contains(&self.compression_level) {
            return Err(PipeError::InvalidConfig(format!(
                "compression level {} is outside 1..=22",
                self.compression_level
            )));
        }

        if self.log_topic.trim().is_empty() || self.feedback_topic.trim().is_empty() {
            return Err(PipeError::InvalidConfig(
                "topics cannot be empty".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(PipeError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Identity this agent should announce in presence.
    #[must_use]
    pub fn agent_identity(&self) -> PeerIdentity {
        PeerIdentity::new(self.agent_role.clone(), self.session_id.clone())
    }

    /// Whether `peer` is an observer of this pipe's session.
    #[must_use]
    pub fn is_observer(&self, peer: &PeerIdentity) -> bool {
        peer.role == self.observer_role && peer.session_id == self.session_id
    }
}

fn validate_identity_part(what: &str, value: &str) -> Result<(), PipeError> {
    if value.trim().is_empty() {
        return Err(PipeError::InvalidConfig(format!("{what} cannot be empty")));
    }
    if value.contains('|') {
        return Err(PipeError::InvalidConfig(format!(
            "{what} '{value}' cannot contain '|'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: [&str; 7] = [
        "LOGPIPE_SESSION_ID",
        "LOGPIPE_OBSERVER_ROLE",
        "LOGPIPE_QUEUE_CAPACITY",
        "LOGPIPE_CHUNK_SIZE_LIMIT",
        "LOGPIPE_RETRY_COOLDOWN_MS",
        "LOGPIPE_COMPRESSION_LEVEL",
        "LOGPIPE_LOG_LEVEL",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults() {
        let config = PipeConfig::new("session-1");
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.chunk_size_limit, 20_480);
        assert_eq!(config.retry_cooldown, Duration::from_millis(10_000));
        assert_eq!(config.agent_identity().to_string(), "package|session-1");
    }

    #[test]
    fn test_validate_requires_session() {
        assert!(PipeConfig::default().validate().is_err());
        assert!(PipeConfig::new("   ").validate().is_err());
        assert!(PipeConfig::new("a|b").validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = PipeConfig {
            queue_capacity: 0,
            ..PipeConfig::new("s")
        };
        assert!(config.validate().is_err());

        let config = PipeConfig {
            chunk_size_limit: 0,
            ..PipeConfig::new("s")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_compression_level() {
        for level in [0, 23, -1] {
            let config = PipeConfig {
                compression_level: level,
                ..PipeConfig::new("s")
            };
            assert!(config.validate().is_err(), "level {level} should be invalid");
        }
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = PipeConfig {
            log_level: "verbose".to_string(),
            ..PipeConfig::new("s")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_observer() {
        let config = PipeConfig::new("s1");
        assert!(config.is_observer(&PeerIdentity::new("web", "s1")));
        assert!(!config.is_observer(&PeerIdentity::new("web", "s2")));
        assert!(!config.is_observer(&PeerIdentity::new("package", "s1")));
    }

    #[test]
    #[serial]
    fn test_from_env_with_overrides() {
        clear_env();
        env::set_var("LOGPIPE_SESSION_ID", "machine-42");
        env::set_var("LOGPIPE_QUEUE_CAPACITY", "25");
        env::set_var("LOGPIPE_CHUNK_SIZE_LIMIT", "1024");
        env::set_var("LOGPIPE_RETRY_COOLDOWN_MS", "250");
        env::set_var("LOGPIPE_LOG_LEVEL", "DEBUG");

        let config = PipeConfig::from_env().expect("config should load");
        assert_eq!(config.session_id, "machine-42");
        assert_eq!(config.queue_capacity, 25);
        assert_eq!(config.chunk_size_limit, 1024);
        assert_eq!(config.retry_cooldown, Duration::from_millis(250));
        assert_eq!(config.log_level, "debug");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_falls_back_on_garbage() {
        clear_env();
        env::set_var("LOGPIPE_SESSION_ID", "machine-42");
        env::set_var("LOGPIPE_QUEUE_CAPACITY", "lots");
        env::set_var("LOGPIPE_RETRY_COOLDOWN_MS", "-5");

        let config = PipeConfig::from_env().expect("config should load");
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.retry_cooldown, DEFAULT_RETRY_COOLDOWN);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_without_session_fails() {
        clear_env();
        assert!(matches!(
            PipeConfig::from_env(),
            Err(PipeError::InvalidConfig(_))
        ));
    }
}
