//! Relay configuration
//!
//! Tunables shared by the server and the client. Every field has a
//! default, and a JSON file only needs to name the fields it overrides.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `ChatConfig`
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value the relay cannot run with
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server and client tunables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Longest partial line a peer may accumulate before it is dropped
    pub max_line_len: usize,
    /// Most output a peer may have queued before it is dropped
    pub max_output_len: usize,
    /// Read/write calls allowed per socket per service pass
    pub io_attempts: usize,
    /// Bytes requested per read call
    pub read_chunk: usize,
    /// Readiness events collected per multiplexer wait
    pub event_capacity: usize,
    /// Relayed messages kept for `Server::pop_next`
    pub inbox_capacity: usize,
    /// Author name used for lines fed into the server itself
    pub server_name: String,
    /// Upper bound on a client's connect attempt, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_line_len: 1024 * 1024,        // 1 MiB
            max_output_len: 16 * 1024 * 1024, // 16 MiB
            io_attempts: 10,
            read_chunk: 4096,
            event_capacity: 1024,
            inbox_capacity: 1024,
            server_name: "server".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

impl ChatConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ChatConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject values that would stall or break the reactor
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("max_line_len", self.max_line_len),
            ("max_output_len", self.max_output_len),
            ("io_attempts", self.io_attempts),
            ("read_chunk", self.read_chunk),
            ("event_capacity", self.event_capacity),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", field)));
            }
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.server_name.contains('\n') {
            return Err(ConfigError::Invalid(
                "server_name must not contain a newline".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
