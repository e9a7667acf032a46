//! Session configuration module
//!
//! Handles loading configuration from environment variables.

use crate::error::SessionError;
use std::env;
use std::path::PathBuf;

/// Default number of extra bulk-load attempts after a failed load.
/// The source behavior is a single retry against a freshly resolved shard.
pub const DEFAULT_RELOAD_RETRY: u32 = 1;

/// Default number of resolution attempts per failure signal.
pub const DEFAULT_RESOLVE_ATTEMPTS: u32 = 1;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local username the session is scoped to
    pub username: String,

    /// Directory service base URL (resolve, roster, login, register)
    pub auth_server: String,

    /// Seed chat shard address; the durable session record takes
    /// precedence when present
    pub chat_server: Option<String>,

    /// Path of the durable session record (username + shard pointer)
    pub state_path: PathBuf,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Per-request timeout for directory and shard HTTP calls, seconds
    pub request_timeout_secs: u64,

    /// Bulk-load retry bound after a failed load (0 disables the retry)
    pub reload_retry: u32,

    /// Resolution attempts per failure signal
    pub resolve_attempts: u32,
}

impl SessionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, SessionError> {
        dotenvy::dotenv().ok();

        let username = env::var("LINKSTREAM_USERNAME")
            .or_else(|_| env::var("USERNAME"))
            .map_err(|_| SessionError::Config("LINKSTREAM_USERNAME must be set".to_string()))?;

        let auth_server =
            env::var("AUTH_SERVER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

        let chat_server = env::var("CHAT_SERVER_URL").ok();

        let state_path = env::var("SESSION_STATE_PATH")
            .unwrap_or_else(|_| "linkstream-session.json".to_string())
            .into();

        let http_port = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "9090".to_string())
            .parse()
            .map_err(|e| SessionError::Config(format!("HTTP_PORT must be a valid port number: {e}")))?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|e| {
                SessionError::Config(format!("REQUEST_TIMEOUT_SECS must be a valid number: {e}"))
            })?;

        let reload_retry = env::var("RELOAD_RETRY")
            .unwrap_or_else(|_| DEFAULT_RELOAD_RETRY.to_string())
            .parse()
            .map_err(|e| SessionError::Config(format!("RELOAD_RETRY must be a valid number: {e}")))?;

        let resolve_attempts = env::var("RESOLVE_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_RESOLVE_ATTEMPTS.to_string())
            .parse()
            .map_err(|e| {
                SessionError::Config(format!("RESOLVE_ATTEMPTS must be a valid number: {e}"))
            })?;

        Ok(Self {
            username,
            auth_server,
            chat_server,
            state_path,
            http_port,
            log_level,
            request_timeout_secs,
            reload_retry,
            resolve_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SessionConfig {
        SessionConfig {
            username: "alice".to_string(),
            auth_server: "http://localhost:8080".to_string(),
            chat_server: Some("http://localhost:9090".to_string()),
            state_path: "linkstream-session.json".into(),
            http_port: 9090,
            log_level: "info".to_string(),
            request_timeout_secs: 10,
            reload_retry: DEFAULT_RELOAD_RETRY,
            resolve_attempts: DEFAULT_RESOLVE_ATTEMPTS,
        }
    }

    #[test]
    fn retry_bounds_default_to_single_shot() {
        let config = test_config();
        assert_eq!(config.reload_retry, 1);
        assert_eq!(config.resolve_attempts, 1);
    }

    #[test]
    fn default_port_parses() {
        assert_eq!("9090".parse::<u16>().unwrap(), 9090);
    }
}
