//! Domain error types for the session layer.
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All application code returns Result<T, SessionError>.

use thiserror::Error;

/// Session domain errors
///
/// Every variant carries structured context fields for diagnostics.
/// Callers pattern-match on the variant to understand the failure mode
/// without parsing error message strings. None of these terminate the
/// session; they are routed into the failover loop.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Directory unreachable or returned no usable shard address
    #[error("shard resolution failed for '{username}': {reason}")]
    Resolution { username: String, reason: String },

    /// Transport failed to open or closed unexpectedly
    #[error("connection to shard '{shard}' failed")]
    Connection {
        shard: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Malformed push frame received from the shard
    #[error("malformed frame on topic '{topic}': {detail}")]
    Protocol { topic: String, detail: String },

    /// Transport-level send failure (no delivery confirmation implied)
    #[error("publish to '{destination}' failed: {reason}")]
    Publish { destination: String, reason: String },

    /// Bulk fetch of roster/timeline/chat history failed
    #[error("bulk load from shard '{shard}' failed")]
    Load {
        shard: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Follow/unfollow call rejected or unreachable
    #[error("follow update for '{target}' failed")]
    Follow {
        target: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Login or registration rejected by the directory service
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable session record could not be read or written
    #[error("session store error at '{path}'")]
    Store {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl SessionError {
    /// Returns a static label string suitable for metrics.
    ///
    /// Used as the `error_type` label on `session_errors_total`,
    /// enabling per-error-type monitoring.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Resolution { .. } => "resolution",
            Self::Connection { .. } => "connection",
            Self::Protocol { .. } => "protocol",
            Self::Publish { .. } => "publish",
            Self::Load { .. } => "load",
            Self::Follow { .. } => "follow",
            Self::Auth { .. } => "auth",
            Self::Config(_) => "config",
            Self::Store { .. } => "store",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_error() -> Box<dyn std::error::Error + Send + Sync> {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, "test"))
    }

    #[test]
    fn every_variant_has_distinct_error_type_label() {
        let labels = [
            SessionError::Resolution {
                username: "alice".to_string(),
                reason: "directory unreachable".to_string(),
            }
            .error_type_label(),
            SessionError::Connection {
                shard: "http://shard1:9090".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            SessionError::Protocol {
                topic: "chat-alice".to_string(),
                detail: "not json".to_string(),
            }
            .error_type_label(),
            SessionError::Publish {
                destination: "/app/chat".to_string(),
                reason: "writer gone".to_string(),
            }
            .error_type_label(),
            SessionError::Load {
                shard: "http://shard1:9090".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            SessionError::Follow {
                target: "carol".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            SessionError::Auth {
                message: "bad password".to_string(),
            }
            .error_type_label(),
            SessionError::Config("USERNAME must be set".to_string()).error_type_label(),
            SessionError::Store {
                path: "/tmp/session.json".to_string(),
                source: test_error(),
            }
            .error_type_label(),
        ];

        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len(), "Duplicate error_type_label found");
    }

    #[test]
    fn error_messages_contain_context() {
        let err = SessionError::Resolution {
            username: "alice".to_string(),
            reason: "no assignment".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alice"), "message should contain username");
        assert!(msg.contains("no assignment"), "message should contain reason");

        let err = SessionError::Publish {
            destination: "/app/post".to_string(),
            reason: "closed".to_string(),
        };
        assert!(err.to_string().contains("/app/post"));

        let err = SessionError::Protocol {
            topic: "timeline-bob".to_string(),
            detail: "expected object".to_string(),
        };
        assert!(err.to_string().contains("timeline-bob"));
    }

    #[test]
    fn config_error_preserves_message() {
        let err = SessionError::Config("USERNAME must be set".to_string());
        assert_eq!(err.to_string(), "configuration error: USERNAME must be set");
    }
}
