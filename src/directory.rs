//! Directory service client
//!
//! The directory maps a username to its currently assigned chat shard
//! and owns the account namespace. Resolution is a single idempotent
//! lookup; retry policy lives entirely in the failover loop.

use crate::error::SessionError;
use crate::store::{SessionRecord, SessionStore};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(rename = "chatServerIp")]
    chat_server_ip: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    status: String,
    message: Option<String>,
    #[serde(rename = "chatServerIp")]
    chat_server_ip: Option<String>,
}

/// Client for the directory service
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: reqwest::Client,
    base: String,
    store: SessionStore,
}

impl DirectoryClient {
    pub fn new(base: impl Into<String>, store: SessionStore, timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base: base.into(),
            store,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Ask the directory which shard currently owns `username`.
    ///
    /// On success the durable shard pointer is updated. On any failure
    /// the pointer is left untouched; a known-good address is never
    /// overwritten with nothing.
    pub async fn resolve(&self, username: &str) -> Result<String, SessionError> {
        let resolution_error = |reason: String| SessionError::Resolution {
            username: username.to_string(),
            reason,
        };

        let url = format!("{}/auth/resolve/{username}", self.base);
        debug!(username, url = %url, "Resolving shard assignment");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| resolution_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(resolution_error(format!(
                "directory returned {}",
                response.status()
            )));
        }

        let body: ResolveResponse = response
            .json()
            .await
            .map_err(|e| resolution_error(e.to_string()))?;

        let address = body.chat_server_ip.ok_or_else(|| {
            resolution_error(body.error.unwrap_or_else(|| "no assignment".to_string()))
        })?;

        self.persist_pointer(username, &address);

        info!(username, shard = %address, "Resolved shard assignment");
        Ok(address)
    }

    /// Full roster of registered usernames, local user included.
    pub async fn roster(&self) -> Result<Vec<String>, SessionError> {
        let url = format!("{}/auth/users", self.base);

        let response = self.client.get(&url).send().await.map_err(|e| SessionError::Load {
            shard: self.base.clone(),
            source: Box::new(e),
        })?;

        response.json().await.map_err(|e| SessionError::Load {
            shard: self.base.clone(),
            source: Box::new(e),
        })
    }

    /// Log in and record the assigned shard. Returns the shard address
    /// the directory handed out.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, SessionError> {
        let body = self
            .post_auth("login", username, password)
            .await?;

        if body.status != "success" {
            return Err(SessionError::Auth {
                message: body.message.unwrap_or_else(|| "login failed".to_string()),
            });
        }

        let address = body.chat_server_ip.ok_or_else(|| SessionError::Auth {
            message: "login response carried no shard address".to_string(),
        })?;

        self.persist_pointer(username, &address);

        info!(username, shard = %address, "Logged in");
        Ok(address)
    }

    /// Create an account. The directory assigns the new user to a shard
    /// as a side effect; the client picks it up at login.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let body = self.post_auth("register", username, password).await?;

        if body.status != "success" {
            return Err(SessionError::Auth {
                message: body
                    .message
                    .unwrap_or_else(|| "registration failed".to_string()),
            });
        }

        info!(username, "Registered");
        Ok(())
    }

    async fn post_auth(
        &self,
        endpoint: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthResponse, SessionError> {
        let url = format!("{}/auth/{endpoint}", self.base);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| SessionError::Auth {
                message: format!("directory unreachable: {e}"),
            })?;

        response.json().await.map_err(|e| SessionError::Auth {
            message: format!("malformed directory response: {e}"),
        })
    }

    /// Update the durable record. The pointer is an optimization, not a
    /// source of truth, so a write failure downgrades to a warning.
    fn persist_pointer(&self, username: &str, address: &str) {
        let record = SessionRecord {
            username: username.to_string(),
            chat_server: address.to_string(),
            auth_server: self.base.clone(),
        };
        if let Err(e) = self.store.save(&record) {
            warn!(error = %e, "Failed to persist shard pointer");
        }
    }
}
