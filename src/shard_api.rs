//! Shard REST client
//!
//! Bulk-load and follow endpoints on a chat shard. Calls are
//! parameterized by the shard address so a failover needs no rebuild.

use crate::error::SessionError;
use crate::events::{ChatMessage, PostMessage, User};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Client for a chat shard's REST surface
#[derive(Debug, Clone)]
pub struct ShardApi {
    client: reqwest::Client,
}

impl ShardApi {
    pub fn new(timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    fn load_error(shard: &str, source: reqwest::Error) -> SessionError {
        SessionError::Load {
            shard: shard.to_string(),
            source: Box::new(source),
        }
    }

    /// Users known to the shard with the viewer's follow flags.
    pub async fn users(&self, shard: &str, current_user: &str) -> Result<Vec<User>, SessionError> {
        let url = format!("{shard}/chat/users");
        debug!(shard, current_user, "Fetching follow data");

        self.client
            .get(&url)
            .query(&[("currentUser", current_user)])
            .send()
            .await
            .map_err(|e| Self::load_error(shard, e))?
            .error_for_status()
            .map_err(|e| Self::load_error(shard, e))?
            .json()
            .await
            .map_err(|e| Self::load_error(shard, e))
    }

    /// The viewer's timeline, oldest first.
    pub async fn timeline(
        &self,
        shard: &str,
        current_user: &str,
    ) -> Result<Vec<PostMessage>, SessionError> {
        let url = format!("{shard}/chat/timeline");
        debug!(shard, current_user, "Fetching timeline");

        self.client
            .get(&url)
            .query(&[("currentUser", current_user)])
            .send()
            .await
            .map_err(|e| Self::load_error(shard, e))?
            .error_for_status()
            .map_err(|e| Self::load_error(shard, e))?
            .json()
            .await
            .map_err(|e| Self::load_error(shard, e))
    }

    /// Full chat history, keyed by peer.
    pub async fn chats(
        &self,
        shard: &str,
        username: &str,
    ) -> Result<HashMap<String, Vec<ChatMessage>>, SessionError> {
        let url = format!("{shard}/chat/chats");
        debug!(shard, username, "Fetching chat history");

        self.client
            .get(&url)
            .query(&[("username", username)])
            .send()
            .await
            .map_err(|e| Self::load_error(shard, e))?
            .error_for_status()
            .map_err(|e| Self::load_error(shard, e))?
            .json()
            .await
            .map_err(|e| Self::load_error(shard, e))
    }

    /// Follow or unfollow `target` on behalf of `current_user`.
    pub async fn set_follow(
        &self,
        shard: &str,
        current_user: &str,
        target: &str,
        follow: bool,
    ) -> Result<(), SessionError> {
        let action = if follow { "follow" } else { "unfollow" };
        let url = format!("{shard}/chat/{action}");
        debug!(shard, current_user, target, action, "Updating follow state");

        let follow_error = |source: reqwest::Error| SessionError::Follow {
            target: target.to_string(),
            source: Box::new(source),
        };

        self.client
            .post(&url)
            .query(&[("currentUser", current_user), ("targetUser", target)])
            .send()
            .await
            .map_err(follow_error)?
            .error_for_status()
            .map_err(follow_error)?;

        Ok(())
    }
}
