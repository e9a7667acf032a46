//! Local projections and reconciliation
//!
//! Three views live here: the timeline, per-peer chat threads, and the
//! follow map. Bulk loads rebuild them from a shard; push events fold
//! into them incrementally. All fetches complete before any projection
//! is touched, so a failed load leaves the previous views intact.

use crate::directory::DirectoryClient;
use crate::error::SessionError;
use crate::events::{peer_of, ChatMessage, PostMessage, PushEvent, User};
use crate::shard_api::ShardApi;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Merge the directory roster with the shard's follow data.
///
/// The local user never appears in the result; users absent from the
/// shard's follow data default to `followed = false`.
pub fn merge_users(local_user: &str, roster: &[String], follow_data: &[User]) -> Vec<User> {
    roster
        .iter()
        .filter(|username| username.as_str() != local_user)
        .map(|username| User {
            username: username.clone(),
            followed: follow_data
                .iter()
                .any(|u| &u.username == username && u.followed),
        })
        .collect()
}

#[derive(Debug)]
struct ReconcilerInner {
    local_user: String,
    users: RwLock<Vec<User>>,
    timeline: RwLock<Vec<PostMessage>>,
    threads: DashMap<String, Vec<ChatMessage>>,
    loaded_from: RwLock<Option<String>>,
    events_folded: AtomicU64,
}

/// Shared projections for one logged-in session
#[derive(Debug, Clone)]
pub struct StateReconciler {
    inner: Arc<ReconcilerInner>,
}

impl StateReconciler {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                local_user: local_user.into(),
                users: RwLock::new(Vec::new()),
                timeline: RwLock::new(Vec::new()),
                threads: DashMap::new(),
                loaded_from: RwLock::new(None),
                events_folded: AtomicU64::new(0),
            }),
        }
    }

    pub fn local_user(&self) -> &str {
        &self.inner.local_user
    }

    /// True when state has never been loaded from `shard`. Reconnecting
    /// to the shard the views already came from needs no reload.
    pub fn needs_load(&self, shard: &str) -> bool {
        self.inner.loaded_from.read().unwrap().as_deref() != Some(shard)
    }

    pub fn loaded_from(&self) -> Option<String> {
        self.inner.loaded_from.read().unwrap().clone()
    }

    /// Rebuild every projection from `shard` plus the directory roster.
    pub async fn bulk_load(
        &self,
        directory: &DirectoryClient,
        shard_api: &ShardApi,
        shard: &str,
    ) -> Result<(), SessionError> {
        let local_user = self.inner.local_user.clone();

        let roster = directory.roster().await?;
        let follow_data = shard_api.users(shard, &local_user).await?;
        let timeline = shard_api.timeline(shard, &local_user).await?;
        let chats = shard_api.chats(shard, &local_user).await?;

        let merged = merge_users(&local_user, &roster, &follow_data);
        debug!(
            users = merged.len(),
            posts = timeline.len(),
            threads = chats.len(),
            "Bulk load fetched"
        );

        *self.inner.users.write().unwrap() = merged;
        *self.inner.timeline.write().unwrap() = timeline;
        self.inner.threads.clear();
        for (peer, messages) in chats {
            self.inner.threads.insert(peer, messages);
        }
        *self.inner.loaded_from.write().unwrap() = Some(shard.to_string());

        info!(shard, "Projections reloaded");
        Ok(())
    }

    /// Fold one push event into the projections, in arrival order.
    ///
    /// The wire format carries no message id, so a re-subscription
    /// after reconnect can deliver the same logical message again and
    /// it will appear twice.
    pub fn fold(&self, event: PushEvent) {
        match event {
            PushEvent::Timeline(post) => {
                self.inner.timeline.write().unwrap().push(post);
            }
            PushEvent::Chat(msg) => {
                let peer = peer_of(&self.inner.local_user, &msg).to_string();
                self.inner.threads.entry(peer).or_default().push(msg);
            }
        }
        self.inner.events_folded.fetch_add(1, Ordering::Relaxed);
    }

    /// Flip one user's follow flag after the shard acknowledged the
    /// change. Unknown targets are ignored.
    pub fn apply_follow(&self, target: &str, followed: bool) {
        let mut users = self.inner.users.write().unwrap();
        if let Some(user) = users.iter_mut().find(|u| u.username == target) {
            user.followed = followed;
        }
    }

    /// Drop every projection (logout).
    pub fn clear(&self) {
        self.inner.users.write().unwrap().clear();
        self.inner.timeline.write().unwrap().clear();
        self.inner.threads.clear();
        *self.inner.loaded_from.write().unwrap() = None;
    }

    // --- snapshots for the UI and health surface ---

    pub fn users(&self) -> Vec<User> {
        self.inner.users.read().unwrap().clone()
    }

    pub fn timeline(&self) -> Vec<PostMessage> {
        self.inner.timeline.read().unwrap().clone()
    }

    pub fn thread(&self, peer: &str) -> Vec<ChatMessage> {
        self.inner
            .threads
            .get(peer)
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn thread_count(&self) -> usize {
        self.inner.threads.len()
    }

    pub fn timeline_len(&self) -> usize {
        self.inner.timeline.read().unwrap().len()
    }

    pub fn user_count(&self) -> usize {
        self.inner.users.read().unwrap().len()
    }

    pub fn events_folded(&self) -> u64 {
        self.inner.events_folded.load(Ordering::Relaxed)
    }
}
