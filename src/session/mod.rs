//! Session manager
//!
//! Owns the resolver, the single shard connection, and the local
//! projections for one logged-in user, and drives the failover loop:
//! every failure signal gets one resolution attempt, a reconnect only
//! when the directory hands back a different shard, and an explicit
//! stop otherwise. No failure terminates the session.

pub mod connection;
pub mod phase;

pub use connection::{ws_url, SessionConnection};
pub use phase::{ConnectionPhase, PhaseCell};

use crate::config::SessionConfig;
use crate::directory::DirectoryClient;
use crate::error::SessionError;
use crate::events::{destinations, now_millis, ChatMessage, PostMessage, PushEvent, User};
use crate::metrics::SessionMetrics;
use crate::reconcile::StateReconciler;
use crate::retry::{run_failover, FailoverOutcome, FailureKind, FailureSignal};
use crate::shard_api::ShardApi;
use crate::store::SessionStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type Receivers = (mpsc::Receiver<FailureSignal>, mpsc::Receiver<PushEvent>);

/// One logged-in session
pub struct Session {
    config: SessionConfig,
    directory: DirectoryClient,
    shard_api: ShardApi,
    connection: Arc<SessionConnection>,
    reconciler: StateReconciler,
    store: SessionStore,
    metrics: SessionMetrics,
    failure_tx: mpsc::Sender<FailureSignal>,
    receivers: Mutex<Option<Receivers>>,
}

impl Session {
    pub fn new(config: SessionConfig, metrics: SessionMetrics) -> Result<Self, SessionError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let store = SessionStore::new(config.state_path.clone());
        let directory = DirectoryClient::new(config.auth_server.clone(), store.clone(), timeout)?;
        let shard_api = ShardApi::new(timeout)?;
        let reconciler = StateReconciler::new(config.username.clone());

        let (failure_tx, failure_rx) = mpsc::channel(32);
        let (push_tx, push_rx) = mpsc::channel(256);

        let connection = Arc::new(SessionConnection::new(
            config.username.clone(),
            PhaseCell::new(),
            push_tx,
            failure_tx.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            directory,
            shard_api,
            connection,
            reconciler,
            store,
            metrics,
            failure_tx,
            receivers: Mutex::new(Some((failure_rx, push_rx))),
        })
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.connection.phase()
    }

    pub fn shard(&self) -> Option<String> {
        self.connection.shard()
    }

    pub fn connection(&self) -> Arc<SessionConnection> {
        Arc::clone(&self.connection)
    }

    pub fn reconciler(&self) -> StateReconciler {
        self.reconciler.clone()
    }

    // --- view snapshots for the UI layer ---

    pub fn users(&self) -> Vec<User> {
        self.reconciler.users()
    }

    pub fn timeline(&self) -> Vec<PostMessage> {
        self.reconciler.timeline()
    }

    pub fn thread(&self, peer: &str) -> Vec<ChatMessage> {
        self.reconciler.thread(peer)
    }

    /// Where the first connect should go: the durable record, then the
    /// configured seed, then a fresh resolution.
    async fn initial_address(&self) -> Result<String, SessionError> {
        match self.store.load() {
            Ok(Some(record)) if record.username == self.config.username => {
                debug!(shard = %record.chat_server, "Using durable shard pointer");
                return Ok(record.chat_server);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable session record"),
        }

        if let Some(seed) = &self.config.chat_server {
            return Ok(seed.clone());
        }

        self.metrics.record_resolution();
        self.directory.resolve(&self.config.username).await
    }

    /// First connect and initial bulk load. An unreachable seed shard
    /// goes through the same failover path as a mid-session loss.
    pub async fn start(&self) {
        let address = match self.initial_address().await {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "No shard address at startup");
                self.metrics.record_error(e.error_type_label());
                return;
            }
        };

        match self.connection.connect(&address).await {
            Ok(_) => self.sync_state().await,
            Err(e) => {
                warn!(error = %e, "Initial connect failed");
                self.metrics.record_error(e.error_type_label());
                let signal =
                    FailureSignal::new(FailureKind::TransportClosed, self.connection.current_epoch());
                self.handle_failure(signal).await;
            }
        }
    }

    /// Drive the session until every channel closes. Push deliveries
    /// fold into the projections; failure signals run the failover
    /// policy. Single consumer: later calls return immediately.
    pub async fn run(&self) {
        let Some((mut failure_rx, mut push_rx)) = self.receivers.lock().unwrap().take() else {
            warn!("Session loop already started");
            return;
        };

        loop {
            tokio::select! {
                Some(signal) = failure_rx.recv() => self.handle_failure(signal).await,
                Some(event) = push_rx.recv() => {
                    let kind = match &event {
                        PushEvent::Timeline(_) => "timeline",
                        PushEvent::Chat(_) => "chat",
                    };
                    self.reconciler.fold(event);
                    self.metrics.record_event_folded(kind);
                }
                else => break,
            }
        }

        info!("Session loop ended");
    }

    /// The uniform failover policy: one resolution, reconnect only to a
    /// different shard, explicit stop otherwise. Signals stamped with a
    /// superseded connection epoch are discarded, so a stale failure
    /// can never clobber a newer, already-successful reconnect.
    async fn handle_failure(&self, signal: FailureSignal) {
        if signal.is_stale(self.connection.current_epoch()) {
            debug!(kind = signal.kind.as_str(), epoch = signal.epoch, "Discarding stale failure signal");
            self.metrics.record_stale_signal();
            return;
        }

        warn!(
            kind = signal.kind.as_str(),
            epoch = signal.epoch,
            "Failure signal; resolving shard assignment"
        );
        self.metrics.record_failure(signal.kind.as_str());

        let cell = self.connection.phase_cell();
        cell.transition(ConnectionPhase::Resolving);

        let current = self.connection.shard();
        self.metrics.record_resolution();
        let outcome = run_failover(
            || self.directory.resolve(&self.config.username),
            self.config.resolve_attempts,
            current.as_deref(),
        )
        .await;

        match outcome {
            FailoverOutcome::Reconnect(address) => match self.connection.connect(&address).await {
                Ok(_) => self.sync_state().await,
                Err(e) => {
                    warn!(error = %e, "Reconnect failed");
                    self.metrics.record_error(e.error_type_label());
                    cell.transition(ConnectionPhase::Disconnected);
                }
            },
            FailoverOutcome::Stop => {
                info!("No alternative shard; stopping reconnection");
                cell.transition(ConnectionPhase::Disconnected);
            }
        }
    }

    /// Reload the projections when the connection points at a shard the
    /// views did not come from. On a failed load: one resolution, and
    /// one more load only against a different shard (`reload_retry`
    /// bounds the extra rounds; the default matches the source's
    /// single retry). Exhausting the bound keeps the stale views.
    async fn sync_state(&self) {
        let Some(mut shard) = self.connection.shard() else {
            return;
        };

        if !self.reconciler.needs_load(&shard) {
            debug!(shard, "Views already loaded from this shard");
            return;
        }

        match self
            .reconciler
            .bulk_load(&self.directory, &self.shard_api, &shard)
            .await
        {
            Ok(()) => {
                self.metrics.record_bulk_load();
                return;
            }
            Err(e) => {
                warn!(shard, error = %e, "Bulk load failed");
                self.metrics.record_failure(FailureKind::Load.as_str());
                self.metrics.record_error(e.error_type_label());
            }
        }

        let cell = self.connection.phase_cell();
        for _ in 0..self.config.reload_retry {
            cell.transition(ConnectionPhase::Resolving);
            self.metrics.record_resolution();
            let outcome = run_failover(
                || self.directory.resolve(&self.config.username),
                self.config.resolve_attempts,
                Some(shard.as_str()),
            )
            .await;

            let FailoverOutcome::Reconnect(next) = outcome else {
                info!("No alternative shard after failed load; keeping stale views");
                cell.transition(ConnectionPhase::Disconnected);
                return;
            };

            if let Err(e) = self.connection.connect(&next).await {
                warn!(shard = %next, error = %e, "Reconnect after failed load failed");
                self.metrics.record_error(e.error_type_label());
                cell.transition(ConnectionPhase::Disconnected);
                return;
            }

            match self
                .reconciler
                .bulk_load(&self.directory, &self.shard_api, &next)
                .await
            {
                Ok(()) => {
                    self.metrics.record_bulk_load();
                    return;
                }
                Err(e) => {
                    warn!(shard = %next, error = %e, "Retried bulk load failed");
                    self.metrics.record_error(e.error_type_label());
                    shard = next;
                }
            }
        }
    }

    async fn signal_failure(&self, kind: FailureKind) {
        let signal = FailureSignal::new(kind, self.connection.current_epoch());
        if self.failure_tx.send(signal).await.is_err() {
            warn!("Failure channel closed");
        }
    }

    /// Send a direct message. The shard echoes it back on the sender's
    /// chat topic, so the local thread is updated by the fold, not here.
    pub async fn send_chat(&self, to: &str, text: &str) -> Result<(), SessionError> {
        let msg = ChatMessage {
            from: self.config.username.clone(),
            to: to.to_string(),
            text: text.to_string(),
            timestamp: now_millis(),
        };
        let body = serde_json::to_value(&msg).map_err(|e| SessionError::Publish {
            destination: destinations::CHAT.to_string(),
            reason: e.to_string(),
        })?;

        match self.connection.publish(destinations::CHAT, body).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.signal_failure(FailureKind::Publish).await;
                Err(e)
            }
        }
    }

    /// Post to the timeline. Delivery back to the author's own feed
    /// also arrives over the push topic.
    pub async fn send_post(&self, text: &str) -> Result<(), SessionError> {
        let post = PostMessage {
            from: self.config.username.clone(),
            text: text.to_string(),
            timestamp: now_millis(),
        };
        let body = serde_json::to_value(&post).map_err(|e| SessionError::Publish {
            destination: destinations::POST.to_string(),
            reason: e.to_string(),
        })?;

        match self.connection.publish(destinations::POST, body).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.signal_failure(FailureKind::Publish).await;
                Err(e)
            }
        }
    }

    /// Follow or unfollow `target`. The local flag flips only after the
    /// shard acknowledges; on failure the flag is left unchanged and a
    /// resolution is triggered.
    pub async fn toggle_follow(&self, target: &str, follow: bool) -> Result<(), SessionError> {
        let shard = self.connection.shard().ok_or_else(|| SessionError::Follow {
            target: target.to_string(),
            source: "not connected".into(),
        })?;

        match self
            .shard_api
            .set_follow(&shard, &self.config.username, target, follow)
            .await
        {
            Ok(()) => {
                self.reconciler.apply_follow(target, follow);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_error(e.error_type_label());
                self.signal_failure(FailureKind::Follow).await;
                Err(e)
            }
        }
    }

    /// End the session: close the transport, drop the projections, and
    /// clear the durable record.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.connection.teardown().await;
        self.reconciler.clear();
        self.store.clear()?;
        info!(username = %self.config.username, "Logged out");
        Ok(())
    }

    /// Process shutdown: close the transport but keep the durable
    /// record for the next run.
    pub async fn shutdown(&self) {
        self.connection.teardown().await;
    }
}
