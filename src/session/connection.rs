//! Shard transport connection
//!
//! Owns the single live WebSocket to the current chat shard: dial,
//! subscribe, publish, teardown. Failure observations are stamped with
//! the connection epoch and routed to the failover loop; this module
//! never decides recovery policy itself.

use crate::error::SessionError;
use crate::events::{topics, Frame, PushEvent};
use crate::metrics::SessionMetrics;
use crate::retry::{FailureKind, FailureSignal};
use crate::session::phase::{ConnectionPhase, PhaseCell};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Derive the WebSocket endpoint from a shard's HTTP address.
pub fn ws_url(shard: &str) -> String {
    let base = if let Some(rest) = shard.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = shard.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{shard}")
    };
    format!("{}/ws", base.trim_end_matches('/'))
}

/// The single transport connection of a session
pub struct SessionConnection {
    username: String,
    phase: PhaseCell,
    epoch: AtomicU64,
    current_shard: RwLock<Option<String>>,
    writer: Mutex<Option<mpsc::Sender<Message>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    push_tx: mpsc::Sender<PushEvent>,
    failure_tx: mpsc::Sender<FailureSignal>,
    metrics: SessionMetrics,
}

impl SessionConnection {
    pub fn new(
        username: impl Into<String>,
        phase: PhaseCell,
        push_tx: mpsc::Sender<PushEvent>,
        failure_tx: mpsc::Sender<FailureSignal>,
        metrics: SessionMetrics,
    ) -> Self {
        Self {
            username: username.into(),
            phase,
            epoch: AtomicU64::new(0),
            current_shard: RwLock::new(None),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            push_tx,
            failure_tx,
            metrics,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase.get()
    }

    pub fn phase_cell(&self) -> PhaseCell {
        self.phase.clone()
    }

    /// Epoch of the newest connection. Signals stamped with an older
    /// epoch belong to a superseded transport.
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn shard(&self) -> Option<String> {
        self.current_shard.read().unwrap().clone()
    }

    /// Open a transport to `shard` and register exactly the two
    /// per-user subscriptions.
    ///
    /// Idempotent and exclusive: any previous transport is closed
    /// first, teardown errors swallowed. Returns the epoch of the new
    /// connection.
    pub async fn connect(&self, shard: &str) -> Result<u64, SessionError> {
        self.close_transport().await;

        self.phase.transition(ConnectionPhase::Connecting);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let connection_error = |source: tokio_tungstenite::tungstenite::Error| {
            SessionError::Connection {
                shard: shard.to_string(),
                source: Box::new(source),
            }
        };

        let url = ws_url(shard);
        info!(shard, url = %url, epoch, "Connecting to shard");

        let (ws_stream, _) = connect_async(&url).await.map_err(connection_error)?;
        let (mut write, read) = ws_stream.split();

        for topic in [topics::timeline(&self.username), topics::chat(&self.username)] {
            let json = (Frame::Subscribe { topic }).to_json().map_err(|e| {
                SessionError::Connection {
                    shard: shard.to_string(),
                    source: Box::new(e),
                }
            })?;
            write
                .send(Message::Text(json.into()))
                .await
                .map_err(connection_error)?;
        }

        let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(64);

        // Writer task drains the queue into the sink; it ends when the
        // sender is dropped or the sink rejects a write.
        tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(read_loop(
            read,
            msg_tx.clone(),
            self.push_tx.clone(),
            self.failure_tx.clone(),
            epoch,
            self.metrics.clone(),
        ));

        *self.writer.lock().await = Some(msg_tx);
        *self.reader.lock().await = Some(reader_handle);
        *self.current_shard.write().unwrap() = Some(shard.to_string());

        self.phase.transition(ConnectionPhase::Connected);
        self.metrics.record_reconnect(epoch);
        self.metrics.set_connected(true);

        info!(shard, epoch, "Connected and subscribed");
        Ok(epoch)
    }

    /// Send a payload to an app destination. Reports transport-level
    /// send failure only; no delivery confirmation exists.
    pub async fn publish(
        &self,
        destination: &'static str,
        body: serde_json::Value,
    ) -> Result<(), SessionError> {
        let publish_error = |reason: String| SessionError::Publish {
            destination: destination.to_string(),
            reason,
        };

        let json = (Frame::Send {
            destination: destination.to_string(),
            body,
        })
        .to_json()
        .map_err(|e| publish_error(e.to_string()))?;

        let writer = self.writer.lock().await;
        let sender = match writer.as_ref() {
            Some(sender) => sender,
            None => {
                self.metrics.record_publish_failure(destination);
                return Err(publish_error("not connected".to_string()));
            }
        };

        match sender.send(Message::Text(json.into())).await {
            Ok(()) => {
                self.metrics.record_publish(destination);
                Ok(())
            }
            Err(_) => {
                self.metrics.record_publish_failure(destination);
                Err(publish_error("transport writer closed".to_string()))
            }
        }
    }

    /// Close the transport and mark the session disconnected. Safe to
    /// call repeatedly.
    pub async fn teardown(&self) {
        self.close_transport().await;
        self.phase.reset();
        self.metrics.set_connected(false);
        debug!("Transport torn down");
    }

    async fn close_transport(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        // Dropping the sender ends the writer task, which drops the sink.
        self.writer.lock().await.take();
        *self.current_shard.write().unwrap() = None;
    }
}

/// Pump the transport until it fails or closes, forwarding push
/// deliveries and raising exactly one failure signal on exit.
async fn read_loop(
    mut read: SplitStream<WsStream>,
    pong: mpsc::Sender<Message>,
    push_tx: mpsc::Sender<PushEvent>,
    failure_tx: mpsc::Sender<FailureSignal>,
    epoch: u64,
    metrics: SessionMetrics,
) {
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match Frame::from_json(&text) {
                Ok(Frame::Message { topic, body }) => match PushEvent::decode(&topic, body) {
                    Ok(event) => {
                        if push_tx.send(event).await.is_err() {
                            // Session loop is gone; nothing left to notify.
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(epoch, error = %e, "Malformed push payload");
                        break FailureKind::Protocol;
                    }
                },
                Ok(frame) => {
                    debug!(epoch, ?frame, "Ignoring non-push frame");
                }
                Err(e) => {
                    warn!(epoch, error = %e, "Unparseable frame");
                    break FailureKind::Protocol;
                }
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = pong.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) => {
                info!(epoch, "Shard closed the connection");
                break FailureKind::TransportClosed;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(epoch, error = %e, "Transport error");
                break FailureKind::TransportClosed;
            }
            None => {
                info!(epoch, "Transport stream ended");
                break FailureKind::TransportClosed;
            }
        }
    };

    metrics.set_connected(false);
    metrics.record_error(match reason {
        FailureKind::Protocol => "protocol",
        _ => "connection",
    });
    let _ = failure_tx.send(FailureSignal::new(reason, epoch)).await;
}
