//! Failover policy
//!
//! One policy applied uniformly to every failure signal: resolve once,
//! reconnect only if the directory hands back a different address,
//! otherwise stop. No backoff, no retry loop; the attempt bound is
//! configurable and defaults to one.

use crate::error::SessionError;
use std::future::Future;
use tracing::warn;

/// What failed, for routing and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport closed or failed to open
    TransportClosed,
    /// Malformed push frame
    Protocol,
    /// Chat or post publish failed at the transport level
    Publish,
    /// Follow/unfollow call failed
    Follow,
    /// Bulk load failed
    Load,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransportClosed => "transport_closed",
            Self::Protocol => "protocol",
            Self::Publish => "publish",
            Self::Follow => "follow",
            Self::Load => "load",
        }
    }
}

/// A failure observation, stamped with the connection epoch it was
/// made against. Signals from a superseded connection are discarded so
/// a stale reconnect can never clobber a newer, already-successful one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureSignal {
    pub kind: FailureKind,
    pub epoch: u64,
}

impl FailureSignal {
    pub fn new(kind: FailureKind, epoch: u64) -> Self {
        Self { kind, epoch }
    }

    /// True when a newer connection has been established since this
    /// signal was raised.
    pub fn is_stale(&self, current_epoch: u64) -> bool {
        self.epoch < current_epoch
    }
}

/// Outcome of one failover round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverOutcome {
    /// The directory returned a different shard; reconnect to it.
    Reconnect(String),
    /// Resolution failed or returned the address already in use;
    /// remain disconnected rather than looping.
    Stop,
}

impl FailoverOutcome {
    pub fn decide(resolved: Option<&str>, current: Option<&str>) -> Self {
        match resolved {
            Some(address) if current != Some(address) => Self::Reconnect(address.to_string()),
            _ => Self::Stop,
        }
    }
}

/// Run the resolution side of a failover round.
///
/// `resolve` is invoked at most `attempts` times (minimum one); the
/// first success decides the outcome. Exhausting the bound stops the
/// round.
pub async fn run_failover<F, Fut>(
    mut resolve: F,
    attempts: u32,
    current: Option<&str>,
) -> FailoverOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, SessionError>>,
{
    for attempt in 1..=attempts.max(1) {
        match resolve().await {
            Ok(address) => return FailoverOutcome::decide(Some(&address), current),
            Err(e) => {
                warn!(attempt, error = %e, "Shard resolution failed");
            }
        }
    }
    FailoverOutcome::Stop
}
