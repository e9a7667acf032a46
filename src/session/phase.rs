//! Connection phase machine
//!
//! The lifecycle of the single shard connection, as an explicit state
//! machine with a transition table. Testable without a transport.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Phase of the shard connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionPhase {
    /// No transport and no recovery in progress (explicit stop)
    Disconnected = 0,
    /// Asking the directory for a fresh shard assignment
    Resolving = 1,
    /// Transport dial in progress
    Connecting = 2,
    /// Transport open, subscriptions registered
    Connected = 3,
}

impl ConnectionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Resolving,
            2 => Self::Connecting,
            3 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Transition table:
    /// - `Disconnected --connect--> Connecting`
    /// - `Connecting --transport open--> Connected`
    /// - `Connected | Connecting --close or protocol error--> Resolving`
    /// - `Resolving --different address--> Connecting`
    /// - `Resolving --failure or same address--> Disconnected`
    /// - any phase --teardown--> `Disconnected`
    pub fn can_transition(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Resolving)
                | (Connected, Resolving)
                | (Resolving, Connecting)
                | (Resolving, Disconnected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

/// Shared snapshot of the connection phase
///
/// Cloned into the connection, the failover loop, and the health
/// surface; all observers see the same cell.
#[derive(Debug, Clone, Default)]
pub struct PhaseCell {
    inner: Arc<AtomicU8>,
}

impl PhaseCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ConnectionPhase {
        ConnectionPhase::from_u8(self.inner.load(Ordering::SeqCst))
    }

    /// Apply a transition if the table allows it from the current
    /// phase. Returns false (and leaves the phase alone) otherwise.
    pub fn transition(&self, next: ConnectionPhase) -> bool {
        let mut current = self.inner.load(Ordering::SeqCst);
        loop {
            let phase = ConnectionPhase::from_u8(current);
            if phase == next {
                return true;
            }
            if !phase.can_transition(next) {
                warn!(from = phase.as_str(), to = next.as_str(), "Rejected phase transition");
                return false;
            }
            match self.inner.compare_exchange(
                current,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Force the phase, bypassing the table. Reserved for teardown.
    pub fn reset(&self) {
        self.inner
            .store(ConnectionPhase::Disconnected as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionPhase::*;

    #[test]
    fn connect_path_is_allowed() {
        assert!(Disconnected.can_transition(Connecting));
        assert!(Connecting.can_transition(Connected));
    }

    #[test]
    fn failure_escalates_to_resolving_only_while_live() {
        assert!(Connected.can_transition(Resolving));
        assert!(Connecting.can_transition(Resolving));
        assert!(!Disconnected.can_transition(Resolving));
    }

    #[test]
    fn resolving_forks_to_connecting_or_disconnected() {
        assert!(Resolving.can_transition(Connecting));
        assert!(Resolving.can_transition(Disconnected));
        assert!(!Resolving.can_transition(Connected));
    }

    #[test]
    fn no_shortcut_from_disconnected_to_connected() {
        assert!(!Disconnected.can_transition(Connected));
    }

    #[test]
    fn cell_applies_failover_sequence() {
        let cell = PhaseCell::new();
        assert_eq!(cell.get(), Disconnected);

        assert!(cell.transition(Connecting));
        assert!(cell.transition(Connected));
        assert!(cell.transition(Resolving));
        assert!(cell.transition(Connecting));
        assert!(cell.transition(Connected));
        assert_eq!(cell.get(), Connected);
    }

    #[test]
    fn cell_rejects_invalid_transition() {
        let cell = PhaseCell::new();
        assert!(!cell.transition(Connected));
        assert_eq!(cell.get(), Disconnected);
    }

    #[test]
    fn transition_to_same_phase_is_a_no_op() {
        let cell = PhaseCell::new();
        assert!(cell.transition(Disconnected));
        assert_eq!(cell.get(), Disconnected);
    }
}
