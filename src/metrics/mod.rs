//! Session metrics
//!
//! Counters and gauges for the failover loop and the push stream,
//! recorded through the `metrics` facade. The Prometheus exporter is
//! installed only by the daemon binary; library consumers and tests
//! run against the plain facade.

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Session metrics recorder
#[derive(Clone, Default)]
pub struct SessionMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl SessionMetrics {
    /// Facade-only recorder; metric calls are no-ops until a global
    /// recorder is installed elsewhere.
    pub fn new() -> Self {
        Self::register_metrics();
        Self { handle: None }
    }

    /// Install the Prometheus recorder and return a rendering handle.
    /// Call once per process, from the binary.
    pub fn with_exporter() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        Self::register_metrics();

        Self {
            handle: Some(Arc::new(handle)),
        }
    }

    fn register_metrics() {
        describe_counter!(
            "session_events_folded_total",
            Unit::Count,
            "Push events folded into local projections"
        );
        describe_counter!(
            "session_publishes_total",
            Unit::Count,
            "Messages and posts published to the shard"
        );
        describe_counter!(
            "session_publish_failures_total",
            Unit::Count,
            "Publishes that failed at the transport level"
        );
        describe_counter!(
            "session_failures_total",
            Unit::Count,
            "Failure signals routed into the failover loop"
        );
        describe_counter!(
            "session_stale_signals_total",
            Unit::Count,
            "Failure signals discarded by the epoch guard"
        );
        describe_counter!(
            "session_resolutions_total",
            Unit::Count,
            "Shard resolution attempts"
        );
        describe_counter!(
            "session_reconnects_total",
            Unit::Count,
            "Successful reconnects to a shard"
        );
        describe_counter!(
            "session_bulk_loads_total",
            Unit::Count,
            "Completed bulk loads"
        );
        describe_counter!(
            "session_errors_total",
            Unit::Count,
            "Session errors by type"
        );

        describe_gauge!(
            "session_connected",
            Unit::Count,
            "Connection status (1=connected, 0=not)"
        );
        describe_gauge!(
            "session_connection_epoch",
            Unit::Count,
            "Monotonic epoch of the current connection"
        );
    }

    pub fn record_event_folded(&self, topic_kind: &'static str) {
        counter!("session_events_folded_total", "topic" => topic_kind).increment(1);
    }

    pub fn record_publish(&self, destination: &'static str) {
        counter!("session_publishes_total", "destination" => destination).increment(1);
    }

    pub fn record_publish_failure(&self, destination: &'static str) {
        counter!("session_publish_failures_total", "destination" => destination).increment(1);
    }

    pub fn record_failure(&self, kind: &'static str) {
        counter!("session_failures_total", "kind" => kind).increment(1);
    }

    pub fn record_stale_signal(&self) {
        counter!("session_stale_signals_total").increment(1);
    }

    pub fn record_resolution(&self) {
        counter!("session_resolutions_total").increment(1);
    }

    pub fn record_reconnect(&self, epoch: u64) {
        counter!("session_reconnects_total").increment(1);
        gauge!("session_connection_epoch").set(epoch as f64);
    }

    pub fn record_bulk_load(&self) {
        counter!("session_bulk_loads_total").increment(1);
    }

    pub fn record_error(&self, error_type: &'static str) {
        counter!("session_errors_total", "error_type" => error_type).increment(1);
    }

    pub fn set_connected(&self, connected: bool) {
        gauge!("session_connected").set(if connected { 1.0 } else { 0.0 });
    }

    /// Render metrics in Prometheus format. Empty without an exporter.
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }
}
