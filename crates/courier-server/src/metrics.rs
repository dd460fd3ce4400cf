//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use courier_core::{Hub, HubStats};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "courier_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "courier_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "courier_connections_rejected_total";
    pub const USERS_ONLINE: &str = "courier_users_online";
    pub const TOPICS_ACTIVE: &str = "courier_topics_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "courier_subscriptions_active";
    pub const MESSAGES_TOTAL: &str = "courier_messages_total";
    pub const MESSAGES_BYTES: &str = "courier_messages_bytes";
    pub const MESSAGES_DELIVERED: &str = "courier_messages_delivered_total";
    pub const MESSAGES_DROPPED: &str = "courier_messages_dropped_total";
    pub const SESSION_SECONDS: &str = "courier_session_duration_seconds";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Upgrades rejected, by reason"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Current number of online users");
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Topics with at least one subscriber");
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of (connection, topic) subscriptions"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Envelopes enqueued onto outbound queues"
    );
    metrics::describe_counter!(
        names::MESSAGES_DROPPED,
        "Envelopes dropped on full or closed outbound queues"
    );
    metrics::describe_histogram!(names::SESSION_SECONDS, "Connection lifetime in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection(lifetime: Duration) {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(names::SESSION_SECONDS).record(lifetime.as_secs_f64());
}

/// Record a rejected upgrade.
pub fn record_rejection(reason: &'static str) {
    counter!(names::CONNECTIONS_REJECTED, "reason" => reason).increment(1);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Mirror hub statistics into gauges and counters.
///
/// `previous` is the snapshot from the last call; counters advance by the
/// difference.
pub fn record_hub_stats(stats: &HubStats, previous: &HubStats) {
    gauge!(names::USERS_ONLINE).set(stats.online_users as f64);
    gauge!(names::TOPICS_ACTIVE).set(stats.topics as f64);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(stats.total_subscriptions as f64);
    counter!(names::MESSAGES_DELIVERED)
        .increment(stats.messages_delivered.saturating_sub(previous.messages_delivered));
    counter!(names::MESSAGES_DROPPED)
        .increment(stats.messages_dropped.saturating_sub(previous.messages_dropped));
}

const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Periodically mirror [`Hub::stats`] into metrics until the task is aborted.
pub async fn report_hub_stats(hub: Arc<Hub>, interval: Duration) {
    // interval() panics on a zero period
    let mut ticker = tokio::time::interval(interval.max(MIN_REPORT_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut previous = HubStats::default();

    loop {
        ticker.tick().await;
        let stats = hub.stats();
        record_hub_stats(&stats, &previous);
        debug!(
            connections = stats.connections,
            online_users = stats.online_users,
            topics = stats.topics,
            dropped = stats.messages_dropped,
            "Hub stats"
        );
        previous = stats;
    }
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard {
    started: std::time::Instant,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self {
            started: std::time::Instant::now(),
        }
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection(self.started.elapsed());
    }
}
