//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::CoordinatorStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const REQUESTS_TOTAL: &str = "huddle_requests_total";
    pub const FRAMES_TOTAL: &str = "huddle_frames_total";
    pub const FRAMES_BYTES: &str = "huddle_frames_bytes";
    pub const MEMBERS_ACTIVE: &str = "huddle_members_active";
    pub const REAPED_TOTAL: &str = "huddle_reaped_total";
    pub const LATENCY_SECONDS: &str = "huddle_request_latency_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::REQUESTS_TOTAL, "Requests handled, by frame type");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames sent and received");
    metrics::describe_counter!(names::FRAMES_BYTES, "Bytes of frames sent and received");
    metrics::describe_gauge!(names::MEMBERS_ACTIVE, "Currently registered names");
    metrics::describe_counter!(
        names::REAPED_TOTAL,
        "Sessions removed after a failed push"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Request handling latency in seconds"
    );
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
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a handled request.
pub fn record_request(kind: String) {
    counter!(names::REQUESTS_TOTAL, "type" => kind).increment(1);
}

/// Record a frame on the wire.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record request latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Publish coordinator statistics.
pub fn observe(stats: &CoordinatorStats) {
    gauge!(names::MEMBERS_ACTIVE).set(stats.members as f64);
    counter!(names::REAPED_TOTAL).absolute(stats.reaped_total);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
