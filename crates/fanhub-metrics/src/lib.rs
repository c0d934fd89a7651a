//! Metrics surface for the fan-out hub, behind the `metrics` facade so the
//! Hub can run with a no-op recorder (tests, local dev) or a Prometheus
//! exporter in production.

use metrics::{counter, gauge};

pub mod names {
    pub const ACTIVE_CLIENTS: &str = "fanhub_active_clients";
    pub const USER_CHANNEL_COUNT: &str = "fanhub_user_channel_count";
    pub const EGRESS_QUEUE_DEPTH: &str = "fanhub_egress_queue_depth";
    pub const EGRESS_PUBLISH_ERRORS_TOTAL: &str = "fanhub_egress_publish_errors_total";
    pub const RATE_LIMIT_DENIALS_TOTAL: &str = "fanhub_rate_limit_denials_total";
    pub const SLOW_CONSUMER_EVICTIONS_TOTAL: &str = "fanhub_slow_consumer_evictions_total";
    pub const BOARD_BROADCASTS_TOTAL: &str = "fanhub_board_broadcasts_total";
    pub const CHAT_BROADCASTS_TOTAL: &str = "fanhub_chat_broadcasts_total";
}

pub fn set_active_clients(n: usize) {
    gauge!(names::ACTIVE_CLIENTS).set(n as f64);
}

pub fn set_user_channel_count(n: usize) {
    gauge!(names::USER_CHANNEL_COUNT).set(n as f64);
}

pub fn set_egress_queue_depth(n: usize) {
    gauge!(names::EGRESS_QUEUE_DEPTH).set(n as f64);
}

pub fn incr_egress_publish_errors() {
    counter!(names::EGRESS_PUBLISH_ERRORS_TOTAL).increment(1);
}

pub fn incr_rate_limit_denials() {
    counter!(names::RATE_LIMIT_DENIALS_TOTAL).increment(1);
}

pub fn incr_slow_consumer_evictions() {
    counter!(names::SLOW_CONSUMER_EVICTIONS_TOTAL).increment(1);
}

pub fn incr_board_broadcasts() {
    counter!(names::BOARD_BROADCASTS_TOTAL).increment(1);
}

pub fn incr_chat_broadcasts() {
    counter!(names::CHAT_BROADCASTS_TOTAL).increment(1);
}

/// Install the Prometheus recorder and return the rendered-metrics handle
/// used by the `/metrics` HTTP route. A no-op when the `prometheus` feature
/// is disabled — callers should treat this as best-effort at boot.
#[cfg(feature = "prometheus")]
pub fn install_prometheus_recorder()
-> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("prometheus metrics recorder installed");
    Ok(handle)
}
