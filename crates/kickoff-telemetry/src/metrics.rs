//! Prometheus metrics recorder and the metric names used across crates.

pub use metrics_exporter_prometheus::PrometheusHandle;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus metrics recorder (global).
pub(crate) fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    tracing::info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Build a handle without installing a global recorder.
pub fn build_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Metric name constants to avoid typos across crates.
pub mod names {
    /// WebSocket connections opened (counter).
    pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
    /// WebSocket connections closed (counter).
    pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
    /// Connections currently registered (gauge).
    pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
    /// Accepted `updateFilters` messages (counter).
    pub const FILTER_UPDATES_TOTAL: &str = "filter_updates_total";
    /// Inbound control frames that failed to decode (counter).
    pub const CONTROL_DECODE_ERRORS_TOTAL: &str = "control_decode_errors_total";
    /// Broadcast passes started (counter).
    pub const BROADCAST_PASSES_TOTAL: &str = "broadcast_passes_total";
    /// Filtered frames queued to connections (counter).
    pub const FRAMES_SENT_TOTAL: &str = "frames_sent_total";
    /// Frames dropped for a slow connection (counter).
    pub const FRAMES_DROPPED_TOTAL: &str = "frames_dropped_total";
    /// Connections removed after a failed send (counter).
    pub const SEND_FAILURES_TOTAL: &str = "send_failures_total";
    /// Fetched documents that failed to parse (counter, labels: kind).
    pub const PAYLOAD_DECODE_ERRORS_TOTAL: &str = "payload_decode_errors_total";
    /// Upstream fetches attempted (counter).
    pub const FETCH_TOTAL: &str = "fetch_total";
    /// Upstream fetches that failed (counter, labels: kind).
    pub const FETCH_ERRORS_TOTAL: &str = "fetch_errors_total";
    /// Documents replaced in the publish slot before the broadcaster took them (counter).
    pub const DOCUMENTS_DROPPED_TOTAL: &str = "documents_dropped_total";
    /// Upstream fetch latency (histogram).
    pub const FETCH_DURATION_SECONDS: &str = "fetch_duration_seconds";
}

#[cfg(test)]
mod tests {
    use super::names::*;
    use super::*;

    #[test]
    fn build_handle_renders() {
        let handle = build_handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            FILTER_UPDATES_TOTAL,
            CONTROL_DECODE_ERRORS_TOTAL,
            BROADCAST_PASSES_TOTAL,
            FRAMES_SENT_TOTAL,
            FRAMES_DROPPED_TOTAL,
            SEND_FAILURES_TOTAL,
            PAYLOAD_DECODE_ERRORS_TOTAL,
            FETCH_TOTAL,
            FETCH_ERRORS_TOTAL,
            DOCUMENTS_DROPPED_TOTAL,
            FETCH_DURATION_SECONDS,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }
}
