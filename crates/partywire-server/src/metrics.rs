//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before any metric is recorded. The handle renders
/// the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Inbound socket messages (counter).
pub const WS_MESSAGES_TOTAL: &str = "ws_messages_total";
/// Rejected socket messages (counter, labels: reason).
pub const WS_MESSAGE_ERRORS_TOTAL: &str = "ws_message_errors_total";
/// Event handler duration seconds (histogram, labels: message_type).
pub const WS_HANDLER_DURATION_SECONDS: &str = "ws_handler_duration_seconds";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound payloads dropped on full or closed queues (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// HTTP endpoint requests (counter, labels: method, status).
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// HTTP endpoint handler duration seconds (histogram, labels: method).
pub const HTTP_HANDLER_DURATION_SECONDS: &str = "http_handler_duration_seconds";
