//! Prometheus recorder and relay metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::RelayError;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything is recorded. The handle renders
/// the `/metrics` endpoint.
pub fn install_recorder() -> Result<PrometheusHandle, RelayError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections accepted (counter).
pub const RELAY_CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Open connections (gauge).
pub const RELAY_CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Broadcast envelopes relayed (counter).
pub const RELAY_BROADCASTS_TOTAL: &str = "relay_broadcasts_total";
/// Frames that could not be queued for a recipient (counter).
pub const RELAY_BROADCAST_DROPS_TOTAL: &str = "relay_broadcast_drops_total";
/// Inbound frames that failed envelope or payload validation (counter).
pub const RELAY_INVALID_ENVELOPES_TOTAL: &str = "relay_invalid_envelopes_total";
