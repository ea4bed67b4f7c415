//! Relay startup errors.

use thiserror::Error;

/// Failures while bringing the relay up.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Binding or serving the listener failed.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),

    /// The global metrics recorder could not be installed.
    #[error("metrics recorder error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}
