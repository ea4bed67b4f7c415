//! Client heartbeat: one `ping` per period while authenticated.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Session;

/// Why the heartbeat loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Stopped by logout or close.
    Cancelled,
    /// The session was dropped.
    SessionDropped,
    /// The session left the authenticated state without cancelling.
    LoggedOut,
}

/// Ping every `period` until cancelled.
///
/// The first ping goes out one full period after start.
pub async fn run_heartbeat(
    session: Weak<Session>,
    period: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("heartbeat cancelled");
                return HeartbeatResult::Cancelled;
            }
            _ = interval.tick() => {
                let Some(session) = session.upgrade() else {
                    return HeartbeatResult::SessionDropped;
                };
                if !session.is_authenticated() {
                    return HeartbeatResult::LoggedOut;
                }
                if !session.ping() {
                    debug!("heartbeat ping not sent");
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
