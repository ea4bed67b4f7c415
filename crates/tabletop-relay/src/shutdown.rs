//! Relay shutdown.
//!
//! Every connection runs as a tracked session task. Shutdown cancels the
//! shared token, which makes each session close its socket and announce its
//! departure, then waits for those tasks and the listener under one deadline.
//! A session still running at the deadline is aborted and its pieces stay in
//! the relay ledger as held.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tabletop_core::ids::ConnectionId;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadline for sessions to announce their departure.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of [`ShutdownCoordinator::graceful_shutdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions that closed and announced their departure.
    pub drained: usize,
    /// Sessions aborted at the deadline.
    pub abandoned: usize,
    /// Whether the listener task finished in time.
    pub listener_stopped: bool,
}

/// Shutdown signal plus the set of live session tasks.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: Mutex<JoinSet<ConnectionId>>,
}

impl ShutdownCoordinator {
    /// New coordinator, not yet cancelled.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: Mutex::new(JoinSet::new()),
        }
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown was signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run a connection's session so shutdown can wait for it.
    pub fn spawn_session<F>(&self, conn_id: ConnectionId, session: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut sessions = self.sessions.lock();
        while sessions.try_join_next().is_some() {}
        let _ = sessions.spawn(async move {
            session.await;
            conn_id
        });
    }

    /// Sessions spawned and not yet reaped.
    pub fn tracked_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock();
        while sessions.try_join_next().is_some() {}
        sessions.len()
    }

    /// Cancel every session and the listener, then wait up to `timeout`
    /// for sessions to release their pieces and for `listener` to stop.
    pub async fn graceful_shutdown(
        &self,
        listener: JoinHandle<()>,
        timeout: Option<Duration>,
    ) -> ShutdownReport {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let deadline = Instant::now() + timeout;
        self.token.cancel();

        let mut sessions = std::mem::take(&mut *self.sessions.lock());
        info!(sessions = sessions.len(), timeout_ms = timeout.as_millis(), "draining relay sessions");

        let mut report = ShutdownReport::default();
        loop {
            match tokio::time::timeout_at(deadline, sessions.join_next()).await {
                Ok(Some(Ok(conn_id))) => {
                    debug!(conn_id = %conn_id, "session drained");
                    report.drained += 1;
                }
                Ok(Some(Err(e))) => warn!(error = %e, "session task failed during shutdown"),
                Ok(None) => break,
                Err(_) => {
                    report.abandoned = sessions.len();
                    warn!(abandoned = report.abandoned, "sessions still open at deadline, aborting");
                    sessions.abort_all();
                    break;
                }
            }
        }

        report.listener_stopped = tokio::time::timeout_at(deadline, listener).await.is_ok();
        if !report.listener_stopped {
            warn!("listener did not stop before the deadline");
        }
        info!(drained = report.drained, abandoned = report.abandoned, "relay drained");
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
