//! Per-connection relay state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tabletop_core::envelope::Envelope;
use tabletop_core::ids::{ConnectionId, SessionId};
use tabletop_core::instruction::UserData;
use tokio::sync::mpsc;
use tracing::warn;

/// A connected client.
pub struct ClientConnection {
    /// Relay-assigned connection id.
    pub id: ConnectionId,
    /// Send channel to the connection's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether any frame arrived since the last liveness check.
    pub is_alive: AtomicBool,
    /// When the last frame arrived.
    last_seen: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
    /// Identity bound by a successful login.
    user: Mutex<Option<UserData>>,
    /// `conveyor` the client stamps on its envelopes.
    conveyor: Mutex<Option<SessionId>>,
}

impl ClientConnection {
    /// Create a connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            user: Mutex::new(None),
            conveyor: Mutex::new(None),
        }
    }

    /// Queue a frame.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, verb = %envelope.verb(), error = %e, "failed to serialize envelope");
                false
            }
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record activity.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last frame (or connection establishment).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Bind the identity accepted at login.
    pub fn bind_user(&self, user: UserData) {
        *self.user.lock() = Some(user);
    }

    /// Bound identity.
    pub fn user(&self) -> Option<UserData> {
        self.user.lock().clone()
    }

    /// Whether a login succeeded on this connection.
    pub fn is_authenticated(&self) -> bool {
        self.user.lock().is_some()
    }

    /// Remember the client's `conveyor`. The first non-empty value sticks.
    pub fn observe_conveyor(&self, conveyor: &str) {
        if conveyor.is_empty() {
            return;
        }
        let mut current = self.conveyor.lock();
        match current.as_ref() {
            None => *current = Some(SessionId::from(conveyor)),
            Some(known) if known.as_str() != conveyor => {
                warn!(conn_id = %self.id, known = %known, seen = conveyor, "conveyor changed mid-connection, keeping first");
            }
            Some(_) => {}
        }
    }

    /// The client's `conveyor`, once seen.
    pub fn conveyor(&self) -> Option<SessionId> {
        self.conveyor.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::from("conn_1"), tx);
        (conn, rx)
    }

    #[tokio::test]
    async fn send_envelope_serializes() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send_envelope(&Envelope::reply("pong", json!(""))));
        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "pong");
        assert_eq!(parsed["conveyor"], "");
    }

    #[tokio::test]
    async fn full_or_closed_channel_counts_drops() {
        let (tx, rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::new(), tx);
        assert!(conn.send(Arc::new("msg1".into())));
        assert!(!conn.send(Arc::new("msg2".into())));
        drop(rx);
        assert!(!conn.send(Arc::new("msg3".into())));
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
        assert!(conn.last_seen_elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn first_conveyor_sticks() {
        let (conn, _rx) = make_connection();
        conn.observe_conveyor("");
        assert!(conn.conveyor().is_none());
        conn.observe_conveyor("player-a");
        conn.observe_conveyor("player-b");
        assert_eq!(conn.conveyor().unwrap().as_str(), "player-a");
    }

    #[test]
    fn bind_user_authenticates() {
        let (conn, _rx) = make_connection();
        assert!(!conn.is_authenticated());
        conn.bind_user(UserData::default());
        assert!(conn.is_authenticated());
    }
}
