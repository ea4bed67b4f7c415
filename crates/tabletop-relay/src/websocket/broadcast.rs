//! Fan-out to connected clients.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tabletop_core::envelope::Envelope;
use tabletop_core::ids::ConnectionId;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::RELAY_BROADCAST_DROPS_TOTAL;

/// Connected clients indexed by connection id.
pub struct BroadcastManager {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl BroadcastManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by id.
    pub async fn remove(&self, connection_id: &ConnectionId) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
    }

    /// Send a raw frame to every connection except `sender`. Returns the
    /// number of connections it was queued for.
    pub async fn broadcast_except(&self, sender: &ConnectionId, frame: Arc<String>) -> usize {
        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values().filter(|c| &c.id != sender) {
            if conn.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                counter!(RELAY_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, "failed to queue broadcast for client");
            }
        }
        debug!(sender = %sender, recipients = delivered, "broadcast fanned out");
        delivered
    }

    /// Serialize and send an envelope to every connection.
    pub async fn broadcast_all(&self, envelope: &Envelope) -> usize {
        let frame = match envelope.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(verb = %envelope.verb(), error = %e, "failed to serialize broadcast");
                return 0;
            }
        };
        let conns = self.connections.read().await;
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                counter!(RELAY_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, "failed to queue broadcast for client");
            }
        }
        delivered
    }

    /// Number of connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of connections with a successful login.
    pub async fn authenticated_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}
