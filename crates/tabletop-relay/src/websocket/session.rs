//! One relay connection from upgrade through disconnect.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tabletop_core::envelope::Envelope;
use tabletop_core::ids::{ConnectionId, SessionId};
use tabletop_core::instruction::{Broadcast, Instruction};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::context::RelayContext;
use crate::metrics::{RELAY_CONNECTIONS_ACTIVE, RELAY_CONNECTIONS_TOTAL};

/// Run a relay session for one socket.
///
/// 1. Registers the connection for fan-out and sends `publickey`
/// 2. Dispatches every inbound frame and queues direct replies
/// 3. Closes the socket when the heartbeat times out or the relay shuts down
/// 4. On disconnect, releases the client's pieces on its behalf and
///    announces `user_left_game`
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    ctx: Arc<RelayContext>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(ctx.settings.max_send_queue.max(1));
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));

    info!("client connected");
    counter!(RELAY_CONNECTIONS_TOTAL).increment(1);
    gauge!(RELAY_CONNECTIONS_ACTIVE).increment(1.0);
    ctx.broadcast.add(connection.clone()).await;

    let greeting = Instruction::PublicKey(ctx.settings.public_key.clone());
    let _ = connection.send_envelope(&Envelope::reply(greeting.kind(), greeting.data()));

    let outbound = tokio::spawn(async move {
        while let Some(text) = send_rx.recv().await {
            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let session_cancel = shutdown.child_token();
    let mut heartbeat = tokio::spawn(run_heartbeat(
        connection.clone(),
        ctx.settings.heartbeat_interval(),
        ctx.settings.heartbeat_timeout(),
        session_cancel.clone(),
    ));

    loop {
        tokio::select! {
            () = session_cancel.cancelled() => {
                debug!("relay shutting down, closing connection");
                break;
            }
            result = &mut heartbeat => {
                if matches!(result, Ok(HeartbeatResult::TimedOut)) {
                    warn!(
                        silent_ms = connection.last_seen_elapsed().as_millis(),
                        "client unresponsive, disconnecting"
                    );
                }
                break;
            }
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(t))) => t.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(s) => s.to_owned(),
                        Err(_) => {
                            info!(len = data.len(), "received non-UTF8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        connection.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "socket error");
                        break;
                    }
                    None => break,
                };
                if let Some(reply) = handle_message(&text, &connection, &ctx).await {
                    if !connection.send_envelope(&reply) {
                        info!("failed to enqueue reply (channel full or closed)");
                    }
                }
            }
        }
    }

    session_cancel.cancel();
    ctx.broadcast.remove(&conn_id).await;
    if let Some(conveyor) = connection.conveyor() {
        announce_departure(&ctx, &conveyor).await;
    }
    info!(age_ms = connection.age().as_millis(), dropped = connection.drop_count(), "client disconnected");
    gauge!(RELAY_CONNECTIONS_ACTIVE).decrement(1.0);
    drop(connection);
    let _ = outbound.await;
}

/// Release everything `conveyor` held and tell the remaining clients.
async fn announce_departure(ctx: &RelayContext, conveyor: &SessionId) {
    for released in ctx.release_all_held_by(conveyor) {
        debug!(piece = %released.piece_name, "releasing piece of departed client");
        let pick_down = Instruction::Broadcast(Broadcast::PickDown(released));
        let _ = ctx.broadcast.broadcast_all(&pick_down.to_envelope(conveyor)).await;
    }
    let left = Instruction::Broadcast(Broadcast::UserLeft);
    let _ = ctx.broadcast.broadcast_all(&left.to_envelope(conveyor)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletop_core::coord::Coord3D;
    use tabletop_core::instruction::PiecePosition;
    use tabletop_settings::RelaySettings;

    #[tokio::test]
    async fn departure_releases_pieces_then_announces() {
        let ctx = RelayContext::new(RelaySettings::default());
        let (tx, mut rx) = mpsc::channel(8);
        ctx.broadcast
            .add(Arc::new(ClientConnection::new(ConnectionId::from("peer"), tx)))
            .await;
        let leaver = SessionId::from("player-a");
        ctx.record_broadcast(
            &leaver,
            &Broadcast::PickUp(PiecePosition {
                piece_name: "piece_7".into(),
                position: Coord3D::new(1.0, 0.0, 0.0),
            }),
        );

        announce_departure(&ctx, &leaver).await;

        let first = Envelope::parse(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first.verb(), "broadcast:pick_down_chess");
        assert_eq!(first.conveyor, "player-a");
        assert_eq!(first.data["piece_name"], "piece_7");
        let second = Envelope::parse(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(second.verb(), "broadcast:user_left_game");
        assert_eq!(second.data, serde_json::json!(""));
        assert!(!ctx.snapshot()[0].is_picked);
    }
}
