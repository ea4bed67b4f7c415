//! Inbound envelope dispatch for one relay connection.

use std::sync::Arc;

use metrics::counter;
use serde_json::json;
use tabletop_core::envelope::Envelope;
use tabletop_core::ids::SessionId;
use tabletop_core::instruction::{Instruction, LoginStatus, UserData};
use tracing::{debug, info, warn};

use super::connection::ClientConnection;
use crate::accounts::AccountDirectory;
use crate::context::RelayContext;
use crate::metrics::{RELAY_BROADCASTS_TOTAL, RELAY_INVALID_ENVELOPES_TOTAL};

/// Handle one inbound frame. Returns the direct reply, if any.
///
/// Broadcasts are mirrored into the relay ledger and forwarded unchanged
/// to every other connection.
pub async fn handle_message(
    text: &str,
    conn: &ClientConnection,
    ctx: &RelayContext,
) -> Option<Envelope> {
    conn.mark_alive();

    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => return Some(invalid(conn, &e.to_string())),
    };
    let instruction = match Instruction::from_envelope(&envelope) {
        Ok(instruction) => instruction,
        Err(e) => return Some(invalid(conn, &e.to_string())),
    };
    conn.observe_conveyor(&envelope.conveyor);
    debug!(conn_id = %conn.id, verb = %envelope.verb(), "dispatch");

    match instruction {
        Instruction::Ping => Some(reply(&Instruction::Pong)),
        Instruction::Pong => None,
        Instruction::GetPublicKey => Some(reply(&Instruction::PublicKey(
            ctx.settings.public_key.clone(),
        ))),
        Instruction::GetLogin(credentials) => {
            let status = match ctx.accounts.authenticate(&credentials.email, &credentials.password)
            {
                Some(user) => admit(conn, ctx, user).await,
                None => {
                    info!(conn_id = %conn.id, email = %credentials.email, "login rejected");
                    LoginStatus::Rejected
                }
            };
            Some(reply(&Instruction::Login(status)))
        }
        Instruction::GetAnonymousLogin(credentials) => {
            let status = if ctx.settings.anonymous_login {
                admit(conn, ctx, AccountDirectory::anonymous(&credentials.email)).await
            } else {
                info!(conn_id = %conn.id, "anonymous login disabled");
                LoginStatus::Rejected
            };
            Some(reply(&Instruction::AnonymousLogin(status)))
        }
        Instruction::GetServerConfig => {
            let online = u32::try_from(ctx.broadcast.authenticated_count().await).unwrap_or(u32::MAX);
            Some(reply(&Instruction::ServerConfig(ctx.descriptor(online))))
        }
        Instruction::GetUserData => {
            let user = conn.user().unwrap_or_else(AccountDirectory::guest);
            Some(reply(&Instruction::UserData(user)))
        }
        Instruction::GetSyncPieces => Some(reply(&Instruction::SyncPieces(ctx.snapshot()))),
        Instruction::Broadcast(broadcast) => {
            let conveyor = SessionId::from(envelope.conveyor.as_str());
            ctx.record_broadcast(&conveyor, &broadcast);
            counter!(RELAY_BROADCASTS_TOTAL).increment(1);
            let _ = ctx
                .broadcast
                .broadcast_except(&conn.id, Arc::new(text.to_owned()))
                .await;
            None
        }
        other => {
            warn!(conn_id = %conn.id, kind = other.kind(), "unknown instruction type");
            Some(error_reply(&format!("unknown instruction type: {}", other.kind())))
        }
    }
}

async fn admit(
    conn: &ClientConnection,
    ctx: &RelayContext,
    user: UserData,
) -> LoginStatus {
    if !conn.is_authenticated() {
        let online = ctx.broadcast.authenticated_count().await;
        if online >= ctx.settings.max_online as usize {
            warn!(conn_id = %conn.id, online, "relay full, login refused");
            return LoginStatus::Rejected;
        }
    }
    info!(conn_id = %conn.id, email = %user.email, anonymous = user.anonymous_user, "login accepted");
    conn.bind_user(user);
    LoginStatus::Accepted
}

fn reply(instruction: &Instruction) -> Envelope {
    Envelope::reply(instruction.kind(), instruction.data())
}

fn error_reply(message: &str) -> Envelope {
    reply(&Instruction::Error(json!(message)))
}

fn invalid(conn: &ClientConnection, reason: &str) -> Envelope {
    counter!(RELAY_INVALID_ENVELOPES_TOTAL).increment(1);
    warn!(conn_id = %conn.id, reason, "invalid envelope");
    error_reply(&format!("invalid envelope: {reason}"))
}
