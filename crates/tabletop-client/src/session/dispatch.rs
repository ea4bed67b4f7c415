//! Inbound routing: validate, observe, handle built-ins, forward the rest.

use std::sync::Arc;

use tabletop_core::envelope::Envelope;
use tabletop_core::ids::SessionId;
use tabletop_core::instruction::{Instruction, LoginStatus};
use tracing::{debug, info, warn};

use super::Session;

impl Session {
    /// Handle one inbound frame.
    ///
    /// Invalid frames are logged and dropped without reaching any handler.
    /// Returns the decoded instruction for valid frames.
    pub fn handle_text(self: &Arc<Self>, text: &str) -> Option<Instruction> {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping invalid envelope");
                return None;
            }
        };
        let instruction = match Instruction::from_envelope(&envelope) {
            Ok(instruction) => instruction,
            Err(e) => {
                warn!(verb = %envelope.verb(), error = %e, "dropping undecodable payload");
                return None;
            }
        };

        self.listener.on_message_observed(&envelope);
        self.route(&envelope, &instruction);
        Some(instruction)
    }

    fn route(self: &Arc<Self>, envelope: &Envelope, instruction: &Instruction) {
        match instruction {
            Instruction::Pong => match envelope.sent_at() {
                Some(at) => {
                    *self.last_pong.lock() = Some(at);
                    if let Some(rtt) = self.round_trip() {
                        debug!(rtt_ms = rtt.as_millis(), "pong");
                    }
                }
                None => debug!(time = %envelope.time, "pong with unusable timestamp"),
            },
            Instruction::Login(status) | Instruction::AnonymousLogin(status) => match status {
                LoginStatus::Accepted => self.set_authenticated(true),
                LoginStatus::Rejected => {
                    info!(verb = %envelope.kind, "login rejected");
                }
            },
            Instruction::PublicKey(key) => {
                if key.is_empty() {
                    debug!("empty public key ignored");
                } else {
                    *self.public_key.lock() = Some(key.clone());
                }
            }
            Instruction::ServerConfig(descriptor) => {
                *self.server.lock() = Some(descriptor.clone());
            }
            Instruction::UserData(user) => {
                *self.user.lock() = Some(user.clone());
            }
            Instruction::Broadcast(broadcast) => {
                let conveyor = SessionId::from(envelope.conveyor.as_str());
                self.listener.on_broadcast(&conveyor, broadcast);
            }
            Instruction::Error(data) => {
                warn!(data = %data, "relay reported an error");
                self.listener.on_extension(envelope, instruction);
            }
            _ => self.listener.on_extension(envelope, instruction),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::super::tests::{kinds, linked_session};
    use super::super::{MockSessionListener, NoopListener};
    use super::*;
    use assert_matches::assert_matches;
    use mockall::predicate::always;
    use serde_json::json;
    use tabletop_core::instruction::{Broadcast, PiecePosition};
    use tabletop_core::logging::capture_logs;
    use tabletop_core::time::format_time;
    use tracing::Level;

    fn frame(kind: &str, class: &str, conveyor: &str, data: serde_json::Value) -> String {
        Envelope::new(kind, class, conveyor, data).to_json().unwrap()
    }

    #[tokio::test]
    async fn login_ok_authenticates_and_requests_user_data() {
        let mut mock = MockSessionListener::new();
        let _ = mock.expect_on_open().return_const(());
        let _ = mock.expect_on_message_observed().return_const(());
        let _ = mock.expect_on_authenticated().times(1).return_const(());
        let (session, mut rx) = linked_session(Arc::new(mock));

        let _ = session.handle_text(&frame("login", "", "", json!("ok")));

        assert!(session.is_authenticated());
        assert!(session.is_heartbeat_running());
        assert_eq!(kinds(&mut rx), ["get_user_data"]);
    }

    #[tokio::test]
    async fn anonymous_login_ok_authenticates() {
        let (session, _rx) = linked_session(Arc::new(NoopListener));
        let _ = session.handle_text(&frame("anonymous_login", "", "", json!("ok")));
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn login_rejection_leaves_session_unauthenticated() {
        let (session, mut rx) = linked_session(Arc::new(NoopListener));
        let _ = session.handle_text(&frame("login", "", "", json!("no")));
        assert!(!session.is_authenticated());
        assert!(!session.is_heartbeat_running());
        assert!(kinds(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn logout_stops_heartbeat_and_clears_user() {
        let (session, _rx) = linked_session(Arc::new(NoopListener));
        let _ = session.handle_text(&frame("login", "", "", json!("ok")));
        let _ = session.handle_text(&frame(
            "user_data",
            "",
            "",
            json!({"id": 7, "anonymous_user": false, "email": "a@b.c", "name": "A"}),
        ));
        assert_eq!(session.user().map(|u| u.id), Some(7));

        session.logout();
        assert!(!session.is_authenticated());
        assert!(!session.is_heartbeat_running());
        assert!(session.user().is_none());
    }

    #[test]
    fn malformed_frames_never_reach_listener() {
        let (logs, _guard) = capture_logs();
        let mut mock = MockSessionListener::new();
        let _ = mock.expect_on_open().return_const(());
        let _ = mock.expect_on_message_observed().times(0);
        let _ = mock.expect_on_broadcast().times(0);
        let _ = mock.expect_on_extension().times(0);
        let (session, _rx) = linked_session(Arc::new(mock));

        assert!(session.handle_text("").is_none());
        assert!(session.handle_text("not json").is_none());
        assert!(session.handle_text("[1,2]").is_none());
        assert!(
            session
                .handle_text(r#"{"type":"ping","class":"","conveyor":"","data":""}"#)
                .is_none()
        );
        assert!(
            session
                .handle_text(
                    r#"{"type":"ping","class":"","conveyor":"","time":"yesterday","data":""}"#
                )
                .is_none()
        );
        assert!(
            session
                .handle_text(&frame("broadcast", "pick_up_chess", "b", json!({"piece": 1})))
                .is_none()
        );
        assert!(logs.count_at_level(Level::WARN) >= 6);
    }

    #[test]
    fn broadcast_goes_to_listener_with_conveyor() {
        let mut mock = MockSessionListener::new();
        let _ = mock.expect_on_open().return_const(());
        let _ = mock.expect_on_message_observed().times(1).return_const(());
        let _ = mock
            .expect_on_broadcast()
            .withf(|conveyor, broadcast| {
                conveyor.as_str() == "player-b"
                    && matches!(broadcast, Broadcast::PickUp(p) if p.piece_name == "king")
            })
            .times(1)
            .return_const(());
        let (session, _rx) = linked_session(Arc::new(mock));

        let text = Instruction::Broadcast(Broadcast::PickUp(PiecePosition {
            piece_name: "king".into(),
            position: Default::default(),
        }))
        .to_envelope("player-b")
        .to_json()
        .unwrap();
        assert_matches!(session.handle_text(&text), Some(Instruction::Broadcast(_)));
    }

    #[test]
    fn unknown_types_are_forwarded_as_extensions() {
        let mut mock = MockSessionListener::new();
        let _ = mock.expect_on_open().return_const(());
        let _ = mock.expect_on_message_observed().return_const(());
        let _ = mock
            .expect_on_extension()
            .with(always(), always())
            .times(2)
            .return_const(());
        let (session, _rx) = linked_session(Arc::new(mock));

        let _ = session.handle_text(&frame("custom_verb", "x", "", json!({"a": 1})));
        let _ = session.handle_text(&frame("get_sync_chess_pieces", "", "player-b", json!("")));
    }

    #[test]
    fn built_in_replies_are_cached() {
        let (session, _rx) = linked_session(Arc::new(NoopListener));
        let _ = session.handle_text(&frame("publickey", "", "", json!("")));
        assert!(session.public_key().is_none());
        let _ = session.handle_text(&frame("publickey", "", "", json!("KEY")));
        assert_eq!(session.public_key().as_deref(), Some("KEY"));

        let _ = session.handle_text(&frame(
            "server_config",
            "",
            "",
            json!({"version": "1", "name": "relay", "online_number": 2, "max_online": 10}),
        ));
        assert_eq!(session.server_config().map(|s| s.online_number), Some(2));
    }

    #[test]
    fn pong_records_timestamp_for_round_trip() {
        let (session, _rx) = linked_session(Arc::new(NoopListener));
        assert!(session.ping());
        let ping = session.last_ping().unwrap();

        let mut env = Envelope::reply("pong", json!(""));
        env.time = format_time(ping + chrono::Duration::milliseconds(25));
        let _ = session.handle_text(&env.to_json().unwrap());
        let rtt = session.round_trip().unwrap();
        // Wire timestamps carry millisecond precision.
        assert!(rtt.as_millis() >= 24 && rtt.as_millis() <= 25);
    }

    #[test]
    fn pong_with_impossible_time_skips_bookkeeping() {
        let (session, _rx) = linked_session(Arc::new(NoopListener));
        let mut env = Envelope::reply("pong", json!(""));
        env.time = "2023-02-30 10:00:00:000".into();
        assert_matches!(
            session.handle_text(&env.to_json().unwrap()),
            Some(Instruction::Pong)
        );
        assert!(session.last_pong().is_none());
    }
}
