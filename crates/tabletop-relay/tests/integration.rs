//! End-to-end tests against a relay bound to an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tabletop_client::board::headless::{Appearance, HeadlessScene};
use tabletop_client::{BoardConfig, ClientHandle, GameClient, Session, SessionConfig};
use tabletop_core::coord::Coord3D;
use tabletop_core::envelope::Envelope;
use tabletop_core::ids::SessionId;
use tabletop_core::instruction::{
    AnonymousCredentials, Broadcast, Instruction, LoginStatus, PiecePosition, PieceSyncData,
};
use tabletop_relay::RelayServer;
use tabletop_relay::shutdown::ShutdownReport;
use tabletop_settings::RelaySettings;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Relay {
    server: RelayServer,
    url: String,
    handle: JoinHandle<()>,
}

impl Relay {
    async fn start() -> Self {
        let server = RelayServer::new(
            RelaySettings {
                port: 0,
                public_key: "TEST-KEY".into(),
                ..RelaySettings::default()
            },
            None,
        );
        let (addr, handle) = server.listen().await.unwrap();
        Self {
            server,
            url: format!("ws://{addr}/ws"),
            handle,
        }
    }

    async fn stop(self) -> ShutdownReport {
        self.server
            .shutdown()
            .graceful_shutdown(self.handle, Some(TIMEOUT))
            .await
    }
}

/// Connect and consume the unsolicited `publickey`.
async fn connect(relay: &Relay) -> Ws {
    let (mut ws, _) = connect_async(&relay.url).await.unwrap();
    let greeting = read(&mut ws).await;
    assert_eq!(greeting.kind, "publickey");
    assert_eq!(greeting.data, json!("TEST-KEY"));
    ws
}

async fn read_text(ws: &mut Ws) -> String {
    loop {
        let frame = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return text.as_str().to_owned();
        }
    }
}

async fn read(ws: &mut Ws) -> Envelope {
    Envelope::parse(&read_text(ws).await).unwrap()
}

async fn send_raw(ws: &mut Ws, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn send(ws: &mut Ws, instruction: Instruction, conveyor: &str) -> String {
    let text = instruction.to_envelope(conveyor).to_json().unwrap();
    send_raw(ws, &text).await;
    text
}

async fn assert_silent(ws: &mut Ws) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "expected no frame, got {next:?}");
}

fn pick_up(piece: &str, position: Coord3D) -> Instruction {
    Instruction::Broadcast(Broadcast::PickUp(PiecePosition {
        piece_name: piece.into(),
        position,
    }))
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw protocol
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_gets_pong() {
    let relay = Relay::start().await;
    let mut ws = connect(&relay).await;

    let _ = send(&mut ws, Instruction::Ping, "player-a").await;
    let pong = read(&mut ws).await;
    assert_eq!(pong.kind, "pong");
    assert_eq!(pong.conveyor, "");
    assert!(pong.sent_at().is_some());

    let _ = relay.stop().await;
}

#[tokio::test]
async fn anonymous_login_then_server_config() {
    let relay = Relay::start().await;
    let mut ws = connect(&relay).await;

    let login = Instruction::GetAnonymousLogin(AnonymousCredentials {
        email: "a@example.com".into(),
    });
    let _ = send(&mut ws, login, "player-a").await;
    let reply = Instruction::from_envelope(&read(&mut ws).await).unwrap();
    assert_eq!(reply, Instruction::AnonymousLogin(LoginStatus::Accepted));

    let _ = send(&mut ws, Instruction::GetServerConfig, "player-a").await;
    match Instruction::from_envelope(&read(&mut ws).await).unwrap() {
        Instruction::ServerConfig(d) => {
            assert_eq!(d.online_number, 1);
            assert!(d.anonymous_login);
        }
        other => panic!("unexpected reply {other:?}"),
    }

    let _ = relay.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_everyone_but_the_sender() {
    let relay = Relay::start().await;
    let mut a = connect(&relay).await;
    let mut b = connect(&relay).await;
    let mut c = connect(&relay).await;

    let sent = send(&mut a, pick_up("piece_7", Coord3D::new(1.0, 0.0, 0.0)), "player-a").await;

    assert_eq!(read_text(&mut b).await, sent);
    assert_eq!(read_text(&mut c).await, sent);
    assert_silent(&mut a).await;

    let _ = relay.stop().await;
}

#[tokio::test]
async fn malformed_frames_get_error_replies() {
    let relay = Relay::start().await;
    let mut ws = connect(&relay).await;

    send_raw(&mut ws, "not json").await;
    let reply = read(&mut ws).await;
    assert_eq!(reply.kind, "error");

    let bad_time = json!({"type": "ping", "class": "", "conveyor": "a", "time": "noon", "data": ""});
    send_raw(&mut ws, &bad_time.to_string()).await;
    assert_eq!(read(&mut ws).await.kind, "error");

    // The connection survives bad input.
    let _ = send(&mut ws, Instruction::Ping, "player-a").await;
    assert_eq!(read(&mut ws).await.kind, "pong");

    let _ = relay.stop().await;
}

#[tokio::test]
async fn late_joiner_reconciles_from_relay_ledger() {
    let relay = Relay::start().await;
    let mut a = connect(&relay).await;
    let _ = send(&mut a, pick_up("piece_3", Coord3D::new(0.5, 0.0, 0.5)), "player-a").await;
    // Frames on one connection are handled in order.
    let _ = send(&mut a, Instruction::Ping, "player-a").await;
    assert_eq!(read(&mut a).await.kind, "pong");

    let mut b = connect(&relay).await;
    let _ = send(&mut b, Instruction::GetSyncPieces, "player-b").await;
    let pieces = match Instruction::from_envelope(&read(&mut b).await).unwrap() {
        Instruction::SyncPieces(pieces) => pieces,
        other => panic!("unexpected reply {other:?}"),
    };
    assert_eq!(
        pieces,
        vec![PieceSyncData {
            piece_name: "piece_3".into(),
            position: Coord3D::new(0.5, 0.0, 0.5),
            is_picked: true,
            picked_by: "player-a".into(),
        }]
    );

    let _ = relay.stop().await;
}

#[tokio::test]
async fn departure_releases_held_pieces() {
    let relay = Relay::start().await;
    let mut a = connect(&relay).await;
    let mut b = connect(&relay).await;

    let _ = send(&mut a, pick_up("piece_7", Coord3D::new(1.0, 0.0, 0.0)), "player-a").await;
    assert_eq!(read(&mut b).await.verb(), "broadcast:pick_up_chess");

    a.close(None).await.unwrap();

    let released = read(&mut b).await;
    assert_eq!(released.verb(), "broadcast:pick_down_chess");
    assert_eq!(released.conveyor, "player-a");
    assert_eq!(released.data["piece_name"], "piece_7");
    assert_eq!(released.data["position"], json!({"x": 1.0, "y": 0.0, "z": 0.0}));

    let left = read(&mut b).await;
    assert_eq!(left.verb(), "broadcast:user_left_game");
    assert_eq!(left.conveyor, "player-a");

    let _ = relay.stop().await;
}

#[tokio::test]
async fn shutdown_waits_for_sessions_to_release_pieces() {
    let relay = Relay::start().await;
    let ctx = Arc::clone(relay.server.context());
    let mut a = connect(&relay).await;

    let _ = send(&mut a, pick_up("piece_7", Coord3D::new(1.0, 0.0, 0.0)), "player-a").await;
    let _ = send(&mut a, Instruction::Ping, "player-a").await;
    assert_eq!(read(&mut a).await.kind, "pong");
    assert!(ctx.snapshot()[0].is_picked);

    let report = relay.stop().await;
    assert_eq!(report.drained, 1);
    assert_eq!(report.abandoned, 0);
    assert!(report.listener_stopped);
    assert!(!ctx.snapshot()[0].is_picked);
    assert_eq!(ctx.broadcast.connection_count().await, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Two game clients
// ─────────────────────────────────────────────────────────────────────────────

struct Player {
    session: Arc<Session>,
    handle: ClientHandle,
    scene: HeadlessScene,
    task: JoinHandle<()>,
}

async fn join(relay: &Relay, identity: &str, cancel: &CancellationToken) -> Player {
    let scene = HeadlessScene::open();
    let client = GameClient::new(
        SessionConfig {
            identity: SessionId::from(identity),
            ..SessionConfig::default()
        },
        BoardConfig::default(),
        Duration::from_millis(16),
        scene.clone(),
        cancel.child_token(),
    );
    let session = client.session().clone();
    let handle = client.handle();
    let task = tokio::spawn(async move {
        let _ = client.run().await;
    });

    let _reader = session.connect(&relay.url).await.unwrap();
    assert!(session.anonymous_login(&format!("{identity}@example.com")));
    wait_until(|| session.is_authenticated()).await;

    Player {
        session,
        handle,
        scene,
        task,
    }
}

async fn piece(player: &Player, name: &str) -> Option<PieceSyncData> {
    player
        .handle
        .snapshot()
        .await?
        .into_iter()
        .find(|p| p.piece_name == name)
}

async fn wait_for_piece(player: &Player, name: &str, check: impl Fn(&PieceSyncData) -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !piece(player, name).await.is_some_and(|p| check(&p)) {
        assert!(tokio::time::Instant::now() < deadline, "{name} did not converge in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn drag_and_place_converges_on_peer() {
    let relay = Relay::start().await;
    let cancel = CancellationToken::new();
    let a = join(&relay, "player-a", &cancel).await;
    let b = join(&relay, "player-b", &cancel).await;

    assert!(a.handle.pick_up("piece_7"));
    wait_for_piece(&b, "piece_7", |p| p.is_picked && p.picked_by == "player-a").await;
    wait_until(|| b.scene.appearance("piece_7") == Some(Appearance::HeldRemote)).await;

    assert!(a.handle.drag("piece_7", Coord3D::new(1.0, 0.0, 0.0)));
    assert!(a.handle.drag("piece_7", Coord3D::new(2.0, 0.0, 1.0)));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(a.handle.place("piece_7", None));

    wait_for_piece(&b, "piece_7", |p| {
        !p.is_picked && p.position == Coord3D::new(2.0, 0.0, 1.0)
    })
    .await;
    wait_until(|| b.scene.appearance("piece_7") == Some(Appearance::Normal)).await;

    // Free again, so B may take it.
    assert!(b.handle.pick_up("piece_7"));
    wait_for_piece(&a, "piece_7", |p| p.picked_by == "player-b").await;

    a.session.disconnect();
    b.session.disconnect();
    cancel.cancel();
    let _ = a.task.await;
    let _ = b.task.await;
    let _ = relay.stop().await;
}

#[tokio::test]
async fn joining_client_adopts_relay_snapshot() {
    let relay = Relay::start().await;
    let cancel = CancellationToken::new();
    let a = join(&relay, "player-a", &cancel).await;

    assert!(a.handle.pick_up("piece_1"));
    let ctx = relay.server.context().clone();
    wait_until(|| ctx.snapshot().iter().any(|p| p.piece_name == "piece_1")).await;

    let b = join(&relay, "player-b", &cancel).await;
    wait_for_piece(&b, "piece_1", |p| p.is_picked && p.picked_by == "player-a").await;

    // Held by A, so B's attempt is refused locally and nothing is relayed.
    assert!(b.handle.pick_up("piece_1"));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        ctx.snapshot()
            .into_iter()
            .find(|p| p.piece_name == "piece_1")
            .map(|p| p.picked_by),
        Some("player-a".to_owned())
    );

    cancel.cancel();
    let _ = a.task.await;
    let _ = b.task.await;
    let _ = relay.stop().await;
}
