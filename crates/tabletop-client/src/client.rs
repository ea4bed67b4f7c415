//! Single-owner actor around [`Board`].
//!
//! Network callbacks, local input, the game tick and the render tick all
//! arrive on one task, so the ledger and trajectory maps have exactly one
//! writer.

use std::sync::Arc;
use std::time::Duration;

use tabletop_core::coord::Coord3D;
use tabletop_core::envelope::Envelope;
use tabletop_core::ids::SessionId;
use tabletop_core::instruction::{Broadcast, Instruction, PieceSyncData};
use tabletop_settings::ClientSettings;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::board::{Board, BoardConfig, PieceRenderer};
use crate::session::{Session, SessionConfig, SessionListener};

/// Everything the actor reacts to.
#[derive(Debug)]
pub enum ClientEvent {
    /// Login acknowledged.
    Authenticated,
    /// Transport closed.
    Closed,
    /// Peer broadcast.
    Remote {
        /// Originating session.
        conveyor: SessionId,
        /// Decoded broadcast.
        broadcast: Broadcast,
    },
    /// Reconciliation snapshot received.
    Snapshot(Vec<PieceSyncData>),
    /// A peer asked for our snapshot.
    SyncRequested {
        /// Requesting session.
        conveyor: SessionId,
    },
    /// Local pick attempt.
    PickUp {
        /// Piece name.
        piece: String,
    },
    /// Local drag of the held piece.
    Drag {
        /// Piece name.
        piece: String,
        /// New position.
        position: Coord3D,
    },
    /// Local place of the held piece.
    Place {
        /// Piece name.
        piece: String,
        /// Drop position; the current position when absent.
        position: Option<Coord3D>,
    },
    /// Local reset of every piece.
    ResetAll,
    /// Ask for a reconciliation snapshot.
    RequestSync,
    /// Read the current ledger snapshot.
    Inspect(oneshot::Sender<Vec<PieceSyncData>>),
}

/// Bridges session callbacks onto the actor's queue.
struct ActorListener {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl SessionListener for ActorListener {
    fn on_authenticated(&self) {
        let _ = self.tx.send(ClientEvent::Authenticated);
    }

    fn on_close(&self) {
        let _ = self.tx.send(ClientEvent::Closed);
    }

    fn on_broadcast(&self, conveyor: &SessionId, broadcast: &Broadcast) {
        let _ = self.tx.send(ClientEvent::Remote {
            conveyor: conveyor.clone(),
            broadcast: broadcast.clone(),
        });
    }

    fn on_extension(&self, envelope: &Envelope, instruction: &Instruction) {
        match instruction {
            Instruction::SyncPieces(pieces) => {
                let _ = self.tx.send(ClientEvent::Snapshot(pieces.clone()));
            }
            Instruction::GetSyncPieces => {
                let _ = self.tx.send(ClientEvent::SyncRequested {
                    conveyor: SessionId::from(envelope.conveyor.as_str()),
                });
            }
            other => debug!(kind = other.kind(), "extension ignored"),
        }
    }

    fn on_message_observed(&self, envelope: &Envelope) {
        debug!(verb = %envelope.verb(), conveyor = %envelope.conveyor, time = %envelope.time, "observed");
    }
}

/// Cloneable front door to a running [`GameClient`].
#[derive(Clone, Debug)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientHandle {
    /// Queue an event. Returns `false` once the actor is gone.
    pub fn send(&self, event: ClientEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Try to pick `piece` up.
    pub fn pick_up(&self, piece: &str) -> bool {
        self.send(ClientEvent::PickUp {
            piece: piece.to_owned(),
        })
    }

    /// Move the held piece.
    pub fn drag(&self, piece: &str, position: Coord3D) -> bool {
        self.send(ClientEvent::Drag {
            piece: piece.to_owned(),
            position,
        })
    }

    /// Place the held piece.
    pub fn place(&self, piece: &str, position: Option<Coord3D>) -> bool {
        self.send(ClientEvent::Place {
            piece: piece.to_owned(),
            position,
        })
    }

    /// Reset every piece, locally and for peers.
    pub fn reset_all(&self) -> bool {
        self.send(ClientEvent::ResetAll)
    }

    /// Ask for a reconciliation snapshot.
    pub fn request_sync(&self) -> bool {
        self.send(ClientEvent::RequestSync)
    }

    /// Current ledger snapshot, or `None` once the actor is gone.
    pub async fn snapshot(&self) -> Option<Vec<PieceSyncData>> {
        let (tx, rx) = oneshot::channel();
        if !self.send(ClientEvent::Inspect(tx)) {
            return None;
        }
        rx.await.ok()
    }
}

/// Session, board and timers for one player.
pub struct GameClient<R: PieceRenderer> {
    session: Arc<Session>,
    board: Board<R>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    handle: ClientHandle,
    game_tick: Duration,
    render_tick: Duration,
    cancel: CancellationToken,
}

impl<R: PieceRenderer> GameClient<R> {
    /// Build a client whose session feeds this actor.
    pub fn new(
        session_config: SessionConfig,
        board_config: BoardConfig,
        render_tick: Duration,
        renderer: R,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let identity = session_config.identity.clone();
        let session = Session::new(session_config, Arc::new(ActorListener { tx: tx.clone() }));
        let game_tick = board_config.game_tick;
        Self {
            session,
            board: Board::new(identity, board_config, renderer),
            events,
            handle: ClientHandle { tx },
            game_tick,
            render_tick,
            cancel,
        }
    }

    /// Build from loaded settings.
    pub fn from_settings(settings: &ClientSettings, renderer: R, cancel: CancellationToken) -> Self {
        Self::new(
            SessionConfig::from_settings(settings),
            BoardConfig::from_settings(settings),
            settings.render_tick(),
            renderer,
            cancel,
        )
    }

    /// The session this actor drives.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// A handle for input and inspection.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// The board, before the actor starts.
    pub fn board(&self) -> &Board<R> {
        &self.board
    }

    /// Run until cancelled. Returns the board for inspection.
    #[instrument(skip_all, fields(identity = %self.session.identity()))]
    pub async fn run(mut self) -> Board<R> {
        let mut game = tokio::time::interval(self.game_tick);
        game.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut render = tokio::time::interval(self.render_tick);
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("game client started");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(event) = self.events.recv() => self.handle_event(event),
                deadline = game.tick() => {
                    if let Some(moving) = self.board.poll_moving(deadline) {
                        self.emit(moving);
                    }
                }
                _ = render.tick() => self.board.advance(Instant::now()),
            }
        }
        info!("game client stopped");
        self.board
    }

    fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Authenticated => {
                self.emit(Broadcast::UserJoined);
                let _ = self.session.request_sync();
            }
            ClientEvent::Closed => {
                if let Some(piece) = self.board.release_local_hold() {
                    info!(piece = %piece, "local hold dropped on close");
                }
            }
            ClientEvent::Remote {
                conveyor,
                broadcast,
            } => {
                let _ = self.board.apply_remote(&conveyor, &broadcast, Instant::now());
            }
            ClientEvent::Snapshot(pieces) => self.board.apply_snapshot(&pieces),
            ClientEvent::SyncRequested { conveyor } => {
                if &conveyor == self.session.identity() {
                    return;
                }
                debug!(by = %conveyor, "answering sync request");
                let _ = self
                    .session
                    .send_instruction(&Instruction::SyncPieces(self.board.snapshot()));
            }
            ClientEvent::PickUp { piece } => {
                if let Ok(pick) = self.board.pick_up(&piece) {
                    self.emit(pick);
                }
            }
            ClientEvent::Drag { piece, position } => {
                if let Err(e) = self.board.drag(&piece, position) {
                    debug!(error = %e, "drag ignored");
                }
            }
            ClientEvent::Place { piece, position } => {
                if let Ok(place) = self.board.place(&piece, position) {
                    self.emit(place);
                }
            }
            ClientEvent::ResetAll => {
                let reset = self.board.reset_all();
                self.emit(reset);
            }
            ClientEvent::RequestSync => {
                let _ = self.session.request_sync();
            }
            ClientEvent::Inspect(reply) => {
                let _ = reply.send(self.board.snapshot());
            }
        }
    }

    fn emit(&self, broadcast: Broadcast) {
        let class = broadcast.class().to_owned();
        if !self.session.broadcast(broadcast) {
            warn!(class = %class, "broadcast not sent");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::headless::{Appearance, HeadlessScene};
    use serde_json::{Value, json};
    use tabletop_core::instruction::PiecePosition;

    struct Harness {
        handle: ClientHandle,
        session: Arc<Session>,
        outbound: mpsc::Receiver<String>,
        scene: HeadlessScene,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<Board<HeadlessScene>>,
    }

    fn start() -> Harness {
        let scene = HeadlessScene::with_pieces(["piece_7", "king"]);
        let cancel = CancellationToken::new();
        let config = SessionConfig {
            identity: SessionId::from("player-a"),
            ..SessionConfig::default()
        };
        let client = GameClient::new(
            config,
            BoardConfig::default(),
            Duration::from_millis(16),
            scene.clone(),
            cancel.clone(),
        );
        let (tx, outbound) = mpsc::channel(64);
        client.session().on_transport_open(tx);
        let handle = client.handle();
        let session = Arc::clone(client.session());
        let task = tokio::spawn(client.run());
        Harness {
            handle,
            session,
            outbound,
            scene,
            cancel,
            task,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    fn verbs(frames: &[Value]) -> Vec<String> {
        frames
            .iter()
            .map(|v| Envelope::from_value(v.clone()).unwrap().verb())
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn login_announces_join_and_requests_sync() {
        let mut h = start();
        let login = Envelope::reply("anonymous_login", json!("ok")).to_json().unwrap();
        let _ = h.session.handle_text(&login);
        settle().await;
        assert_eq!(
            verbs(&drain(&mut h.outbound)),
            ["get_user_data", "broadcast:user_join_game", "get_sync_chess_pieces"]
        );
        h.cancel.cancel();
        let _ = h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pick_drag_place_emits_throttled_broadcasts() {
        let mut h = start();
        assert!(h.handle.pick_up("piece_7"));
        assert!(h.handle.drag("piece_7", Coord3D::new(1.0, 0.0, 0.0)));
        assert!(h.handle.drag("piece_7", Coord3D::new(2.0, 0.0, 1.0)));
        settle().await;
        assert!(h.handle.place("piece_7", Some(Coord3D::new(2.0, 0.0, 1.0))));
        settle().await;

        let frames = drain(&mut h.outbound);
        assert_eq!(
            verbs(&frames),
            [
                "broadcast:pick_up_chess",
                "broadcast:moving_chess",
                "broadcast:pick_down_chess"
            ]
        );
        assert_eq!(
            frames[1]["data"]["trajectory"],
            json!([{"x": 1.0, "y": 0.0, "z": 0.0}, {"x": 2.0, "y": 0.0, "z": 1.0}])
        );
        assert_eq!(frames[0]["conveyor"], "player-a");

        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(!snapshot[0].is_picked);
        h.cancel.cancel();
        let board = h.task.await.unwrap();
        assert!(board.held_piece().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_pick_sends_nothing() {
        let mut h = start();
        let remote = Instruction::Broadcast(Broadcast::PickUp(PiecePosition {
            piece_name: "king".into(),
            position: Coord3D::ZERO,
        }))
        .to_envelope("player-b")
        .to_json()
        .unwrap();
        let _ = h.session.handle_text(&remote);
        settle().await;
        assert_eq!(h.scene.appearance("king"), Some(Appearance::HeldRemote));

        assert!(h.handle.pick_up("king"));
        settle().await;
        assert!(drain(&mut h.outbound).is_empty());
        h.cancel.cancel();
        let _ = h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn answers_peer_sync_requests_and_applies_snapshots() {
        let mut h = start();
        let snapshot = Instruction::SyncPieces(vec![PieceSyncData {
            piece_name: "king".into(),
            position: Coord3D::new(3.0, 0.0, 0.0),
            is_picked: true,
            picked_by: "player-b".into(),
        }])
        .to_envelope("")
        .to_json()
        .unwrap();
        let _ = h.session.handle_text(&snapshot);

        let request = Instruction::GetSyncPieces.to_envelope("player-c").to_json().unwrap();
        let _ = h.session.handle_text(&request);
        let own = Instruction::GetSyncPieces.to_envelope("player-a").to_json().unwrap();
        let _ = h.session.handle_text(&own);
        settle().await;

        let frames = drain(&mut h.outbound);
        assert_eq!(verbs(&frames), ["sync_chess_pieces"]);
        assert_eq!(frames[0]["data"]["pieces"][0]["picked_by"], "player-b");
        assert_eq!(h.scene.position("king"), Some(Coord3D::new(3.0, 0.0, 0.0)));
        assert_eq!(h.scene.appearance("king"), Some(Appearance::HeldRemote));
        h.cancel.cancel();
        let _ = h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn local_reset_broadcasts_and_applies() {
        let mut h = start();
        assert!(h.handle.pick_up("king"));
        assert!(h.handle.reset_all());
        settle().await;
        assert_eq!(
            verbs(&drain(&mut h.outbound)),
            ["broadcast:pick_up_chess", "broadcast:reset_all_chess_pieces"]
        );
        assert_eq!(h.scene.appearance("king"), Some(Appearance::Normal));
        h.cancel.cancel();
        let board = h.task.await.unwrap();
        assert!(board.held_piece().is_none());
    }
}
