//! The ownership state machine.
//!
//! [`Board`] joins the piece ledger to the rendering collaborator:
//!
//! | from | event | to | effect |
//! |---|---|---|---|
//! | Free | local pick | HeldLocal | highlight, `pick_up_chess` |
//! | HeldRemote | local pick | unchanged | refused, logged, nothing sent |
//! | HeldLocal | local place | Free | restore, `pick_down_chess` |
//! | any | remote pick up | HeldRemote | held-by-other material |
//! | HeldRemote(x) | pick down from x | Free | restore, snap |
//! | any | reset | Free at origin | restore everything |
//!
//! Ownership is optimistic. Local checks use the last known record and only
//! a reconciliation snapshot can correct a stale remote hold.

pub mod headless;
pub mod trajectory;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tabletop_core::constants::{GAME_TICK, MAX_TRAJECTORY_POINTS, PLAYBACK_DURATION};
use tabletop_core::coord::Coord3D;
use tabletop_core::errors::OwnershipError;
use tabletop_core::ids::SessionId;
use tabletop_core::instruction::{Broadcast, PiecePosition, PieceSyncData, PieceTrajectory};
use tabletop_core::ledger::{PieceLedger, PieceState};
use tabletop_settings::ClientSettings;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use self::trajectory::TrajectoryEngine;

/// Which indicator a held piece shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldKind {
    /// Held by this session.
    Local,
    /// Held by another session.
    Remote,
}

/// The rendering collaborator: supplies positions and materials, consumes
/// interpolated positions.
pub trait PieceRenderer {
    /// Opaque material handle.
    type Material: Clone;

    /// Whether the scene has an object named `piece`.
    fn contains(&self, piece: &str) -> bool;
    /// Current material of `piece`.
    fn material(&self, piece: &str) -> Option<Self::Material>;
    /// Replace `piece`'s material.
    fn set_material(&mut self, piece: &str, material: Self::Material);
    /// Indicator material for a held piece.
    fn held_material(&self, kind: HoldKind) -> Self::Material;
    /// Current position of `piece`.
    fn position(&self, piece: &str) -> Option<Coord3D>;
    /// Move `piece`.
    fn set_position(&mut self, piece: &str, position: Coord3D);
}

/// Timing and buffer bounds.
#[derive(Clone, Debug)]
pub struct BoardConfig {
    /// Minimum spacing between `moving_chess` broadcasts.
    pub game_tick: Duration,
    /// Playback duration of one remote trajectory.
    pub trajectory_duration: Duration,
    /// Bound on trail and trajectory length.
    pub max_points: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            game_tick: GAME_TICK,
            trajectory_duration: PLAYBACK_DURATION,
            max_points: MAX_TRAJECTORY_POINTS,
        }
    }
}

impl BoardConfig {
    /// Derive from loaded settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            game_tick: settings.game_tick(),
            trajectory_duration: settings.trajectory_duration(),
            max_points: settings.max_trajectory_points.max(2),
        }
    }
}

#[derive(Debug)]
struct LocalHold {
    piece: String,
    trail: VecDeque<Coord3D>,
    fresh: bool,
    last_emit: Option<Instant>,
}

impl LocalHold {
    fn new(piece: &str) -> Self {
        Self {
            piece: piece.to_owned(),
            trail: VecDeque::new(),
            fresh: false,
            last_emit: None,
        }
    }
}

/// Ownership state machine plus remote motion playback for one session.
pub struct Board<R: PieceRenderer> {
    me: SessionId,
    config: BoardConfig,
    renderer: R,
    ledger: PieceLedger,
    originals: HashMap<String, R::Material>,
    hold: Option<LocalHold>,
    trajectories: TrajectoryEngine,
}

impl<R: PieceRenderer> Board<R> {
    /// Board observed from session `me`.
    pub fn new(me: SessionId, config: BoardConfig, renderer: R) -> Self {
        let trajectories = TrajectoryEngine::new(config.trajectory_duration, config.max_points);
        Self {
            me,
            config,
            renderer,
            ledger: PieceLedger::new(),
            originals: HashMap::new(),
            hold: None,
            trajectories,
        }
    }

    /// Observing session.
    pub fn identity(&self) -> &SessionId {
        &self.me
    }

    /// Ownership state of `piece` from this session's point of view.
    pub fn state(&self, piece: &str) -> PieceState {
        self.ledger.state_for(piece, &self.me)
    }

    /// Piece currently held locally.
    pub fn held_piece(&self) -> Option<&str> {
        self.hold.as_ref().map(|h| h.piece.as_str())
    }

    /// Underlying ledger.
    pub fn ledger(&self) -> &PieceLedger {
        &self.ledger
    }

    /// Rendering collaborator.
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Mutable rendering collaborator.
    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// In-flight remote trajectories.
    pub fn trajectories(&self) -> &TrajectoryEngine {
        &self.trajectories
    }

    // ── Local transitions ───────────────────────────────────────────

    /// `Free -> HeldLocal`. On refusal nothing changes and nothing should be sent.
    pub fn pick_up(&mut self, piece: &str) -> Result<Broadcast, OwnershipError> {
        if let Err(e) = self.check_local_pick(piece) {
            warn!(piece, error = %e, "pick up refused");
            return Err(e);
        }

        let position = self.current_position(piece);
        let _ = self.ledger.apply_pick_up(piece, &self.me, position);
        let _ = self.trajectories.cancel(piece);
        self.mark_held(piece, HoldKind::Local);
        self.hold = Some(LocalHold::new(piece));
        debug!(piece, "picked up");

        Ok(Broadcast::PickUp(PiecePosition {
            piece_name: piece.to_owned(),
            position,
        }))
    }

    fn check_local_pick(&self, piece: &str) -> Result<(), OwnershipError> {
        if !self.renderer.contains(piece) {
            return Err(OwnershipError::UnknownPiece(piece.to_owned()));
        }
        if let Some(hold) = &self.hold {
            return Err(OwnershipError::AlreadyHolding(hold.piece.clone()));
        }
        self.ledger.check_pick(piece, &self.me)
    }

    /// Move the held piece and sample its path.
    pub fn drag(&mut self, piece: &str, position: Coord3D) -> Result<(), OwnershipError> {
        let max_points = self.config.max_points;
        let hold = match self.hold.as_mut() {
            Some(hold) if hold.piece == piece => hold,
            _ => return Err(OwnershipError::NotHolding(piece.to_owned())),
        };
        hold.trail.push_back(position);
        while hold.trail.len() > max_points {
            let _ = hold.trail.pop_front();
        }
        hold.fresh = true;

        self.renderer.set_position(piece, position);
        self.ledger.apply_moving(piece, &[position]);
        Ok(())
    }

    /// Emit the trailing path when a game tick has elapsed since the last
    /// emission and at least two samples are buffered.
    ///
    /// The emitted window's last point seeds the next window.
    pub fn poll_moving(&mut self, now: Instant) -> Option<Broadcast> {
        let tick = self.config.game_tick;
        let hold = self.hold.as_mut()?;
        if !hold.fresh || hold.trail.len() < 2 {
            return None;
        }
        if hold
            .last_emit
            .is_some_and(|at| now.saturating_duration_since(at) < tick)
        {
            return None;
        }

        let trajectory: Vec<Coord3D> = hold.trail.drain(..).collect();
        if let Some(last) = trajectory.last() {
            hold.trail.push_back(*last);
        }
        hold.fresh = false;
        // Stay on the tick grid so one late poll does not delay the next.
        hold.last_emit = Some(match hold.last_emit {
            Some(at) if now.saturating_duration_since(at) < tick * 2 => at + tick,
            _ => now,
        });

        Some(Broadcast::Moving(PieceTrajectory {
            piece_name: hold.piece.clone(),
            trajectory,
        }))
    }

    /// `HeldLocal -> Free` at `position`, or where the piece currently is.
    pub fn place(
        &mut self,
        piece: &str,
        position: Option<Coord3D>,
    ) -> Result<Broadcast, OwnershipError> {
        match &self.hold {
            Some(hold) if hold.piece == piece => {}
            _ => {
                let e = OwnershipError::NotHolding(piece.to_owned());
                warn!(piece, error = %e, "place refused");
                return Err(e);
            }
        }

        let position = position.unwrap_or_else(|| self.current_position(piece));
        self.hold = None;
        if let Err(e) = self.ledger.apply_pick_down(piece, &self.me, position) {
            warn!(piece, error = %e, "ledger disagrees with local hold");
        }
        self.renderer.set_position(piece, position);
        self.restore(piece);
        debug!(piece, "placed");

        Ok(Broadcast::PickDown(PiecePosition {
            piece_name: piece.to_owned(),
            position,
        }))
    }

    /// Local reset: every piece back to free at the origin.
    pub fn reset_all(&mut self) -> Broadcast {
        self.apply_reset();
        Broadcast::ResetAll
    }

    /// Drop the local hold without broadcasting.
    pub fn release_local_hold(&mut self) -> Option<String> {
        let hold = self.hold.take()?;
        let _ = self.ledger.release(&hold.piece, &self.me);
        self.restore(&hold.piece);
        Some(hold.piece)
    }

    // ── Remote transitions ──────────────────────────────────────────

    /// Apply a peer broadcast. Returns whether board state changed.
    pub fn apply_remote(&mut self, conveyor: &SessionId, broadcast: &Broadcast, now: Instant) -> bool {
        if conveyor == &self.me {
            debug!(class = broadcast.class(), "ignoring own broadcast");
            return false;
        }
        match broadcast {
            Broadcast::PickUp(p) => {
                self.remote_pick_up(conveyor, p);
                true
            }
            Broadcast::PickDown(p) => self.remote_pick_down(conveyor, p),
            Broadcast::Moving(t) => self.remote_moving(t, now),
            Broadcast::ResetAll => {
                info!(by = %conveyor, "reset by peer");
                self.apply_reset();
                true
            }
            Broadcast::UserJoined => {
                debug!(by = %conveyor, "peer joined");
                false
            }
            Broadcast::UserLeft => self.remote_left(conveyor),
            Broadcast::Other { class, .. } => {
                debug!(class = %class, by = %conveyor, "unhandled broadcast class");
                false
            }
        }
    }

    fn remote_pick_up(&mut self, by: &SessionId, p: &PiecePosition) {
        let piece = p.piece_name.as_str();
        if self.held_piece() == Some(piece) {
            warn!(piece, by = %by, "remote pick up overrides local hold");
            self.hold = None;
        }
        let _ = self.ledger.apply_pick_up(piece, by, p.position);
        let _ = self.trajectories.cancel(piece);
        self.renderer.set_position(piece, p.position);
        self.mark_held(piece, HoldKind::Remote);
    }

    fn remote_pick_down(&mut self, by: &SessionId, p: &PiecePosition) -> bool {
        let piece = p.piece_name.as_str();
        if let Err(e) = self.ledger.apply_pick_down(piece, by, p.position) {
            warn!(piece, by = %by, error = %e, "ignoring pick down from non-holder");
            return false;
        }
        let _ = self.trajectories.cancel(piece);
        self.renderer.set_position(piece, p.position);
        self.restore(piece);
        true
    }

    fn remote_moving(&mut self, t: &PieceTrajectory, now: Instant) -> bool {
        let piece = t.piece_name.as_str();
        if self.held_piece() == Some(piece) {
            debug!(piece, "ignoring motion for locally held piece");
            return false;
        }
        self.ledger.apply_moving(piece, &t.trajectory);
        self.trajectories.install(piece, &t.trajectory, now);
        true
    }

    fn remote_left(&mut self, by: &SessionId) -> bool {
        let released = self.ledger.release_all_held_by(by);
        for p in &released {
            let _ = self.trajectories.cancel(&p.piece_name);
            self.restore(&p.piece_name);
        }
        if !released.is_empty() {
            info!(by = %by, count = released.len(), "released pieces of departed peer");
        }
        !released.is_empty()
    }

    fn apply_reset(&mut self) {
        self.hold = None;
        self.trajectories.clear();
        self.ledger.reset_all();
        let names: Vec<String> = self.ledger.piece_names().map(str::to_owned).collect();
        for name in &names {
            self.renderer.set_position(name, Coord3D::ZERO);
        }
        let originals: Vec<(String, R::Material)> = self.originals.drain().collect();
        for (name, material) in originals {
            self.renderer.set_material(&name, material);
        }
    }

    // ── Reconciliation ──────────────────────────────────────────────

    /// Overwrite local state from a snapshot. Last snapshot wins in full.
    pub fn apply_snapshot(&mut self, pieces: &[PieceSyncData]) {
        self.ledger.apply_snapshot(pieces);
        for entry in pieces {
            let piece = entry.piece_name.as_str();
            let _ = self.trajectories.cancel(piece);
            self.renderer.set_position(piece, entry.position);

            match self.ledger.state_for(piece, &self.me) {
                PieceState::Free => {
                    if self.held_piece() == Some(piece) {
                        warn!(piece, "snapshot frees locally held piece");
                        self.hold = None;
                    }
                    self.restore(piece);
                }
                PieceState::HeldRemote(holder) => {
                    if self.held_piece() == Some(piece) {
                        warn!(piece, holder = %holder, "snapshot assigns locally held piece to peer");
                        self.hold = None;
                    }
                    self.mark_held(piece, HoldKind::Remote);
                }
                PieceState::HeldLocal => {
                    if self.held_piece() != Some(piece) {
                        if let Some(previous) = self.release_local_hold() {
                            warn!(piece = %previous, "snapshot replaces local hold");
                        }
                        self.hold = Some(LocalHold::new(piece));
                    }
                    self.mark_held(piece, HoldKind::Local);
                }
            }
        }
        info!(pieces = pieces.len(), "snapshot applied");
    }

    /// Full snapshot of this board's ledger.
    pub fn snapshot(&self) -> Vec<PieceSyncData> {
        self.ledger.snapshot()
    }

    // ── Rendering ───────────────────────────────────────────────────

    /// One render tick of remote motion playback.
    pub fn advance(&mut self, now: Instant) {
        self.trajectories.advance(now, &mut self.renderer);
    }

    fn current_position(&mut self, piece: &str) -> Coord3D {
        match self.renderer.position(piece) {
            Some(position) => position,
            None => self.ledger.record(piece).position,
        }
    }

    fn mark_held(&mut self, piece: &str, kind: HoldKind) {
        if !self.renderer.contains(piece) {
            return;
        }
        if !self.originals.contains_key(piece) {
            if let Some(material) = self.renderer.material(piece) {
                let _ = self.originals.insert(piece.to_owned(), material);
            }
        }
        let held = self.renderer.held_material(kind);
        self.renderer.set_material(piece, held);
    }

    fn restore(&mut self, piece: &str) {
        if let Some(material) = self.originals.remove(piece) {
            self.renderer.set_material(piece, material);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
