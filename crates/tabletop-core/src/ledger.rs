//! Per-piece ownership bookkeeping shared by the client board and the relay.
//!
//! The ledger is pure state: it knows who holds what and where each piece
//! was last seen, but not how pieces look or when to broadcast. Records are
//! created lazily the first time a piece name is referenced.

use std::collections::HashMap;

use chrono::{DateTime, Local};

use crate::coord::Coord3D;
use crate::errors::OwnershipError;
use crate::ids::SessionId;
use crate::instruction::{PiecePosition, PieceSyncData};

/// Ownership state of one piece as seen by a particular session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PieceState {
    /// Nobody holds the piece.
    Free,
    /// The observing session holds the piece.
    HeldLocal,
    /// Another session holds the piece.
    HeldRemote(SessionId),
}

/// Ownership record for one piece.
#[derive(Clone, Debug, PartialEq)]
pub struct PieceRecord {
    /// Current holder, `None` when free.
    pub holder: Option<SessionId>,
    /// Last known position.
    pub position: Coord3D,
    /// When this record last changed.
    pub last_update: DateTime<Local>,
}

impl PieceRecord {
    fn new() -> Self {
        Self {
            holder: None,
            position: Coord3D::ZERO,
            last_update: Local::now(),
        }
    }

    /// Whether any session holds the piece.
    pub fn is_picked(&self) -> bool {
        self.holder.is_some()
    }

    /// State relative to the observing session `me`.
    pub fn state_for(&self, me: &SessionId) -> PieceState {
        match &self.holder {
            None => PieceState::Free,
            Some(holder) if holder == me => PieceState::HeldLocal,
            Some(holder) => PieceState::HeldRemote(holder.clone()),
        }
    }

    fn touch(&mut self) {
        self.last_update = Local::now();
    }
}

/// Where and when a piece was last picked up. Cleared on reset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MoveHistory {
    /// Position at the last pick up.
    pub last_pick_up_position: Option<Coord3D>,
    /// Time of the last pick up.
    pub last_pick_up_at: Option<DateTime<Local>>,
    /// Session that performed the last pick up.
    pub last_pick_up_by: Option<SessionId>,
}

/// Ownership records for every piece referenced so far.
#[derive(Clone, Debug, Default)]
pub struct PieceLedger {
    records: HashMap<String, PieceRecord>,
    history: HashMap<String, MoveHistory>,
}

impl PieceLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record without creating it.
    pub fn get(&self, piece: &str) -> Option<&PieceRecord> {
        self.records.get(piece)
    }

    /// Look up a record, creating a free one at the origin if absent.
    pub fn record(&mut self, piece: &str) -> &mut PieceRecord {
        self.records
            .entry(piece.to_owned())
            .or_insert_with(PieceRecord::new)
    }

    /// Current holder of `piece`.
    pub fn holder(&self, piece: &str) -> Option<&SessionId> {
        self.records.get(piece).and_then(|r| r.holder.as_ref())
    }

    /// State of `piece` relative to `me`; unknown pieces are free.
    pub fn state_for(&self, piece: &str, me: &SessionId) -> PieceState {
        self.records
            .get(piece)
            .map_or(PieceState::Free, |r| r.state_for(me))
    }

    /// Pick-up history for `piece`.
    pub fn history(&self, piece: &str) -> Option<&MoveHistory> {
        self.history.get(piece)
    }

    /// Number of known pieces.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no piece has been referenced yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Names of every known piece.
    pub fn piece_names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Advisory check before a local pick: refuses when the last known
    /// record shows a different holder.
    pub fn check_pick(&self, piece: &str, me: &SessionId) -> Result<(), OwnershipError> {
        match self.holder(piece) {
            Some(holder) if holder != me => Err(OwnershipError::HeldByOther {
                piece: piece.to_owned(),
                holder: holder.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Record a pick up by `by`. Applied unconditionally; returns the
    /// previous holder when it was someone else.
    pub fn apply_pick_up(
        &mut self,
        piece: &str,
        by: &SessionId,
        position: Coord3D,
    ) -> Option<SessionId> {
        let record = self.record(piece);
        let displaced = record.holder.replace(by.clone()).filter(|prev| prev != by);
        record.position = position;
        record.touch();

        let history = self.history.entry(piece.to_owned()).or_default();
        history.last_pick_up_position = Some(position);
        history.last_pick_up_at = Some(Local::now());
        history.last_pick_up_by = Some(by.clone());
        displaced
    }

    /// Record a pick down by `by`. Accepted when `by` is the recorded
    /// holder or the piece is free; otherwise the record is left alone.
    pub fn apply_pick_down(
        &mut self,
        piece: &str,
        by: &SessionId,
        position: Coord3D,
    ) -> Result<(), OwnershipError> {
        let record = self.record(piece);
        match &record.holder {
            Some(holder) if holder != by => {
                return Err(OwnershipError::HeldByOther {
                    piece: piece.to_owned(),
                    holder: holder.clone(),
                });
            }
            _ => {}
        }
        record.holder = None;
        record.position = position;
        record.touch();
        Ok(())
    }

    /// Record motion: the final waypoint becomes the last known position.
    pub fn apply_moving(&mut self, piece: &str, trajectory: &[Coord3D]) {
        if let Some(last) = trajectory.last() {
            let record = self.record(piece);
            record.position = *last;
            record.touch();
        }
    }

    /// Free `piece` in place if `by` holds it. Returns whether it was freed.
    pub fn release(&mut self, piece: &str, by: &SessionId) -> bool {
        match self.records.get_mut(piece) {
            Some(record) if record.holder.as_ref() == Some(by) => {
                record.holder = None;
                record.touch();
                true
            }
            _ => false,
        }
    }

    /// Every known piece back to free at the origin; history cleared.
    pub fn reset_all(&mut self) {
        for record in self.records.values_mut() {
            record.holder = None;
            record.position = Coord3D::ZERO;
            record.touch();
        }
        self.history.clear();
    }

    /// Overwrite records from a snapshot. A tuple marked picked with an
    /// empty holder is recorded as free.
    pub fn apply_snapshot(&mut self, pieces: &[PieceSyncData]) {
        for entry in pieces {
            let record = self.record(&entry.piece_name);
            record.holder = (entry.is_picked && !entry.picked_by.is_empty())
                .then(|| SessionId::from(entry.picked_by.as_str()));
            record.position = entry.position;
            record.touch();
        }
    }

    /// Full snapshot, sorted by piece name.
    pub fn snapshot(&self) -> Vec<PieceSyncData> {
        let mut pieces: Vec<PieceSyncData> = self
            .records
            .iter()
            .map(|(name, r)| PieceSyncData {
                piece_name: name.clone(),
                position: r.position,
                is_picked: r.is_picked(),
                picked_by: r.holder.as_ref().map(ToString::to_string).unwrap_or_default(),
            })
            .collect();
        pieces.sort_by(|a, b| a.piece_name.cmp(&b.piece_name));
        pieces
    }

    /// Free every piece held by `by`, returning what was released.
    pub fn release_all_held_by(&mut self, by: &SessionId) -> Vec<PiecePosition> {
        let mut released: Vec<PiecePosition> = self
            .records
            .iter_mut()
            .filter(|(_, r)| r.holder.as_ref() == Some(by))
            .map(|(name, r)| {
                r.holder = None;
                r.touch();
                PiecePosition {
                    piece_name: name.clone(),
                    position: r.position,
                }
            })
            .collect();
        released.sort_by(|a, b| a.piece_name.cmp(&b.piece_name));
        released
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
