//! In-memory scene for headless clients and tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tabletop_core::coord::Coord3D;

use super::{HoldKind, PieceRenderer};

/// How a headless piece is drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Appearance {
    /// Original material.
    #[default]
    Normal,
    /// Highlight for a piece this session holds.
    HeldLocal,
    /// Translucent indicator for a piece another session holds.
    HeldRemote,
}

#[derive(Clone, Debug, Default)]
struct HeadlessPiece {
    position: Coord3D,
    appearance: Appearance,
}

#[derive(Debug, Default)]
struct SceneState {
    pieces: HashMap<String, HeadlessPiece>,
    open: bool,
}

/// Shared, cloneable scene. Clones observe the same pieces.
#[derive(Clone, Debug, Default)]
pub struct HeadlessScene {
    state: Arc<Mutex<SceneState>>,
}

impl HeadlessScene {
    /// Scene containing exactly `names`, all at the origin.
    pub fn with_pieces<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pieces = names
            .into_iter()
            .map(|n| (n.into(), HeadlessPiece::default()))
            .collect();
        Self {
            state: Arc::new(Mutex::new(SceneState {
                pieces,
                open: false,
            })),
        }
    }

    /// Scene that spawns any piece the first time it is referenced.
    pub fn open() -> Self {
        Self {
            state: Arc::new(Mutex::new(SceneState {
                pieces: HashMap::new(),
                open: true,
            })),
        }
    }

    /// Current appearance of `piece`.
    pub fn appearance(&self, piece: &str) -> Option<Appearance> {
        self.state.lock().pieces.get(piece).map(|p| p.appearance)
    }

    /// Names of every piece, sorted.
    pub fn piece_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().pieces.keys().cloned().collect();
        names.sort();
        names
    }

    fn with_piece(&self, piece: &str, f: impl FnOnce(&mut HeadlessPiece)) {
        let mut state = self.state.lock();
        if state.open {
            f(state.pieces.entry(piece.to_owned()).or_default());
        } else if let Some(p) = state.pieces.get_mut(piece) {
            f(p);
        }
    }
}

impl PieceRenderer for HeadlessScene {
    type Material = Appearance;

    fn contains(&self, piece: &str) -> bool {
        let state = self.state.lock();
        state.open || state.pieces.contains_key(piece)
    }

    fn material(&self, piece: &str) -> Option<Appearance> {
        let state = self.state.lock();
        match state.pieces.get(piece) {
            Some(p) => Some(p.appearance),
            None if state.open => Some(Appearance::Normal),
            None => None,
        }
    }

    fn set_material(&mut self, piece: &str, material: Appearance) {
        self.with_piece(piece, |p| p.appearance = material);
    }

    fn held_material(&self, kind: HoldKind) -> Appearance {
        match kind {
            HoldKind::Local => Appearance::HeldLocal,
            HoldKind::Remote => Appearance::HeldRemote,
        }
    }

    fn position(&self, piece: &str) -> Option<Coord3D> {
        self.state.lock().pieces.get(piece).map(|p| p.position)
    }

    fn set_position(&mut self, piece: &str, position: Coord3D) {
        self.with_piece(piece, |p| p.position = position);
    }
}
