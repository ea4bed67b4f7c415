//! Shared relay state handed to every connection.

use std::sync::Arc;

use parking_lot::Mutex;
use tabletop_core::ids::SessionId;
use tabletop_core::instruction::{Broadcast, PiecePosition, PieceSyncData, ServerDescriptor};
use tabletop_core::ledger::PieceLedger;
use tabletop_settings::RelaySettings;
use tracing::{debug, warn};

use crate::accounts::AccountDirectory;
use crate::websocket::broadcast::BroadcastManager;

/// Settings, accounts, the relay ledger, and the fan-out registry.
pub struct RelayContext {
    /// Relay settings.
    pub settings: RelaySettings,
    /// Accounts accepted by `get_login`.
    pub accounts: AccountDirectory,
    /// Fan-out registry.
    pub broadcast: Arc<BroadcastManager>,
    ledger: Mutex<PieceLedger>,
}

impl RelayContext {
    /// Context for `settings`.
    pub fn new(settings: RelaySettings) -> Self {
        let accounts = AccountDirectory::new(settings.accounts.clone());
        Self {
            settings,
            accounts,
            broadcast: Arc::new(BroadcastManager::new()),
            ledger: Mutex::new(PieceLedger::new()),
        }
    }

    /// `server_config` payload with the live online count.
    pub fn descriptor(&self, online_number: u32) -> ServerDescriptor {
        ServerDescriptor {
            version: self.settings.version.clone(),
            anonymous_login: self.settings.anonymous_login,
            key: self.settings.key.clone(),
            url: self.settings.url.clone(),
            name: self.settings.name.clone(),
            online_number,
            max_online: self.settings.max_online,
        }
    }

    /// Mirror a relayed broadcast into the relay ledger.
    pub fn record_broadcast(&self, conveyor: &SessionId, broadcast: &Broadcast) {
        let mut ledger = self.ledger.lock();
        match broadcast {
            Broadcast::PickUp(p) => {
                if let Some(previous) = ledger.apply_pick_up(&p.piece_name, conveyor, p.position) {
                    debug!(piece = %p.piece_name, from = %previous, to = %conveyor, "hold displaced");
                }
            }
            Broadcast::PickDown(p) => {
                if let Err(e) = ledger.apply_pick_down(&p.piece_name, conveyor, p.position) {
                    warn!(by = %conveyor, error = %e, "pick down from non-holder not recorded");
                }
            }
            Broadcast::Moving(t) => ledger.apply_moving(&t.piece_name, &t.trajectory),
            Broadcast::ResetAll => ledger.reset_all(),
            Broadcast::UserJoined | Broadcast::UserLeft | Broadcast::Other { .. } => {}
        }
    }

    /// Reconciliation snapshot from the relay ledger.
    pub fn snapshot(&self) -> Vec<PieceSyncData> {
        self.ledger.lock().snapshot()
    }

    /// Free every piece `conveyor` holds.
    pub fn release_all_held_by(&self, conveyor: &SessionId) -> Vec<PiecePosition> {
        self.ledger.lock().release_all_held_by(conveyor)
    }

    /// Number of pieces currently held by anyone.
    pub fn held_count(&self) -> usize {
        self.ledger
            .lock()
            .snapshot()
            .iter()
            .filter(|p| p.is_picked)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletop_core::coord::Coord3D;
    use tabletop_core::instruction::PieceTrajectory;

    fn pos(piece: &str, x: f64) -> PiecePosition {
        PiecePosition {
            piece_name: piece.into(),
            position: Coord3D::new(x, 0.0, 0.0),
        }
    }

    #[test]
    fn broadcasts_drive_the_ledger() {
        let ctx = RelayContext::new(RelaySettings::default());
        let a = SessionId::from("a");
        let b = SessionId::from("b");

        ctx.record_broadcast(&a, &Broadcast::PickUp(pos("rook", 0.0)));
        ctx.record_broadcast(
            &a,
            &Broadcast::Moving(PieceTrajectory {
                piece_name: "rook".into(),
                trajectory: vec![Coord3D::ZERO, Coord3D::new(4.0, 0.0, 0.0)],
            }),
        );
        let snap = ctx.snapshot();
        assert_eq!(snap[0].picked_by, "a");
        assert_eq!(snap[0].position, Coord3D::new(4.0, 0.0, 0.0));
        assert_eq!(ctx.held_count(), 1);

        ctx.record_broadcast(&b, &Broadcast::PickDown(pos("rook", 9.0)));
        assert_eq!(ctx.snapshot()[0].picked_by, "a");

        ctx.record_broadcast(&a, &Broadcast::PickDown(pos("rook", 5.0)));
        assert!(!ctx.snapshot()[0].is_picked);

        ctx.record_broadcast(&b, &Broadcast::PickUp(pos("queen", 1.0)));
        assert_eq!(ctx.release_all_held_by(&b), vec![pos("queen", 1.0)]);
        assert_eq!(ctx.held_count(), 0);

        ctx.record_broadcast(&a, &Broadcast::ResetAll);
        assert!(ctx.snapshot().iter().all(|p| p.position == Coord3D::ZERO));
    }

    #[test]
    fn descriptor_reflects_settings() {
        let settings = RelaySettings {
            name: "club".into(),
            max_online: 4,
            anonymous_login: false,
            ..RelaySettings::default()
        };
        let d = RelayContext::new(settings).descriptor(2);
        assert_eq!(d.name, "club");
        assert_eq!(d.online_number, 2);
        assert_eq!(d.max_online, 4);
        assert!(!d.anonymous_login);
    }
}
