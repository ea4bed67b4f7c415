//! Package-level constants and protocol defaults.

use std::time::Duration;

/// Current version (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "tabletop";

/// Default relay port.
pub const DEFAULT_PORT: u16 = 2424;

/// Period between heartbeat pings once authenticated.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum spacing between two `moving_chess` broadcasts for the held piece.
pub const GAME_TICK: Duration = Duration::from_millis(50);

/// Playback duration applied to every received trajectory.
pub const PLAYBACK_DURATION: Duration = Duration::from_millis(50);

/// Upper bound on waypoints carried by one `moving_chess` broadcast.
pub const MAX_TRAJECTORY_POINTS: usize = 10;

/// Success token carried by `login` / `anonymous_login`.
pub const LOGIN_OK: &str = "ok";

/// Failure token carried by `login` / `anonymous_login`.
pub const LOGIN_NO: &str = "no";
