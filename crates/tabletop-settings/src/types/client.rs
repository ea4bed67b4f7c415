//! Client session and board settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabletop_core::constants::{
    DEFAULT_PORT, GAME_TICK, HEARTBEAT_INTERVAL, MAX_TRAJECTORY_POINTS, PLAYBACK_DURATION,
};

/// Client-side settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Relay WebSocket URL.
    pub url: String,
    /// Session identity used as `conveyor`; empty generates a UUID v7.
    pub identity: String,
    /// Heartbeat ping period once authenticated.
    pub heartbeat_interval_ms: u64,
    /// Minimum spacing between move broadcasts.
    pub game_tick_ms: u64,
    /// Playback duration for received trajectories.
    pub trajectory_duration_ms: u64,
    /// Waypoints kept per move broadcast.
    pub max_trajectory_points: usize,
    /// Render tick driving trajectory playback.
    pub render_tick_ms: u64,
    /// Login performed after connecting.
    pub credentials: CredentialSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:{DEFAULT_PORT}/ws"),
            identity: String::new(),
            heartbeat_interval_ms: duration_ms(HEARTBEAT_INTERVAL),
            game_tick_ms: duration_ms(GAME_TICK),
            trajectory_duration_ms: duration_ms(PLAYBACK_DURATION),
            max_trajectory_points: MAX_TRAJECTORY_POINTS,
            render_tick_ms: 16,
            credentials: CredentialSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Move broadcast spacing.
    pub fn game_tick(&self) -> Duration {
        Duration::from_millis(self.game_tick_ms)
    }

    /// Trajectory playback duration.
    pub fn trajectory_duration(&self) -> Duration {
        Duration::from_millis(self.trajectory_duration_ms)
    }

    /// Render tick period.
    pub fn render_tick(&self) -> Duration {
        Duration::from_millis(self.render_tick_ms)
    }
}

/// How the client authenticates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CredentialSettings {
    /// `get_anonymous_login` with a self-declared email.
    Anonymous {
        /// Email sent with the request.
        #[serde(default)]
        email: String,
    },
    /// `get_login` with an account.
    Account {
        /// Account email.
        #[serde(default)]
        email: String,
        /// Account password.
        #[serde(default)]
        password: String,
    },
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self::Anonymous {
            email: "anonymous@example.com".to_string(),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
