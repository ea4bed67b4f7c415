//! # tabletop-settings
//!
//! Configuration for the tabletop client and relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TabletopSettings::default()`]
//! 2. **User file**: `~/.tabletop/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TABLETOP_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<TabletopSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loads `~/.tabletop/settings.json` with env overrides on first call and
/// caches the result. Falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static TabletopSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            TabletopSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: TabletopSettings) -> std::result::Result<(), TabletopSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_protocol_constants() {
        let settings = TabletopSettings::default();
        assert_eq!(settings.name, "tabletop");
        assert_eq!(settings.client.heartbeat_interval_ms, 5_000);
        assert_eq!(settings.client.game_tick_ms, 50);
        assert_eq!(settings.client.max_trajectory_points, 10);
        assert_eq!(settings.relay.port, 2424);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn first_init_wins_and_is_cached() {
        let custom = TabletopSettings {
            relay: RelaySettings {
                port: 4242,
                ..RelaySettings::default()
            },
            ..TabletopSettings::default()
        };
        assert!(init_settings(custom).is_ok());

        let rejected = init_settings(TabletopSettings::default()).unwrap_err();
        assert_eq!(rejected.relay.port, 2424);
        assert_eq!(get_settings().relay.port, 4242);
        assert!(std::ptr::eq(get_settings(), get_settings()));
    }

    #[test]
    fn settings_path_under_home_dir() {
        let path = settings_path();
        assert!(path.ends_with(".tabletop/settings.json"));
    }
}
