//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields keep their compiled defaults.

mod client;
mod relay;

pub use client::*;
pub use relay::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "client": { "url": "ws://10.0.0.5:2424/ws", "gameTickMs": 40 },
///   "relay": { "port": 2525 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabletopSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Client session and board settings.
    pub client: ClientSettings,
    /// Relay server settings.
    pub relay: RelaySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for TabletopSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: tabletop_core::constants::NAME.to_string(),
            client: ClientSettings::default(),
            relay: RelaySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(TabletopSettings::default()).unwrap();
        assert!(json["client"]["heartbeatIntervalMs"].is_number());
        assert!(json["relay"]["heartbeatTimeoutMs"].is_number());
        assert!(json["client"].get("heartbeat_interval_ms").is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: TabletopSettings =
            serde_json::from_str(r#"{"logging": {"json": true}}"#).unwrap();
        assert!(settings.logging.json);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.relay.port, 2424);
    }
}
