//! Relay server settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabletop_core::constants::{DEFAULT_PORT, HEARTBEAT_INTERVAL};

/// Relay-side settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Display name reported in `server_config`.
    pub name: String,
    /// Version reported in `server_config`.
    pub version: String,
    /// Key reported in `server_config`.
    pub key: String,
    /// Public URL reported in `server_config`.
    pub url: String,
    /// Public key sent on connect and on `get_publickey`.
    pub public_key: String,
    /// Whether `get_anonymous_login` is accepted.
    pub anonymous_login: bool,
    /// Capacity reported in `server_config`; further logins are refused.
    pub max_online: u32,
    /// Liveness check period.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is closed.
    pub heartbeat_timeout_ms: u64,
    /// Per-connection outbound queue depth.
    pub max_send_queue: usize,
    /// Known accounts for `get_login`.
    pub accounts: Vec<AccountSettings>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            name: "tabletop relay".to_string(),
            version: tabletop_core::constants::VERSION.to_string(),
            key: String::new(),
            url: String::new(),
            public_key: String::new(),
            anonymous_login: true,
            max_online: 100,
            heartbeat_interval_ms: u64::try_from(HEARTBEAT_INTERVAL.as_millis())
                .unwrap_or(u64::MAX),
            heartbeat_timeout_ms: 15_000,
            max_send_queue: 1024,
            accounts: Vec::new(),
        }
    }
}

impl RelaySettings {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Liveness check period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence threshold.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// One account accepted by `get_login`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountSettings {
    /// Account id reported in `user_data`.
    pub id: u64,
    /// Login email.
    pub email: String,
    /// Login password.
    pub password: String,
    /// Display name.
    pub name: String,
    /// QQ number.
    pub qq: u64,
    /// UI theme color.
    pub theme_color: String,
}
