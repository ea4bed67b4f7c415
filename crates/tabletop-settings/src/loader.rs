//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::TabletopSettings;

/// Resolve the path to the settings file (`~/.tabletop/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tabletop").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TabletopSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an unusable value is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<TabletopSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Reject values that would stall a timer or make trajectories unplayable.
pub fn validate(settings: &TabletopSettings) -> Result<()> {
    let client = &settings.client;
    let relay = &settings.relay;
    let checks: [(bool, &'static str, &'static str); 7] = [
        (client.heartbeat_interval_ms > 0, "client.heartbeatIntervalMs", "must be positive"),
        (client.game_tick_ms > 0, "client.gameTickMs", "must be positive"),
        (client.render_tick_ms > 0, "client.renderTickMs", "must be positive"),
        (client.trajectory_duration_ms > 0, "client.trajectoryDurationMs", "must be positive"),
        (client.max_trajectory_points >= 2, "client.maxTrajectoryPoints", "must be at least 2"),
        (relay.heartbeat_interval_ms > 0, "relay.heartbeatIntervalMs", "must be positive"),
        (
            relay.heartbeat_timeout_ms >= relay.heartbeat_interval_ms,
            "relay.heartbeatTimeoutMs",
            "must not be shorter than relay.heartbeatIntervalMs",
        ),
    ];
    match checks.into_iter().find(|(ok, _, _)| !ok) {
        Some((_, field, reason)) => Err(SettingsError::Invalid { field, reason }),
        None => Ok(()),
    }
}

fn load_file_layer(path: &Path) -> Result<TabletopSettings> {
    let defaults = serde_json::to_value(TabletopSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TABLETOP_*` environment overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut TabletopSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut TabletopSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TABLETOP_URL") {
        settings.client.url = v;
    }
    if let Some(v) = env.string("TABLETOP_IDENTITY") {
        settings.client.identity = v;
    }
    if let Some(v) = env.u64("TABLETOP_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.client.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("TABLETOP_GAME_TICK_MS", 10, 1_000) {
        settings.client.game_tick_ms = v;
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.string("TABLETOP_RELAY_HOST") {
        settings.relay.host = v;
    }
    if let Some(v) = env.u16("TABLETOP_RELAY_PORT", 1, 65_535) {
        settings.relay.port = v;
    }
    if let Some(v) = env.bool("TABLETOP_ANONYMOUS_LOGIN") {
        settings.relay.anonymous_login = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TABLETOP_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CredentialSettings;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> TabletopSettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let mut settings = TabletopSettings::default();
        apply_overrides(&mut settings, |name| map.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"relay": {"port": 2424, "host": "localhost"}});
        let source = serde_json::json!({"relay": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["relay"]["port"], 9090);
        assert_eq!(merged["relay"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.relay.port, 2424);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"client": {"gameTickMs": 40, "credentials": {"kind": "account", "email": "a@b.c", "password": "pw"}}, "relay": {"port": 9090}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.client.game_tick_ms, 40);
        assert_eq!(settings.client.heartbeat_interval_ms, 5_000);
        assert_eq!(settings.relay.port, 9090);
        assert_eq!(settings.relay.host, "127.0.0.1");
        assert_eq!(
            settings.client.credentials,
            CredentialSettings::Account {
                email: "a@b.c".into(),
                password: "pw".into()
            }
        );
    }

    #[test]
    fn zero_tick_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"client": {"renderTickMs": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Invalid { field: "client.renderTickMs", .. })
        ));
    }

    #[test]
    fn relay_timeout_shorter_than_interval_is_rejected() {
        let mut settings = TabletopSettings::default();
        assert!(validate(&settings).is_ok());
        settings.relay.heartbeat_timeout_ms = 1_000;
        assert!(matches!(
            validate(&settings),
            Err(SettingsError::Invalid { field: "relay.heartbeatTimeoutMs", .. })
        ));
    }

    #[test]
    fn invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let settings = overrides(&[
            ("TABLETOP_URL", "ws://10.0.0.2:2424/ws"),
            ("TABLETOP_IDENTITY", "player-a"),
            ("TABLETOP_GAME_TICK_MS", "40"),
            ("TABLETOP_RELAY_PORT", "3000"),
            ("TABLETOP_ANONYMOUS_LOGIN", "off"),
            ("TABLETOP_LOG_LEVEL", "debug"),
        ]);
        assert_eq!(settings.client.url, "ws://10.0.0.2:2424/ws");
        assert_eq!(settings.client.identity, "player-a");
        assert_eq!(settings.client.game_tick_ms, 40);
        assert_eq!(settings.relay.port, 3000);
        assert!(!settings.relay.anonymous_login);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let settings = overrides(&[
            ("TABLETOP_GAME_TICK_MS", "5"),
            ("TABLETOP_RELAY_PORT", "0"),
            ("TABLETOP_HEARTBEAT_INTERVAL_MS", "soon"),
            ("TABLETOP_ANONYMOUS_LOGIN", "maybe"),
            ("TABLETOP_URL", ""),
        ]);
        let defaults = TabletopSettings::default();
        assert_eq!(settings.client.game_tick_ms, defaults.client.game_tick_ms);
        assert_eq!(settings.relay.port, defaults.relay.port);
        assert_eq!(settings.client.heartbeat_interval_ms, defaults.client.heartbeat_interval_ms);
        assert!(settings.relay.anonymous_login);
        assert_eq!(settings.client.url, defaults.client.url);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true));
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false));
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("2424", 1, 65_535), Some(2424));
        assert_eq!(parse_u16_range("0", 1, 65_535), None);
        assert_eq!(parse_u16_range("70000", 1, 65_535), None);
        assert_eq!(parse_u64_range("50", 10, 1_000), Some(50));
        assert_eq!(parse_u64_range("-1", 10, 1_000), None);
    }
}
