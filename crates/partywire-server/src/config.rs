//! Server configuration.
//!
//! Loading flow:
//! 1. Start with [`ServerConfig::default()`]
//! 2. Deep-merge the JSON config file over it, if the file exists
//! 3. Apply `PARTYWIRE_*` environment overrides
//!
//! Out-of-range or unparsable environment values are logged and ignored.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ConfigError;

/// Configuration for [`PartyServer`](crate::server::PartyServer).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind; `0` picks a free port.
    pub port: u16,
    /// Upgrade requests beyond this many open sockets get `503`.
    pub max_connections: usize,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
    /// Seconds between server Ping frames.
    pub ping_interval_secs: u64,
    /// Seconds without a Pong before the socket is closed.
    pub pong_timeout_secs: u64,
    /// Handle messages of one room one at a time.
    pub serialize_room_dispatch: bool,
    /// Status code of `fetch.error` responses.
    pub invalid_params_status: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_message_size: 1024 * 1024,
            outbound_buffer: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            serialize_room_dispatch: false,
            invalid_params_status: 400,
        }
    }
}

impl ServerConfig {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue("outbound_buffer must be > 0".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("max_connections must be > 0".into()));
        }
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("ping_interval_secs must be > 0".into()));
        }
        if !(100..=599).contains(&self.invalid_params_status) {
            return Err(ConfigError::InvalidValue(format!(
                "invalid_params_status {} is not an HTTP status",
                self.invalid_params_status
            )));
        }
        Ok(())
    }
}

/// Load configuration from `path` (missing file means defaults), then apply
/// environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading config file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Merge `source` into `target`.
///
/// Objects merge per key, everything else is replaced, and `null` in
/// `source` keeps the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PARTYWIRE_*` environment variables.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

fn apply_overrides(config: &mut ServerConfig, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("PARTYWIRE_HOST") {
        config.host = v;
    }
    if let Some(v) = checked(&read, "PARTYWIRE_PORT", |v| parse_u16_range(v, 0, 65535)) {
        config.port = v;
    }
    if let Some(v) = checked(&read, "PARTYWIRE_MAX_CONNECTIONS", |v| parse_usize_range(v, 1, 1_000_000)) {
        config.max_connections = v;
    }
    if let Some(v) = checked(&read, "PARTYWIRE_MAX_MESSAGE_SIZE", |v| {
        parse_usize_range(v, 1024, 256 * 1024 * 1024)
    }) {
        config.max_message_size = v;
    }
    if let Some(v) = checked(&read, "PARTYWIRE_OUTBOUND_BUFFER", |v| parse_usize_range(v, 1, 1_000_000)) {
        config.outbound_buffer = v;
    }
    if let Some(v) = checked(&read, "PARTYWIRE_PING_INTERVAL_SECS", |v| parse_u64_range(v, 1, 3600)) {
        config.ping_interval_secs = v;
    }
    if let Some(v) = checked(&read, "PARTYWIRE_PONG_TIMEOUT_SECS", |v| parse_u64_range(v, 1, 86_400)) {
        config.pong_timeout_secs = v;
    }
    if let Some(v) = checked(&read, "PARTYWIRE_SERIALIZE_ROOM_DISPATCH", parse_bool) {
        config.serialize_room_dispatch = v;
    }
    if let Some(v) = checked(&read, "PARTYWIRE_INVALID_PARAMS_STATUS", |v| parse_u16_range(v, 100, 599)) {
        config.invalid_params_status = v;
    }
}

fn checked<T>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = read(name)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions ──────────────────────────────────────────

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `u16` within `min..=max`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// `usize` within `min..=max`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
