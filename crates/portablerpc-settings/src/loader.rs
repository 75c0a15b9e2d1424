//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RpcSettings::default()`]
//! 2. If `~/.portablerpc/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PORTABLERPC_*` environment overrides (highest priority)
//!
//! [`load_settings_from_path`] skips bad overrides with a warning;
//! [`load_settings_checked`] refuses them.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, RpcSettings};

/// Resolve the path to the settings file (`~/.portablerpc/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".portablerpc").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RpcSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RpcSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Like [`load_settings_from_path`], but an out-of-range `PORTABLERPC_*`
/// value fails the load with [`SettingsError::Override`].
pub fn load_settings_checked(path: &Path) -> Result<RpcSettings> {
    let mut settings = load_file_layer(path)?;
    try_apply_overrides(&mut settings, |name| std::env::var(name).ok())?;
    Ok(settings)
}

/// Defaults with the file at `path` merged over them, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<RpcSettings> {
    let defaults = serde_json::to_value(RpcSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value =
            serde_json::from_str(&content).map_err(|source| SettingsError::Malformed {
                path: path.to_owned(),
                source,
            })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value is kept.
pub fn apply_env_overrides(settings: &mut RpcSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (env in production, a map in tests),
/// skipping invalid ones with a warning.
pub fn apply_overrides(settings: &mut RpcSettings, lookup: impl Fn(&str) -> Option<String>) {
    for error in override_layer(settings, &lookup) {
        warn!(%error, "invalid env override, ignoring");
    }
}

/// Apply overrides from `lookup`, failing on the first invalid one.
pub fn try_apply_overrides(
    settings: &mut RpcSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    override_layer(settings, &lookup)
        .into_iter()
        .next()
        .map_or(Ok(()), Err)
}

/// Apply every valid override and return the rejected ones.
fn override_layer(
    settings: &mut RpcSettings,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Vec<SettingsError> {
    let mut rejected = Vec::new();
    assign(
        &mut settings.logging.level,
        read_parsed("PORTABLERPC_LOG_LEVEL", "a non-empty filter", lookup, |s| {
            (!s.is_empty()).then(|| s.to_owned())
        }),
        &mut rejected,
    );
    assign(
        &mut settings.logging.format,
        read_parsed("PORTABLERPC_LOG_FORMAT", "`compact` or `json`", lookup, parse_log_format),
        &mut rejected,
    );
    assign(
        &mut settings.transport.channel_capacity,
        read_parsed(
            "PORTABLERPC_CHANNEL_CAPACITY",
            "an integer in 1..=1048576",
            lookup,
            |s| parse_usize_range(s, 1, 1_048_576),
        ),
        &mut rejected,
    );
    assign(
        &mut settings.transport.max_line_length,
        read_parsed(
            "PORTABLERPC_MAX_LINE_LENGTH",
            "an integer in 64..=67108864",
            lookup,
            |s| parse_usize_range(s, 64, 64 * 1024 * 1024),
        ),
        &mut rejected,
    );
    assign(
        &mut settings.demo.ready_delay_ms,
        read_parsed(
            "PORTABLERPC_READY_DELAY_MS",
            "milliseconds in 0..=60000",
            lookup,
            |s| parse_u64_range(s, 0, 60_000),
        ),
        &mut rejected,
    );
    rejected
}

fn assign<T>(slot: &mut T, outcome: Result<Option<T>>, rejected: &mut Vec<SettingsError>) {
    match outcome {
        Ok(Some(value)) => *slot = value,
        Ok(None) => {}
        Err(error) => rejected.push(error),
    }
}

/// `Ok(None)` when unset, `Err` when set but unparseable.
fn read_parsed<T>(
    key: &'static str,
    expected: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match parse(&value) {
        Some(parsed) => Ok(Some(parsed)),
        None => Err(SettingsError::Override {
            key,
            value,
            expected,
        }),
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "compact" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
