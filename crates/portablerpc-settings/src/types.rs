//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields take their compiled default.

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "logging": { "level": "debug", "format": "json" },
///   "transport": { "channelCapacity": 64 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    /// Log output configuration.
    pub logging: LoggingSettings,
    /// Transport tuning.
    pub transport: TransportSettings,
    /// Demo binary behavior.
    pub demo: DemoSettings,
}

/// Output format of the stderr log subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Log output configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Transport tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Queue depth of each in-memory endpoint.
    pub channel_capacity: usize,
    /// Longest accepted line for newline-delimited JSON transports, in bytes.
    pub max_line_length: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_line_length: 1024 * 1024,
        }
    }
}

/// Demo binary behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DemoSettings {
    /// How long the worker waits before announcing `ready`.
    pub ready_delay_ms: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            ready_delay_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let s = RpcSettings::default();
        assert_eq!(s.logging.level, "warn");
        assert_eq!(s.logging.format, LogFormat::Compact);
        assert_eq!(s.transport.channel_capacity, 256);
        assert_eq!(s.transport.max_line_length, 1_048_576);
        assert_eq!(s.demo.ready_delay_ms, 2000);
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(RpcSettings::default()).unwrap();
        assert_eq!(v["transport"]["channelCapacity"], 256);
        assert_eq!(v["transport"]["maxLineLength"], 1_048_576);
        assert_eq!(v["demo"]["readyDelayMs"], 2000);
        assert_eq!(v["logging"]["format"], "compact");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: RpcSettings =
            serde_json::from_value(json!({"logging": {"format": "json"}})).unwrap();
        assert_eq!(s.logging.format, LogFormat::Json);
        assert_eq!(s.logging.level, "warn");
        assert_eq!(s.transport, TransportSettings::default());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let r = serde_json::from_value::<RpcSettings>(json!({"logging": {"format": "xml"}}));
        assert!(r.is_err());
    }
}
