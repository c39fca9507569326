//! Centralized configuration for the protocol engine.
//!
//! Constants live on [`ProtocolConfig`]; per-engine knobs live on
//! [`EngineConfig`], usually set through [`crate::EngineBuilder`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Protocol-level constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Upper bound on live registry entries before LRU eviction kicks in.
    pub const DEFAULT_MAX_LIVE_HANDLES: usize = 10_000;
    /// Registry entries untouched for this long may be reaped.
    pub const DEFAULT_HANDLE_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
    /// Minimum spacing between lazy idle sweeps.
    pub const REAP_INTERVAL: Duration = Duration::from_secs(10);
    /// Member name of the synthesized iterator step on stream-backed objects.
    pub const STREAM_NEXT_MEMBER: &'static str = "next";
    /// Member name the thenable probe uses; always resolves to "absent".
    pub const THENABLE_PROBE_MEMBER: &'static str = "then";
}

/// Runtime options for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Maximum live registry entries (0 = unlimited).
    pub max_live_handles: usize,
    /// Idle timeout for registry entries (`None` = never reap).
    pub handle_idle_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_live_handles: ProtocolConfig::DEFAULT_MAX_LIVE_HANDLES,
            handle_idle_timeout: Some(ProtocolConfig::DEFAULT_HANDLE_IDLE_TIMEOUT),
        }
    }
}

impl EngineConfig {
    /// Config without any capacity or idle limits.
    pub fn unbounded() -> Self {
        Self {
            max_live_handles: 0,
            handle_idle_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_bounded() {
        let config = EngineConfig::default();
        assert_eq!(config.max_live_handles, ProtocolConfig::DEFAULT_MAX_LIVE_HANDLES);
        assert_eq!(
            config.handle_idle_timeout,
            Some(ProtocolConfig::DEFAULT_HANDLE_IDLE_TIMEOUT)
        );
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = EngineConfig {
            max_live_handles: 3,
            handle_idle_timeout: None,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("max_live_handles"));
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
