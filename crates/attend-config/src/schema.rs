//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub service: RawServiceConfig,

    #[serde(default)]
    pub windows: RawWindowPolicy,

    #[serde(default)]
    pub feed: RawFeedPolicy,

    #[serde(default)]
    pub poll: RawPollPolicy,

    #[serde(default)]
    pub requests: RawRequestLimits,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: `$XDG_RUNTIME_DIR/attendd/attendd.sock`)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the SQLite store
    pub data_dir: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset
    pub log_level: Option<String>,

    /// Local accounts bound to an academic record
    #[serde(default)]
    pub participants: Vec<RawParticipantBinding>,
}

/// `[[service.participants]]`: the record a participant uid acts as
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawParticipantBinding {
    pub uid: u32,
    pub record_id: i64,
}

/// Check-in window timing, in minutes relative to the session's own bounds
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawWindowPolicy {
    /// How early before the session start a QR window becomes usable
    pub qr_lead_minutes: Option<u32>,

    /// Lifetime of a QR window from the moment it becomes usable
    pub qr_duration_minutes: Option<u32>,

    pub manual_lead_minutes: Option<u32>,

    /// Lifetime of a manual window; 0 means until the session end (plus grace)
    pub manual_duration_minutes: Option<u32>,

    /// Windows never outlive `session end + grace`
    pub grace_after_end_minutes: Option<u32>,

    /// Usage cap applied when a QR window is opened without one
    pub default_qr_max_uses: Option<u32>,
}

/// Upcoming-sessions feed settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawFeedPolicy {
    pub page_size: Option<u32>,

    /// Per-source fetch timeout
    pub source_timeout_ms: Option<u64>,

    /// Width of the SOON / RECENT bands
    pub recent_window_minutes: Option<i64>,

    /// Minimum spacing between accepted reload triggers
    pub refresh_debounce_ms: Option<u64>,

    /// Remote page sources merged into the feed alongside the local catalog
    #[serde(default)]
    pub sources: Vec<RawFeedSource>,
}

/// A remote paginated collection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawFeedSource {
    /// "project" or "event"
    pub kind: String,

    /// Collection URL; `page` and `size` query parameters are appended
    pub url: String,
}

/// Conditional polling settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPollPolicy {
    pub interval_ms: Option<u64>,

    /// Base URL of a remote roster API; local IPC is used when absent
    pub base_url: Option<String>,
}

/// Per-client request budget
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRequestLimits {
    pub max_requests: Option<u32>,
    pub interval_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_schema() {
        let toml_str = r#"
            config_version = 1

            [service]
            log_level = "debug"

            [windows]
            qr_lead_minutes = 10
            qr_duration_minutes = 20
            default_qr_max_uses = 120

            [feed]
            page_size = 12

            [[feed.sources]]
            kind = "event"
            url = "https://portal.example.edu/api/eventos"

            [poll]
            interval_ms = 3000
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.windows.qr_lead_minutes, Some(10));
        assert_eq!(config.feed.sources.len(), 1);
        assert_eq!(config.feed.sources[0].kind, "event");
        assert_eq!(config.poll.interval_ms, Some(3000));
        assert!(config.requests.max_requests.is_none());
    }

    #[test]
    fn every_section_is_optional() {
        let config: RawConfig = toml::from_str("config_version = 1").unwrap();
        assert!(config.service.socket_path.is_none());
        assert!(config.feed.sources.is_empty());
    }
}
