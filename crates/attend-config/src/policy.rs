//! Validated policy structures

use attend_api::ActivityKind;
use attend_util::{default_data_dir, default_socket_path, RecordId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::{
    RawConfig, RawFeedPolicy, RawFeedSource, RawPollPolicy, RawRequestLimits, RawServiceConfig,
    RawWindowPolicy,
};
use crate::validation::parse_source_kind;

/// Validated policy ready for use by the service
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub service: ServiceConfig,
    pub windows: WindowPolicy,
    pub feed: FeedPolicy,
    pub poll: PollPolicy,
    pub requests: RequestLimits,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            windows: WindowPolicy::from_raw(raw.windows),
            feed: FeedPolicy::from_raw(raw.feed),
            poll: PollPolicy::from_raw(raw.poll),
            requests: RequestLimits::from_raw(raw.requests),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub log_level: String,
    /// uid -> the only record that account may enroll or check in
    pub participant_records: HashMap<u32, RecordId>,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let defaults = Self::default();
        Self {
            socket_path: raw.socket_path.unwrap_or(defaults.socket_path),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            log_level: raw.log_level.unwrap_or(defaults.log_level),
            participant_records: raw
                .participants
                .into_iter()
                .map(|b| (b.uid, RecordId::new(b.record_id)))
                .collect(),
        }
    }

    pub fn record_for_uid(&self, uid: Option<u32>) -> Option<RecordId> {
        uid.and_then(|u| self.participant_records.get(&u).copied())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            data_dir: default_data_dir(),
            log_level: "info".into(),
            participant_records: HashMap::new(),
        }
    }
}

/// Timing of check-in windows relative to the session's `[start, end]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPolicy {
    pub qr_lead: chrono::Duration,
    pub qr_duration: chrono::Duration,
    pub manual_lead: chrono::Duration,
    /// None: open until the session end plus grace
    pub manual_duration: Option<chrono::Duration>,
    pub grace_after_end: chrono::Duration,
    pub default_qr_max_uses: Option<u32>,
}

impl WindowPolicy {
    fn from_raw(raw: RawWindowPolicy) -> Self {
        let defaults = Self::default();
        let minutes = |v: Option<u32>, d: chrono::Duration| {
            v.map(|m| chrono::Duration::minutes(m as i64)).unwrap_or(d)
        };

        Self {
            qr_lead: minutes(raw.qr_lead_minutes, defaults.qr_lead),
            qr_duration: minutes(raw.qr_duration_minutes, defaults.qr_duration),
            manual_lead: minutes(raw.manual_lead_minutes, defaults.manual_lead),
            manual_duration: match raw.manual_duration_minutes {
                Some(0) => None,
                Some(m) => Some(chrono::Duration::minutes(m as i64)),
                None => defaults.manual_duration,
            },
            grace_after_end: minutes(raw.grace_after_end_minutes, defaults.grace_after_end),
            default_qr_max_uses: raw.default_qr_max_uses,
        }
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            qr_lead: chrono::Duration::minutes(15),
            qr_duration: chrono::Duration::minutes(30),
            manual_lead: chrono::Duration::minutes(15),
            manual_duration: None,
            grace_after_end: chrono::Duration::minutes(15),
            default_qr_max_uses: None,
        }
    }
}

/// Minutes on either side of a session that count as SOON / RECENT
pub const DEFAULT_RECENT_WINDOW_MINUTES: i64 = 180;

/// Items requested per source per fetch cycle
pub const DEFAULT_PAGE_SIZE: u32 = 24;

#[derive(Debug, Clone)]
pub struct FeedPolicy {
    pub page_size: u32,
    pub source_timeout: Duration,
    pub recent_window_minutes: i64,
    pub refresh_debounce: Duration,
    pub sources: Vec<FeedSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub kind: ActivityKind,
    pub url: String,
}

impl FeedPolicy {
    fn from_raw(raw: RawFeedPolicy) -> Self {
        let defaults = Self::default();
        Self {
            page_size: raw.page_size.unwrap_or(defaults.page_size),
            source_timeout: raw
                .source_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.source_timeout),
            recent_window_minutes: raw
                .recent_window_minutes
                .unwrap_or(defaults.recent_window_minutes),
            refresh_debounce: raw
                .refresh_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.refresh_debounce),
            sources: raw.sources.into_iter().filter_map(convert_source).collect(),
        }
    }
}

impl Default for FeedPolicy {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            source_timeout: Duration::from_secs(8),
            recent_window_minutes: DEFAULT_RECENT_WINDOW_MINUTES,
            refresh_debounce: Duration::from_secs(1),
            sources: Vec::new(),
        }
    }
}

fn convert_source(raw: RawFeedSource) -> Option<FeedSource> {
    let kind = parse_source_kind(&raw.kind).ok()?;
    Some(FeedSource { kind, url: raw.url })
}

#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub base_url: Option<String>,
}

impl PollPolicy {
    fn from_raw(raw: RawPollPolicy) -> Self {
        Self {
            interval: raw
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(Self::default().interval),
            base_url: raw.base_url,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_requests: u32,
    pub interval: Duration,
}

impl RequestLimits {
    fn from_raw(raw: RawRequestLimits) -> Self {
        let defaults = Self::default();
        Self {
            max_requests: raw.max_requests.unwrap_or(defaults.max_requests),
            interval: raw
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
        }
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_requests: 30,
            interval: Duration::from_secs(1),
        }
    }
}
