//! Configuration validation

use attend_api::ActivityKind;
use thiserror::Error;

use crate::schema::{RawConfig, RawFeedSource};

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[{section}] {field} must be greater than zero")]
    MustBePositive {
        section: &'static str,
        field: &'static str,
    },

    #[error("[feed] source #{index}: unknown kind '{kind}' (expected \"project\" or \"event\")")]
    UnknownSourceKind { index: usize, kind: String },

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("[service] log_level cannot be empty")]
    EmptyLogLevel,

    #[error("[service] participants: uid {uid} is bound more than once")]
    DuplicateParticipantUid { uid: u32 },

    #[error("[windows] qr_lead_minutes ({lead}) exceeds qr_duration_minutes ({duration}); the window would close before the session starts")]
    LeadExceedsDuration { lead: u32, duration: u32 },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(level) = &config.service.log_level
        && level.trim().is_empty()
    {
        errors.push(ValidationError::EmptyLogLevel);
    }

    let mut bound = std::collections::HashSet::new();
    for binding in &config.service.participants {
        if !bound.insert(binding.uid) {
            errors.push(ValidationError::DuplicateParticipantUid { uid: binding.uid });
        }
    }

    let windows = &config.windows;
    positive(&mut errors, "windows", "qr_duration_minutes", windows.qr_duration_minutes.map(u64::from));
    positive(&mut errors, "windows", "default_qr_max_uses", windows.default_qr_max_uses.map(u64::from));
    if let (Some(lead), Some(duration)) = (windows.qr_lead_minutes, windows.qr_duration_minutes)
        && lead > duration
    {
        errors.push(ValidationError::LeadExceedsDuration { lead, duration });
    }

    let feed = &config.feed;
    positive(&mut errors, "feed", "page_size", feed.page_size.map(u64::from));
    positive(&mut errors, "feed", "source_timeout_ms", feed.source_timeout_ms);
    if let Some(minutes) = feed.recent_window_minutes
        && minutes <= 0
    {
        errors.push(ValidationError::MustBePositive {
            section: "feed",
            field: "recent_window_minutes",
        });
    }
    for (index, source) in feed.sources.iter().enumerate() {
        errors.extend(validate_source(index, source));
    }

    positive(&mut errors, "poll", "interval_ms", config.poll.interval_ms);
    if let Some(url) = &config.poll.base_url
        && let Err(message) = check_url(url)
    {
        errors.push(ValidationError::InvalidUrl {
            url: url.clone(),
            message,
        });
    }

    positive(&mut errors, "requests", "max_requests", config.requests.max_requests.map(u64::from));
    positive(&mut errors, "requests", "interval_ms", config.requests.interval_ms);

    errors
}

fn positive(
    errors: &mut Vec<ValidationError>,
    section: &'static str,
    field: &'static str,
    value: Option<u64>,
) {
    if value == Some(0) {
        errors.push(ValidationError::MustBePositive { section, field });
    }
}

fn validate_source(index: usize, source: &RawFeedSource) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if parse_source_kind(&source.kind).is_err() {
        errors.push(ValidationError::UnknownSourceKind {
            index,
            kind: source.kind.clone(),
        });
    }
    if let Err(message) = check_url(&source.url) {
        errors.push(ValidationError::InvalidUrl {
            url: source.url.clone(),
            message,
        });
    }

    errors
}

/// Parse a feed source kind
pub fn parse_source_kind(kind: &str) -> Result<ActivityKind, String> {
    match kind.to_lowercase().as_str() {
        "project" | "projects" | "proyecto" => Ok(ActivityKind::Project),
        "event" | "events" | "evento" => Ok(ActivityKind::Event),
        other => Err(format!("Unknown source kind: {}", other)),
    }
}

fn check_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| "expected an http:// or https:// URL".to_string())?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err("missing host".into());
    }
    Ok(())
}
