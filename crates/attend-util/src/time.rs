//! Time utilities for attendd
//!
//! Every temporal decision (window validity, session classification,
//! enrollment windows) is a pure function of a `now` supplied by a
//! [`Clock`] and the stored timestamps.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `ATTEND_MOCK_TIME` environment variable can be set
//! to override the system time seen by [`SystemClock`]. Mock time advances
//! at the same rate as real time.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-04-14 08:57:00`)

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use std::sync::{Mutex, OnceLock};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "ATTEND_MOCK_TIME";

static MOCK_TIME_OFFSET: OnceLock<Option<Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // wraps Local::now()
fn get_mock_time_offset() -> Option<Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") else {
                tracing::warn!(
                    mock_time = %raw,
                    expected_format = "%Y-%m-%d %H:%M:%S",
                    "Invalid mock time format"
                );
                return None;
            };
            let Some(mock_dt) = Local.from_local_datetime(&naive).single() else {
                tracing::warn!(mock_time = %raw, "Mock time is ambiguous in local timezone");
                return None;
            };
            let offset = mock_dt.signed_duration_since(chrono::Local::now());
            tracing::info!(
                mock_time = %raw,
                offset_secs = offset.num_seconds(),
                "Mock time enabled"
            );
            Some(offset)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Wall clock, honouring `ATTEND_MOCK_TIME` in debug builds
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        now()
    }
}

/// Manually driven clock for tests and replay
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Local>) -> Self {
        Self {
            current: Mutex::new(at),
        }
    }

    pub fn set(&self, at: DateTime<Local>) {
        if let Ok(mut current) = self.current.lock() {
            *current = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Combine a calendar date and a wall-clock time into a local instant.
///
/// Times falling into a DST gap resolve to the equivalent UTC reading.
pub fn combine(date: NaiveDate, time: NaiveTime) -> DateTime<Local> {
    let naive = date.and_time(time);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

/// Resolve a session's `(date, start, end)` into concrete instants.
///
/// An end earlier than the start means the session crosses midnight, so the
/// end moves to the following day.
pub fn session_bounds(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> (DateTime<Local>, DateTime<Local>) {
    let ini = combine(date, start);
    let mut fin = combine(date, end);
    if fin < ini {
        fin += Duration::hours(24);
    }
    (ini, fin)
}

/// Round a signed duration to the nearest whole minute, halves rounding up.
pub fn round_minutes(d: Duration) -> i64 {
    (d.num_milliseconds() + 30_000).div_euclid(60_000)
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_clock_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| format!("invalid time {:?}: {}", s, e))
}

/// Format a DateTime with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Helper to format minute totals in human-readable form
pub fn format_minutes(minutes: i64) -> String {
    let sign = if minutes < 0 { "-" } else { "" };
    let minutes = minutes.abs();
    let hours = minutes / 60;
    let rest = minutes % 60;

    if hours > 0 {
        format!("{}{}h {}m", sign, hours, rest)
    } else {
        format!("{}{}m", sign, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_session_bounds_same_day() {
        let date = NaiveDate::from_ymd_opt(2025, 4, 14).unwrap();
        let (ini, fin) = session_bounds(date, t(9, 0), t(10, 0));
        assert_eq!((fin - ini).num_minutes(), 60);
    }

    #[test]
    fn test_session_bounds_cross_midnight() {
        let date = NaiveDate::from_ymd_opt(2025, 4, 14).unwrap();
        let (ini, fin) = session_bounds(date, t(22, 0), t(1, 30));
        assert_eq!((fin - ini).num_minutes(), 210);
        assert_eq!(fin.date_naive(), date.succ_opt().unwrap());
    }

    #[test]
    fn test_round_minutes() {
        assert_eq!(round_minutes(Duration::seconds(89)), 1);
        assert_eq!(round_minutes(Duration::seconds(90)), 2);
        assert_eq!(round_minutes(Duration::seconds(-89)), -1);
        assert_eq!(round_minutes(Duration::seconds(-90)), -1);
        assert_eq!(round_minutes(Duration::minutes(180)), 180);
        assert_eq!(round_minutes(Duration::zero()), 0);
    }

    #[test]
    fn test_parse_clock_time() {
        assert_eq!(parse_clock_time("09:00").unwrap(), t(9, 0));
        assert_eq!(parse_clock_time("09:00:00").unwrap(), t(9, 0));
        assert!(parse_clock_time("25:00").is_err());
        assert!(parse_clock_time("nine").is_err());
    }

    #[test]
    fn test_fixed_clock_advance() {
        let start = Local.with_ymd_and_hms(2025, 4, 14, 8, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::minutes(57));
        assert_eq!(clock.now(), Local.with_ymd_and_hms(2025, 4, 14, 8, 57, 0).unwrap());
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(45), "45m");
        assert_eq!(format_minutes(90), "1h 30m");
        assert_eq!(format_minutes(-20), "-20m");
    }
}
