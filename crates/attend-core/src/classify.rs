//! Relative-time classification of session occurrences
//!
//! Nothing stores a session's temporal state; it is recomputed from `now`
//! on every read.

use attend_api::{Session, SessionClassification, TemporalState};
use attend_util::round_minutes;
use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy)]
pub struct SessionTemporalClassifier {
    /// Minutes on either side of a session counted as SOON / RECENT
    recent_window: i64,
}

impl SessionTemporalClassifier {
    pub fn new(recent_window_minutes: i64) -> Self {
        Self {
            recent_window: recent_window_minutes,
        }
    }

    pub fn classify(&self, now: DateTime<Local>, session: &Session) -> SessionClassification {
        let (ini, fin) = session.bounds();
        let until_start = round_minutes(ini - now);
        let since_end = round_minutes(now - fin);

        SessionClassification {
            session_id: session.id,
            state: self.bucket(now, ini, fin),
            minutes_until_start: until_start,
            minutes_since_end: since_end,
        }
    }

    pub fn state(&self, now: DateTime<Local>, session: &Session) -> TemporalState {
        let (ini, fin) = session.bounds();
        self.bucket(now, ini, fin)
    }

    fn bucket(&self, now: DateTime<Local>, ini: DateTime<Local>, fin: DateTime<Local>) -> TemporalState {
        let r = self.recent_window;
        let until_start = round_minutes(ini - now);
        let since_end = round_minutes(now - fin);

        if now >= ini && now <= fin {
            TemporalState::Now
        } else if 0 < until_start && until_start <= r {
            TemporalState::Soon
        } else if 0 < since_end && since_end <= r {
            TemporalState::Recent
        } else if until_start > r {
            TemporalState::Later
        } else {
            TemporalState::Past
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_api::SessionParent;
    use attend_util::{EventId, SessionId};
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn session(start: (u32, u32), end: (u32, u32)) -> Session {
        Session {
            id: SessionId::new(1),
            parent: SessionParent::Event(EventId::new(1)),
            date: NaiveDate::from_ymd_opt(2025, 4, 14).unwrap(),
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 4, 14, h, m, 0).unwrap()
    }

    fn classifier() -> SessionTemporalClassifier {
        SessionTemporalClassifier::new(180)
    }

    #[test]
    fn boundaries_of_a_morning_session() {
        let s = session((9, 0), (10, 0));
        let c = classifier();

        let soon = c.classify(at(8, 57), &s);
        assert_eq!(soon.state, TemporalState::Soon);
        assert_eq!(soon.minutes_until_start, 3);

        assert_eq!(c.state(at(6, 0), &s), TemporalState::Soon);
        assert_eq!(c.state(at(5, 59), &s), TemporalState::Later);
        assert_eq!(c.state(at(9, 0), &s), TemporalState::Now);
        assert_eq!(c.state(at(9, 30), &s), TemporalState::Now);
        assert_eq!(c.state(at(10, 0), &s), TemporalState::Now);
        assert_eq!(c.state(at(10, 5), &s), TemporalState::Recent);
        assert_eq!(c.state(at(13, 0), &s), TemporalState::Recent);
        assert_eq!(c.state(at(13, 1), &s), TemporalState::Past);
    }

    #[test]
    fn midnight_crossing_session() {
        let s = session((23, 0), (1, 0));
        let c = classifier();
        let after_midnight = Local.with_ymd_and_hms(2025, 4, 15, 0, 30, 0).unwrap();
        assert_eq!(c.state(after_midnight, &s), TemporalState::Now);
        assert_eq!(c.state(at(22, 0), &s), TemporalState::Soon);
    }

    #[test]
    fn custom_recent_window() {
        let s = session((9, 0), (10, 0));
        let c = SessionTemporalClassifier::new(30);
        assert_eq!(c.state(at(8, 0), &s), TemporalState::Later);
        assert_eq!(c.state(at(11, 0), &s), TemporalState::Past);
    }

    #[test]
    fn classification_is_a_pure_function_of_now() {
        let s = session((9, 0), (10, 0));
        let c = classifier();
        assert_eq!(c.classify(at(8, 0), &s), c.classify(at(8, 0), &s));
    }
}
