//! Check-in window timing and geofencing

use attend_api::{
    ActivityState, AttendanceWindow, CheckInRejection, GeoFence, Session, WindowKind,
    WindowRejection,
};
use attend_config::WindowPolicy;
use attend_util::WindowToken;
use chrono::{DateTime, Local};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Plans QR and manual windows for a session from the window policy
#[derive(Debug, Clone)]
pub struct AttendanceWindowManager {
    policy: WindowPolicy,
}

impl AttendanceWindowManager {
    pub fn new(policy: WindowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    /// Build a fresh QR window with a new token. Storing it supersedes the
    /// session's previous QR window.
    pub fn plan_qr(
        &self,
        session: &Session,
        activity_state: ActivityState,
        geo: Option<GeoFence>,
        max_uses: Option<u32>,
        now: DateTime<Local>,
    ) -> Result<AttendanceWindow, WindowRejection> {
        if geo.is_some_and(|g| g.radius_m == 0) {
            return Err(WindowRejection::InvalidGeofence);
        }
        let (usable_from, expires_at) = self.bounds(
            session,
            activity_state,
            self.policy.qr_lead,
            Some(self.policy.qr_duration),
            now,
        )?;

        Ok(AttendanceWindow {
            session_id: session.id,
            kind: WindowKind::Qr,
            token: Some(WindowToken::generate()),
            usable_from,
            expires_at,
            geo,
            max_uses: max_uses.or(self.policy.default_qr_max_uses),
            uses: 0,
            active: true,
            opened_at: now,
        })
    }

    pub fn plan_manual(
        &self,
        session: &Session,
        activity_state: ActivityState,
        now: DateTime<Local>,
    ) -> Result<AttendanceWindow, WindowRejection> {
        let (usable_from, expires_at) = self.bounds(
            session,
            activity_state,
            self.policy.manual_lead,
            self.policy.manual_duration,
            now,
        )?;

        Ok(AttendanceWindow {
            session_id: session.id,
            kind: WindowKind::Manual,
            token: None,
            usable_from,
            expires_at,
            geo: None,
            max_uses: None,
            uses: 0,
            active: true,
            opened_at: now,
        })
    }

    /// `usable_from = max(now, start - lead)`, closing at the earlier of
    /// `usable_from + duration` and `end + grace`
    fn bounds(
        &self,
        session: &Session,
        activity_state: ActivityState,
        lead: chrono::Duration,
        duration: Option<chrono::Duration>,
        now: DateTime<Local>,
    ) -> Result<(DateTime<Local>, DateTime<Local>), WindowRejection> {
        if activity_state.is_terminal() {
            return Err(WindowRejection::ActivityNotActive);
        }

        let (ini, fin) = session.bounds();
        let hard_close = fin + self.policy.grace_after_end;
        if now >= hard_close {
            return Err(WindowRejection::SessionEnded);
        }

        let usable_from = now.max(ini - lead);
        let expires_at = match duration {
            Some(d) => (usable_from + d).min(hard_close),
            None => hard_close,
        };
        if expires_at <= usable_from {
            return Err(WindowRejection::SessionEnded);
        }

        Ok((usable_from, expires_at))
    }
}

/// Great-circle distance in meters
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Spatial check for a geofenced window
pub fn check_geofence(
    fence: &GeoFence,
    lat: Option<f64>,
    lng: Option<f64>,
) -> Result<(), CheckInRejection> {
    let (Some(lat), Some(lng)) = (lat, lng) else {
        return Err(CheckInRejection::LocationRequired);
    };
    let distance = haversine_m(fence.lat, fence.lng, lat, lng);
    if distance > fence.radius_m as f64 {
        return Err(CheckInRejection::OutsideGeofence {
            distance_m: distance.round() as u32,
            radius_m: fence.radius_m,
        });
    }
    Ok(())
}
