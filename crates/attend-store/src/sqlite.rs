//! SQLite-based store implementation

use attend_api::{
    ActivityKind, ActivityRef, Attendance, AttendanceState, AttendanceWindow, EventActivity,
    GeoFence, HourRecord, Participant, Participation, ParticipationState, Period, Process,
    Project, Session, SessionParent, WindowKind,
};
use attend_util::{
    AttendanceId, EventId, HourRecordId, ParticipationId, PeriodId, ProcessId, ProjectId,
    RecordId, SessionId, SiteId, WindowToken,
};
use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    AppliedValidation, AuditEvent, CatalogQuery, CheckInWrite, NewAttendance, NewHourRecord,
    Store, StoreError, StoreResult, WindowUse,
};

/// Participation states that count toward the one-live-row invariant
const LIVE_STATES_SQL: &str = "('INSCRITO', 'CONFIRMADO')";

const PROJECT_COLS: &str =
    "id, code, title, project_type, levels, site_id, period_id, state, required_minutes";
const EVENT_COLS: &str = "id, code, title, site_id, period_id, state, requires_enrollment, \
     capacity, enrollment_from, enrollment_to";
const SESSION_COLS: &str = "id, parent_kind, parent_id, date, start_time, end_time";
const PARTICIPANT_COLS: &str =
    "record_id, code, document, email, first_names, last_names, site_id, level, status";
const PARTICIPATION_COLS: &str = "id, record_id, activity_kind, activity_id, state, created_at";
const WINDOW_COLS: &str = "session_id, kind, token, usable_from, expires_at, geo_lat, geo_lng, \
     geo_radius_m, max_uses, uses, active, opened_at";
const ATTENDANCE_COLS: &str = "id, session_id, record_id, participation_id, method, state, \
     check_in_at, minutes_validated, override_minutes, justification, window_token, created_at";
const HOUR_RECORD_COLS: &str =
    "id, session_id, activity_kind, activity_id, process_id, attendances, minutes_total, created_at";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS periods (
                id INTEGER PRIMARY KEY,
                code TEXT NOT NULL,
                starts_on TEXT NOT NULL,
                ends_on TEXT NOT NULL,
                state TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY,
                code TEXT NOT NULL,
                title TEXT NOT NULL,
                project_type TEXT NOT NULL,
                levels TEXT NOT NULL DEFAULT '[]',
                site_id INTEGER NOT NULL,
                period_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                required_minutes INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS processes (
                id INTEGER PRIMARY KEY,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                required_minutes INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY,
                code TEXT NOT NULL,
                title TEXT NOT NULL,
                site_id INTEGER NOT NULL,
                period_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                requires_enrollment INTEGER NOT NULL DEFAULT 0,
                capacity INTEGER,
                enrollment_from TEXT,
                enrollment_to TEXT
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY,
                parent_kind TEXT NOT NULL,
                parent_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS participants (
                record_id INTEGER PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                document TEXT,
                email TEXT,
                first_names TEXT NOT NULL,
                last_names TEXT NOT NULL,
                site_id INTEGER NOT NULL,
                level INTEGER,
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS matriculations (
                record_id INTEGER NOT NULL,
                period_id INTEGER NOT NULL,
                PRIMARY KEY (record_id, period_id)
            );

            CREATE TABLE IF NOT EXISTS participations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id INTEGER NOT NULL,
                activity_kind TEXT NOT NULL,
                activity_id INTEGER NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- At most one non-terminal participation per (participant, activity)
            CREATE UNIQUE INDEX IF NOT EXISTS ux_participations_live
                ON participations(record_id, activity_kind, activity_id)
                WHERE state IN ('INSCRITO', 'CONFIRMADO');

            CREATE TABLE IF NOT EXISTS attendance_windows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                token TEXT,
                usable_from TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                geo_lat REAL,
                geo_lng REAL,
                geo_radius_m INTEGER,
                max_uses INTEGER,
                uses INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                opened_at TEXT NOT NULL
            );

            -- One active window per (session, kind)
            CREATE UNIQUE INDEX IF NOT EXISTS ux_windows_active
                ON attendance_windows(session_id, kind)
                WHERE active = 1;

            CREATE TABLE IF NOT EXISTS attendances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                record_id INTEGER NOT NULL,
                participation_id INTEGER,
                method TEXT NOT NULL,
                state TEXT NOT NULL,
                check_in_at TEXT,
                minutes_validated INTEGER NOT NULL DEFAULT 0,
                override_minutes INTEGER,
                justification TEXT,
                window_token TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (session_id, record_id)
            );

            CREATE TABLE IF NOT EXISTS hour_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                activity_kind TEXT NOT NULL,
                activity_id INTEGER NOT NULL,
                process_id INTEGER,
                attendances INTEGER NOT NULL,
                minutes_total INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            -- One hour record per session; later batches add to it
            CREATE UNIQUE INDEX IF NOT EXISTS ux_hour_records_session
                ON hour_records(session_id);

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_parent ON sessions(parent_kind, parent_id);
            CREATE INDEX IF NOT EXISTS idx_participations_activity
                ON participations(activity_kind, activity_id);
            CREATE INDEX IF NOT EXISTS idx_attendances_record ON attendances(record_id);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

// Row decoding

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, "%H:%M:%S").map_err(|e| conversion_error(idx, e))
}

fn datetime_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Local>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_datetime_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Local>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Local))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn activity_kind_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<ActivityKind> {
    let raw: String = row.get(idx)?;
    match raw.as_str() {
        "project" => Ok(ActivityKind::Project),
        "event" => Ok(ActivityKind::Event),
        _ => Err(rusqlite::Error::InvalidColumnType(idx, raw, Type::Text)),
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn fmt_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

fn period_from_row(row: &Row<'_>) -> rusqlite::Result<Period> {
    Ok(Period {
        id: PeriodId::new(row.get(0)?),
        code: row.get(1)?,
        starts_on: date_col(row, 2)?,
        ends_on: date_col(row, 3)?,
        state: parse_col(row, 4)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let levels_json: String = row.get(4)?;
    let levels: Vec<u8> =
        serde_json::from_str(&levels_json).map_err(|e| conversion_error(4, e))?;
    Ok(Project {
        id: ProjectId::new(row.get(0)?),
        code: row.get(1)?,
        title: row.get(2)?,
        project_type: parse_col(row, 3)?,
        levels,
        site_id: SiteId::new(row.get(5)?),
        period_id: PeriodId::new(row.get(6)?),
        state: parse_col(row, 7)?,
        required_minutes: row.get(8)?,
    })
}

fn process_from_row(row: &Row<'_>) -> rusqlite::Result<Process> {
    Ok(Process {
        id: ProcessId::new(row.get(0)?),
        project_id: ProjectId::new(row.get(1)?),
        name: row.get(2)?,
        required_minutes: row.get(3)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventActivity> {
    Ok(EventActivity {
        id: EventId::new(row.get(0)?),
        code: row.get(1)?,
        title: row.get(2)?,
        site_id: SiteId::new(row.get(3)?),
        period_id: PeriodId::new(row.get(4)?),
        state: parse_col(row, 5)?,
        requires_enrollment: row.get(6)?,
        capacity: row.get(7)?,
        enrollment_from: opt_datetime_col(row, 8)?,
        enrollment_to: opt_datetime_col(row, 9)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let kind: String = row.get(1)?;
    let parent_id: i64 = row.get(2)?;
    let parent = match kind.as_str() {
        "process" => SessionParent::Process(ProcessId::new(parent_id)),
        "event" => SessionParent::Event(EventId::new(parent_id)),
        _ => return Err(rusqlite::Error::InvalidColumnType(1, kind, Type::Text)),
    };
    Ok(Session {
        id: SessionId::new(row.get(0)?),
        parent,
        date: date_col(row, 3)?,
        start: time_col(row, 4)?,
        end: time_col(row, 5)?,
    })
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        record_id: RecordId::new(row.get(0)?),
        code: row.get(1)?,
        document: row.get(2)?,
        email: row.get(3)?,
        first_names: row.get(4)?,
        last_names: row.get(5)?,
        site_id: SiteId::new(row.get(6)?),
        level: row.get(7)?,
        status: parse_col(row, 8)?,
    })
}

fn participation_from_row(row: &Row<'_>) -> rusqlite::Result<Participation> {
    Ok(Participation {
        id: ParticipationId::new(row.get(0)?),
        record_id: RecordId::new(row.get(1)?),
        activity: ActivityRef::from_parts(activity_kind_col(row, 2)?, row.get(3)?),
        state: parse_col(row, 4)?,
        created_at: datetime_col(row, 5)?,
    })
}

fn window_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceWindow> {
    let lat: Option<f64> = row.get(5)?;
    let lng: Option<f64> = row.get(6)?;
    let radius: Option<u32> = row.get(7)?;
    let geo = match (lat, lng, radius) {
        (Some(lat), Some(lng), Some(radius_m)) => Some(GeoFence { lat, lng, radius_m }),
        _ => None,
    };
    let token: Option<String> = row.get(2)?;
    Ok(AttendanceWindow {
        session_id: SessionId::new(row.get(0)?),
        kind: parse_col(row, 1)?,
        token: token.map(WindowToken::new),
        usable_from: datetime_col(row, 3)?,
        expires_at: datetime_col(row, 4)?,
        geo,
        max_uses: row.get(8)?,
        uses: row.get(9)?,
        active: row.get(10)?,
        opened_at: datetime_col(row, 11)?,
    })
}

fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<Attendance> {
    let participation: Option<i64> = row.get(3)?;
    let token: Option<String> = row.get(10)?;
    Ok(Attendance {
        id: AttendanceId::new(row.get(0)?),
        session_id: SessionId::new(row.get(1)?),
        record_id: RecordId::new(row.get(2)?),
        participation_id: participation.map(ParticipationId::new),
        method: parse_col(row, 4)?,
        state: parse_col(row, 5)?,
        check_in_at: opt_datetime_col(row, 6)?,
        minutes_validated: row.get(7)?,
        override_minutes: row.get(8)?,
        justification: row.get(9)?,
        window_token: token.map(WindowToken::new),
        created_at: datetime_col(row, 11)?,
    })
}

fn hour_record_from_row(row: &Row<'_>) -> rusqlite::Result<HourRecord> {
    let process: Option<i64> = row.get(4)?;
    Ok(HourRecord {
        id: HourRecordId::new(row.get(0)?),
        session_id: SessionId::new(row.get(1)?),
        activity: ActivityRef::from_parts(activity_kind_col(row, 2)?, row.get(3)?),
        process_id: process.map(ProcessId::new),
        attendances: row.get(5)?,
        minutes_total: row.get(6)?,
        created_at: datetime_col(row, 7)?,
    })
}

fn parent_parts(parent: SessionParent) -> (&'static str, i64) {
    match parent {
        SessionParent::Process(id) => ("process", id.get()),
        SessionParent::Event(id) => ("event", id.get()),
    }
}

fn find_attendance_tx(
    tx: &Transaction<'_>,
    session: SessionId,
    record: RecordId,
) -> StoreResult<Option<Attendance>> {
    let sql = format!(
        "SELECT {} FROM attendances WHERE session_id = ? AND record_id = ?",
        ATTENDANCE_COLS
    );
    Ok(tx
        .query_row(&sql, params![session.get(), record.get()], attendance_from_row)
        .optional()?)
}

impl Store for SqliteStore {
    fn upsert_period(&self, period: &Period) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO periods (id, code, starts_on, ends_on, state)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                code = excluded.code, starts_on = excluded.starts_on,
                ends_on = excluded.ends_on, state = excluded.state
            "#,
            params![
                period.id.get(),
                period.code,
                fmt_date(period.starts_on),
                fmt_date(period.ends_on),
                period.state.as_str()
            ],
        )?;
        Ok(())
    }

    fn list_periods(&self) -> StoreResult<Vec<Period>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, code, starts_on, ends_on, state FROM periods ORDER BY starts_on DESC, id")?;
        let rows = stmt.query_map([], period_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert_project(&self, project: &Project) -> StoreResult<()> {
        let conn = self.conn()?;
        let levels = serde_json::to_string(&project.levels)?;
        conn.execute(
            r#"
            INSERT INTO projects (id, code, title, project_type, levels, site_id, period_id, state, required_minutes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                code = excluded.code, title = excluded.title,
                project_type = excluded.project_type, levels = excluded.levels,
                site_id = excluded.site_id, period_id = excluded.period_id,
                state = excluded.state, required_minutes = excluded.required_minutes
            "#,
            params![
                project.id.get(),
                project.code,
                project.title,
                project.project_type.as_str(),
                levels,
                project.site_id.get(),
                project.period_id.get(),
                project.state.as_str(),
                project.required_minutes
            ],
        )?;
        Ok(())
    }

    fn get_project(&self, id: ProjectId) -> StoreResult<Option<Project>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLS);
        Ok(conn.query_row(&sql, [id.get()], project_from_row).optional()?)
    }

    fn list_projects(&self, query: &CatalogQuery) -> StoreResult<Vec<Project>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM projects \
             WHERE (?1 IS NULL OR period_id = ?1) AND (?2 IS NULL OR site_id = ?2) \
             ORDER BY id LIMIT ?3 OFFSET ?4",
            PROJECT_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                query.period.map(|p| p.get()),
                query.site.map(|s| s.get()),
                query.limit,
                query.offset
            ],
            project_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert_process(&self, process: &Process) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO processes (id, project_id, name, required_minutes)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id, name = excluded.name,
                required_minutes = excluded.required_minutes
            "#,
            params![
                process.id.get(),
                process.project_id.get(),
                process.name,
                process.required_minutes
            ],
        )?;
        Ok(())
    }

    fn get_process(&self, id: ProcessId) -> StoreResult<Option<Process>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, project_id, name, required_minutes FROM processes WHERE id = ?",
                [id.get()],
                process_from_row,
            )
            .optional()?)
    }

    fn list_processes(&self, project: ProjectId) -> StoreResult<Vec<Process>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, required_minutes FROM processes WHERE project_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map([project.get()], process_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert_event(&self, event: &EventActivity) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO events (id, code, title, site_id, period_id, state, requires_enrollment,
                                capacity, enrollment_from, enrollment_to)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                code = excluded.code, title = excluded.title, site_id = excluded.site_id,
                period_id = excluded.period_id, state = excluded.state,
                requires_enrollment = excluded.requires_enrollment, capacity = excluded.capacity,
                enrollment_from = excluded.enrollment_from, enrollment_to = excluded.enrollment_to
            "#,
            params![
                event.id.get(),
                event.code,
                event.title,
                event.site_id.get(),
                event.period_id.get(),
                event.state.as_str(),
                event.requires_enrollment,
                event.capacity,
                event.enrollment_from.map(|d| d.to_rfc3339()),
                event.enrollment_to.map(|d| d.to_rfc3339())
            ],
        )?;
        Ok(())
    }

    fn get_event(&self, id: EventId) -> StoreResult<Option<EventActivity>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM events WHERE id = ?", EVENT_COLS);
        Ok(conn.query_row(&sql, [id.get()], event_from_row).optional()?)
    }

    fn list_events(&self, query: &CatalogQuery) -> StoreResult<Vec<EventActivity>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM events \
             WHERE (?1 IS NULL OR period_id = ?1) AND (?2 IS NULL OR site_id = ?2) \
             ORDER BY id LIMIT ?3 OFFSET ?4",
            EVENT_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                query.period.map(|p| p.get()),
                query.site.map(|s| s.get()),
                query.limit,
                query.offset
            ],
            event_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn upsert_session(&self, session: &Session) -> StoreResult<()> {
        let conn = self.conn()?;
        let (kind, parent_id) = parent_parts(session.parent);
        conn.execute(
            r#"
            INSERT INTO sessions (id, parent_kind, parent_id, date, start_time, end_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                parent_kind = excluded.parent_kind, parent_id = excluded.parent_id,
                date = excluded.date, start_time = excluded.start_time, end_time = excluded.end_time
            "#,
            params![
                session.id.get(),
                kind,
                parent_id,
                fmt_date(session.date),
                fmt_time(session.start),
                fmt_time(session.end)
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLS);
        Ok(conn.query_row(&sql, [id.get()], session_from_row).optional()?)
    }

    fn list_sessions(&self, parent: SessionParent) -> StoreResult<Vec<Session>> {
        let conn = self.conn()?;
        let (kind, parent_id) = parent_parts(parent);
        let sql = format!(
            "SELECT {} FROM sessions WHERE parent_kind = ? AND parent_id = ? \
             ORDER BY date, start_time, id",
            SESSION_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![kind, parent_id], session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn list_activity_sessions(&self, activity: ActivityRef) -> StoreResult<Vec<Session>> {
        match activity {
            ActivityRef::Event(id) => self.list_sessions(SessionParent::Event(id)),
            ActivityRef::Project(id) => {
                let conn = self.conn()?;
                let mut stmt = conn.prepare(
                    "SELECT s.id, s.parent_kind, s.parent_id, s.date, s.start_time, s.end_time \
                     FROM sessions s JOIN processes p ON s.parent_id = p.id \
                     WHERE s.parent_kind = 'process' AND p.project_id = ? \
                     ORDER BY s.date, s.start_time, s.id",
                )?;
                let rows = stmt.query_map([id.get()], session_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            }
        }
    }

    fn upsert_participant(&self, p: &Participant) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO participants (record_id, code, document, email, first_names, last_names,
                                      site_id, level, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(record_id) DO UPDATE SET
                code = excluded.code, document = excluded.document, email = excluded.email,
                first_names = excluded.first_names, last_names = excluded.last_names,
                site_id = excluded.site_id, level = excluded.level, status = excluded.status
            "#,
            params![
                p.record_id.get(),
                p.code,
                p.document,
                p.email,
                p.first_names,
                p.last_names,
                p.site_id.get(),
                p.level,
                p.status.as_str()
            ],
        )?;
        Ok(())
    }

    fn get_participant(&self, id: RecordId) -> StoreResult<Option<Participant>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM participants WHERE record_id = ?", PARTICIPANT_COLS);
        Ok(conn.query_row(&sql, [id.get()], participant_from_row).optional()?)
    }

    fn find_participant(&self, needle: &str) -> StoreResult<Option<Participant>> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM participants \
             WHERE code = ?1 OR document = ?1 OR lower(email) = lower(?1) \
             ORDER BY (code = ?1) DESC, record_id LIMIT 1",
            PARTICIPANT_COLS
        );
        Ok(conn.query_row(&sql, [needle], participant_from_row).optional()?)
    }

    fn list_participants_by_site(&self, site: SiteId) -> StoreResult<Vec<Participant>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM participants WHERE site_id = ? ORDER BY last_names, first_names, record_id",
            PARTICIPANT_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([site.get()], participant_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn set_matriculated(&self, record: RecordId, period: PeriodId) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO matriculations (record_id, period_id) VALUES (?, ?)",
            params![record.get(), period.get()],
        )?;
        Ok(())
    }

    fn is_matriculated(&self, record: RecordId, period: PeriodId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM matriculations WHERE record_id = ? AND period_id = ?",
                params![record.get(), period.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_participation(
        &self,
        record: RecordId,
        activity: ActivityRef,
        at: DateTime<Local>,
    ) -> StoreResult<Participation> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO participations (record_id, activity_kind, activity_id, state, created_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                record.get(),
                activity.kind().as_str(),
                activity.raw_id(),
                ParticipationState::Enrolled.as_str(),
                at.to_rfc3339()
            ],
        )?;
        let id = ParticipationId::new(conn.last_insert_rowid());
        debug!(participation_id = %id, record_id = %record, activity = %activity, "Participation inserted");

        Ok(Participation {
            id,
            record_id: record,
            activity,
            state: ParticipationState::Enrolled,
            created_at: at,
        })
    }

    fn get_participation(&self, id: ParticipationId) -> StoreResult<Option<Participation>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM participations WHERE id = ?", PARTICIPATION_COLS);
        Ok(conn.query_row(&sql, [id.get()], participation_from_row).optional()?)
    }

    fn live_participation(
        &self,
        record: RecordId,
        activity: ActivityRef,
    ) -> StoreResult<Option<Participation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM participations \
             WHERE record_id = ? AND activity_kind = ? AND activity_id = ? AND state IN {}",
            PARTICIPATION_COLS, LIVE_STATES_SQL
        );
        Ok(conn
            .query_row(
                &sql,
                params![record.get(), activity.kind().as_str(), activity.raw_id()],
                participation_from_row,
            )
            .optional()?)
    }

    fn list_participations(&self, activity: ActivityRef) -> StoreResult<Vec<Participation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM participations WHERE activity_kind = ? AND activity_id = ? ORDER BY id",
            PARTICIPATION_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![activity.kind().as_str(), activity.raw_id()],
            participation_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn list_record_participations(&self, record: RecordId) -> StoreResult<Vec<Participation>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM participations WHERE record_id = ? ORDER BY id",
            PARTICIPATION_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([record.get()], participation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count_live_participations(&self, activity: ActivityRef) -> StoreResult<u32> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT COUNT(*) FROM participations \
             WHERE activity_kind = ? AND activity_id = ? AND state IN {}",
            LIVE_STATES_SQL
        );
        let count: u32 = conn.query_row(
            &sql,
            params![activity.kind().as_str(), activity.raw_id()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn transition_participation(
        &self,
        id: ParticipationId,
        from: ParticipationState,
        to: ParticipationState,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE participations SET state = ?3 WHERE id = ?1 AND state = ?2",
            params![id.get(), from.as_str(), to.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn replace_window(&self, window: &AttendanceWindow) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let superseded = tx.execute(
            "UPDATE attendance_windows SET active = 0 WHERE session_id = ? AND kind = ? AND active = 1",
            params![window.session_id.get(), window.kind.as_str()],
        )?;
        tx.execute(
            r#"
            INSERT INTO attendance_windows (session_id, kind, token, usable_from, expires_at,
                geo_lat, geo_lng, geo_radius_m, max_uses, uses, active, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)
            "#,
            params![
                window.session_id.get(),
                window.kind.as_str(),
                window.token.as_ref().map(|t| t.as_str().to_string()),
                window.usable_from.to_rfc3339(),
                window.expires_at.to_rfc3339(),
                window.geo.map(|g| g.lat),
                window.geo.map(|g| g.lng),
                window.geo.map(|g| g.radius_m),
                window.max_uses,
                window.uses,
                window.opened_at.to_rfc3339()
            ],
        )?;
        tx.commit()?;

        debug!(
            session_id = %window.session_id,
            kind = %window.kind,
            superseded,
            "Window replaced"
        );
        Ok(())
    }

    fn active_window(
        &self,
        session: SessionId,
        kind: WindowKind,
    ) -> StoreResult<Option<AttendanceWindow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM attendance_windows WHERE session_id = ? AND kind = ? AND active = 1",
            WINDOW_COLS
        );
        Ok(conn
            .query_row(&sql, params![session.get(), kind.as_str()], window_from_row)
            .optional()?)
    }

    fn get_attendance(&self, id: AttendanceId) -> StoreResult<Option<Attendance>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM attendances WHERE id = ?", ATTENDANCE_COLS);
        Ok(conn.query_row(&sql, [id.get()], attendance_from_row).optional()?)
    }

    fn find_attendance(
        &self,
        session: SessionId,
        record: RecordId,
    ) -> StoreResult<Option<Attendance>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM attendances WHERE session_id = ? AND record_id = ?",
            ATTENDANCE_COLS
        );
        Ok(conn
            .query_row(&sql, params![session.get(), record.get()], attendance_from_row)
            .optional()?)
    }

    fn list_attendance(&self, session: SessionId) -> StoreResult<Vec<Attendance>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM attendances WHERE session_id = ? ORDER BY id",
            ATTENDANCE_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([session.get()], attendance_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn list_record_attendance(&self, record: RecordId) -> StoreResult<Vec<Attendance>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM attendances WHERE record_id = ? ORDER BY id",
            ATTENDANCE_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([record.get()], attendance_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn record_check_in(
        &self,
        a: &NewAttendance,
        window_use: Option<&WindowUse>,
    ) -> StoreResult<CheckInWrite> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(existing) = find_attendance_tx(&tx, a.session_id, a.record_id)? {
            if existing.state != AttendanceState::Pending {
                return Ok(CheckInWrite::AlreadyFinal(existing));
            }

            tx.execute(
                r#"
                UPDATE attendances SET
                    participation_id = COALESCE(?2, participation_id),
                    method = ?3, state = ?4, check_in_at = ?5, minutes_validated = ?6,
                    override_minutes = ?7, justification = ?8,
                    window_token = COALESCE(?9, window_token)
                WHERE id = ?1 AND state = 'PENDIENTE'
                "#,
                params![
                    existing.id.get(),
                    a.participation_id.map(|p| p.get()),
                    a.method.as_str(),
                    a.state.as_str(),
                    a.check_in_at.to_rfc3339(),
                    a.minutes_validated,
                    a.override_minutes,
                    a.justification,
                    a.window_token.as_ref().map(|t| t.as_str().to_string())
                ],
            )?;
            let updated = find_attendance_tx(&tx, a.session_id, a.record_id)?
                .ok_or_else(|| StoreError::NotFound(format!("attendance {}", existing.id)))?;
            tx.commit()?;
            return Ok(CheckInWrite::Updated(updated));
        }

        if let Some(usage) = window_use {
            let consumed = tx.execute(
                r#"
                UPDATE attendance_windows SET uses = uses + 1
                WHERE session_id = ?1 AND kind = ?2 AND active = 1 AND token IS ?3
                  AND (max_uses IS NULL OR uses < max_uses)
                "#,
                params![
                    usage.session_id.get(),
                    usage.kind.as_str(),
                    usage.token.as_ref().map(|t| t.as_str().to_string())
                ],
            )?;
            if consumed == 0 {
                let still_active: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM attendance_windows \
                         WHERE session_id = ?1 AND kind = ?2 AND active = 1 AND token IS ?3",
                        params![
                            usage.session_id.get(),
                            usage.kind.as_str(),
                            usage.token.as_ref().map(|t| t.as_str().to_string())
                        ],
                        |row| row.get(0),
                    )
                    .optional()?;
                return Ok(if still_active.is_some() {
                    CheckInWrite::CapReached
                } else {
                    CheckInWrite::WindowGone
                });
            }
        }

        let now = a.check_in_at.to_rfc3339();
        tx.execute(
            r#"
            INSERT INTO attendances (session_id, record_id, participation_id, method, state,
                check_in_at, minutes_validated, override_minutes, justification, window_token, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?6)
            "#,
            params![
                a.session_id.get(),
                a.record_id.get(),
                a.participation_id.map(|p| p.get()),
                a.method.as_str(),
                a.state.as_str(),
                now,
                a.minutes_validated,
                a.override_minutes,
                a.justification,
                a.window_token.as_ref().map(|t| t.as_str().to_string())
            ],
        )?;
        let created = find_attendance_tx(&tx, a.session_id, a.record_id)?
            .ok_or_else(|| StoreError::NotFound("attendance just inserted".into()))?;
        tx.commit()?;

        Ok(CheckInWrite::Created(created))
    }

    fn apply_validation(
        &self,
        session: SessionId,
        minutes: &[(AttendanceId, u32)],
        hour_record: Option<&NewHourRecord>,
    ) -> StoreResult<AppliedValidation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut validated = 0u32;
        let mut minutes_total = 0u32;
        for (id, mins) in minutes {
            let changed = tx.execute(
                "UPDATE attendances SET state = 'VALIDADO', minutes_validated = ?3 \
                 WHERE id = ?1 AND session_id = ?2 AND state = 'PENDIENTE'",
                params![id.get(), session.get(), mins],
            )?;
            if changed == 1 {
                validated += 1;
                minutes_total += mins;
            }
        }

        let (hour_record, hour_record_created) = match hour_record {
            Some(hr) if validated > 0 => {
                let sql = format!(
                    "SELECT {} FROM hour_records WHERE session_id = ?",
                    HOUR_RECORD_COLS
                );
                let existing = tx
                    .query_row(&sql, [session.get()], hour_record_from_row)
                    .optional()?;

                if let Some(mut record) = existing {
                    tx.execute(
                        "UPDATE hour_records SET attendances = attendances + ?2, \
                         minutes_total = minutes_total + ?3 WHERE id = ?1",
                        params![record.id.get(), validated, minutes_total],
                    )?;
                    record.attendances += validated;
                    record.minutes_total += minutes_total;
                    (Some(record), false)
                } else {
                    tx.execute(
                        "INSERT INTO hour_records (session_id, activity_kind, activity_id, process_id, \
                         attendances, minutes_total, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
                        params![
                            session.get(),
                            hr.activity.kind().as_str(),
                            hr.activity.raw_id(),
                            hr.process_id.map(|p| p.get()),
                            validated,
                            minutes_total,
                            hr.created_at.to_rfc3339()
                        ],
                    )?;
                    let record = HourRecord {
                        id: HourRecordId::new(tx.last_insert_rowid()),
                        session_id: session,
                        activity: hr.activity,
                        process_id: hr.process_id,
                        attendances: validated,
                        minutes_total,
                        created_at: hr.created_at,
                    };
                    (Some(record), true)
                }
            }
            _ => (None, false),
        };

        tx.commit()?;
        debug!(session_id = %session, validated, minutes_total, "Validation applied");

        Ok(AppliedValidation {
            validated,
            minutes_total,
            hour_record,
            hour_record_created,
        })
    }

    fn annul_attendance(&self, id: AttendanceId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE attendances SET state = 'ANULADO', minutes_validated = 0 \
             WHERE id = ? AND state = 'PENDIENTE'",
            [id.get()],
        )?;
        Ok(changed == 1)
    }

    fn list_hour_records(&self, session: SessionId) -> StoreResult<Vec<HourRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM hour_records WHERE session_id = ? ORDER BY id",
            HOUR_RECORD_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([session.get()], hour_record_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                datetime_col(row, 1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, event_json) = row?;
            events.push(AuditEvent {
                id,
                timestamp,
                event: serde_json::from_str(&event_json)?,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
