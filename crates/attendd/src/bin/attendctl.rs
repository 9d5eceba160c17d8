//! attendctl - command line client for attendd

use anyhow::{bail, Context, Result};
use attend_api::{
    ActivityKind, ActivityRef, AttendanceRow, Command, PeriodSelector, ResponsePayload,
};
use attend_config::{load_config, Policy};
use attend_feed::{ConditionalPoller, HttpTransport};
use attend_ipc::{attendance_resource, IpcAttendanceTransport, IpcClient};
use attend_util::{
    default_config_path, default_socket_path, PeriodId, RecordId, SessionId, SiteId, WindowToken,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "attendctl")]
#[command(about = "Talk to a running attendd", long_about = None)]
struct Cli {
    /// Socket path (or set ATTEND_SOCKET env var)
    #[arg(short, long, env = "ATTEND_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    /// Configuration file, read for the poll interval and base URL
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Act on behalf of this site
    #[arg(long)]
    site: Option<i64>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    Ping,
    Health,
    /// Dry-run eligibility of a record for an activity (`P-12`, `E-3`)
    Evaluate { record: i64, activity: String },
    Enroll { record: i64, activity: String },
    /// List candidates, or enroll them all with --enroll
    Candidates {
        activity: String,
        #[arg(long)]
        enroll: bool,
    },
    OpenQr {
        session: i64,
        #[arg(long)]
        max_uses: Option<u32>,
    },
    OpenManual { session: i64 },
    /// Check in with a QR token
    Scan {
        session: i64,
        record: i64,
        token: String,
        #[arg(long)]
        lat: Option<f64>,
        #[arg(long)]
        lng: Option<f64>,
    },
    /// Roster check-in by code, document or email
    CheckIn {
        session: i64,
        code: String,
        /// Record a justified check-in without a window
        #[arg(long)]
        justification: Option<String>,
        #[arg(long)]
        grant_minutes: bool,
    },
    Validate {
        session: i64,
        /// Also create the hour record
        #[arg(long)]
        hour_record: bool,
    },
    Annul { attendance: i64 },
    Attendance { session: i64 },
    Roster { session: i64 },
    /// Print the attendance list whenever it changes
    Watch {
        session: i64,
        /// Poll `{base_url}/sessions/{id}/attendance` over HTTP instead of the socket
        #[arg(long)]
        http: Option<String>,
    },
    Classify { session: i64 },
    Progress { project: i64, record: i64 },
    Agenda,
    /// Load the session feed and page through it
    Feed {
        #[arg(long)]
        period: Option<i64>,
        #[arg(long, conflicts_with = "period")]
        all: bool,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Stream service events
    Events,
}

/// Parse `P-12` / `E-3` as rendered in feed keys
fn parse_activity(s: &str) -> Result<ActivityRef> {
    let Some((prefix, id)) = s.trim().split_once('-') else {
        bail!("expected an activity like P-12 or E-3, got {:?}", s);
    };
    let id: i64 = id
        .parse()
        .with_context(|| format!("invalid activity id in {:?}", s))?;
    let kind = match prefix {
        "P" | "p" => ActivityKind::Project,
        "E" | "e" => ActivityKind::Event,
        other => bail!("unknown activity prefix {:?}", other),
    };
    Ok(ActivityRef::from_parts(kind, id))
}

fn period_selector(period: Option<i64>, all: bool) -> PeriodSelector {
    match (period, all) {
        (Some(id), _) => PeriodSelector::Id(PeriodId::new(id)),
        (None, true) => PeriodSelector::All,
        (None, false) => PeriodSelector::Current,
    }
}

fn print(payload: &ResponsePayload) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    Ok(())
}

fn print_rows(rows: &[AttendanceRow]) {
    println!("{} attendance row(s)", rows.len());
    for row in rows {
        println!(
            "  {:>6}  {:<10} {:<18} {:<10} {:>4} min  {}",
            row.id,
            row.code.as_deref().unwrap_or("-"),
            row.method.as_str(),
            row.state.as_str(),
            row.minutes,
            row.last_names.as_deref().unwrap_or(""),
        );
    }
}

async fn watch(cli: &Cli, session: SessionId, http: Option<String>) -> Result<()> {
    let policy = if cli.config.exists() {
        load_config(&cli.config)
            .with_context(|| format!("Failed to load config from {:?}", cli.config))?
    } else {
        Policy::default()
    };
    let interval = policy.poll.interval;
    let resource = attendance_resource(session);

    match http.or(policy.poll.base_url) {
        Some(base_url) => {
            let transport = HttpTransport::<Vec<AttendanceRow>>::new(
                base_url,
                policy.feed.source_timeout,
            )?;
            ConditionalPoller::new(transport, resource)
                .watch(interval, |rows| {
                    print_rows(rows);
                    true
                })
                .await?;
        }
        None => {
            let client = IpcClient::connect(&cli.socket)
                .await
                .with_context(|| format!("Failed to connect to {:?}", cli.socket))?
                .with_site(cli.site.map(SiteId::new));
            ConditionalPoller::new(IpcAttendanceTransport::new(client), resource)
                .watch(interval, |rows| {
                    print_rows(rows);
                    true
                })
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let command = match &cli.command {
        Cmd::Watch { session, http } => {
            return watch(&cli, SessionId::new(*session), http.clone()).await;
        }
        Cmd::Ping => Command::Ping,
        Cmd::Health => Command::GetHealth,
        Cmd::Evaluate { record, activity } => Command::Evaluate {
            record_id: RecordId::new(*record),
            activity: parse_activity(activity)?,
        },
        Cmd::Enroll { record, activity } => Command::Enroll {
            record_id: RecordId::new(*record),
            activity: parse_activity(activity)?,
        },
        Cmd::Candidates { activity, enroll } => {
            let activity = parse_activity(activity)?;
            if *enroll {
                Command::EnrollCandidates {
                    activity,
                    record_ids: None,
                }
            } else {
                Command::Candidates { activity }
            }
        }
        Cmd::OpenQr { session, max_uses } => Command::OpenQrWindow {
            session_id: SessionId::new(*session),
            geo: None,
            max_uses: *max_uses,
        },
        Cmd::OpenManual { session } => Command::OpenManualWindow {
            session_id: SessionId::new(*session),
        },
        Cmd::Scan {
            session,
            record,
            token,
            lat,
            lng,
        } => Command::CheckInQr {
            session_id: SessionId::new(*session),
            record_id: RecordId::new(*record),
            token: WindowToken::new(token.as_str()),
            lat: *lat,
            lng: *lng,
        },
        Cmd::CheckIn {
            session,
            code,
            justification,
            grant_minutes,
        } => match justification {
            Some(justification) => Command::CheckInJustified {
                session_id: SessionId::new(*session),
                code: code.clone(),
                justification: justification.clone(),
                grant_minutes: *grant_minutes,
            },
            None => Command::CheckInManual {
                session_id: SessionId::new(*session),
                code: code.clone(),
            },
        },
        Cmd::Validate {
            session,
            hour_record,
        } => Command::Validate {
            session_id: SessionId::new(*session),
            attendance_ids: None,
            create_hour_record: *hour_record,
        },
        Cmd::Annul { attendance } => Command::AnnulAttendance {
            attendance_id: (*attendance).into(),
        },
        Cmd::Attendance { session } => Command::ListAttendance {
            session_id: SessionId::new(*session),
            if_none_match: None,
        },
        Cmd::Roster { session } => Command::SessionParticipants {
            session_id: SessionId::new(*session),
        },
        Cmd::Classify { session } => Command::ClassifySession {
            session_id: SessionId::new(*session),
            at: None,
        },
        Cmd::Progress { project, record } => Command::ProjectProgress {
            project_id: (*project).into(),
            record_id: RecordId::new(*record),
        },
        Cmd::Agenda => Command::StaffAgenda { at: None },
        Cmd::Feed { period, all, .. } => Command::FeedLoad {
            period: period_selector(*period, *all),
        },
        Cmd::Events => Command::SubscribeEvents,
    };

    let client = IpcClient::connect(&cli.socket)
        .await
        .with_context(|| format!("Failed to connect to {:?}", cli.socket))?
        .with_site(cli.site.map(SiteId::new));

    if matches!(command, Command::SubscribeEvents) {
        let mut events = client.subscribe().await?;
        loop {
            let event = events.next().await?;
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    let mut client = client;
    let payload = client.call(command).await?;
    print(&payload)?;

    if let Cmd::Feed { pages, .. } = cli.command {
        for _ in 1..pages {
            let payload = client.call(Command::FeedMore).await?;
            let done = matches!(&payload, ResponsePayload::Feed { snapshot, .. } if !snapshot.has_more);
            print(&payload)?;
            if done {
                break;
            }
        }
    }

    Ok(())
}
