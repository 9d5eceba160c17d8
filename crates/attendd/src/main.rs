//! attendd - The attendance service
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization and catalog seeding
//! - Core engine
//! - Session feed views
//! - IPC server

mod dispatch;
mod feed;

use anyhow::{Context, Result};
use clap::Parser;
use attend_api::{
    Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Request, Response,
    ResponsePayload, API_VERSION,
};
use attend_config::{load_config, Policy, ServiceConfig};
use attend_core::CoreEngine;
use attend_ipc::{IpcServer, ServerMessage};
use attend_store::{AuditEvent, AuditEventType, Seed, SqliteStore, Store};
use attend_util::{
    default_config_path, AttendError, ClientId, Clock, RateLimiter, SiteId, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::dispatch::{authorize, error_info, execute};
use crate::feed::{build_sources, FeedViews};

/// attendd - Enrollment and attendance service
#[derive(Parser, Debug)]
#[command(name = "attendd")]
#[command(about = "Enrollment eligibility and session attendance service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/attend/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set ATTEND_SOCKET env var)
    #[arg(short, long, env = "ATTEND_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set ATTEND_DATA_DIR env var)
    #[arg(short, long, env = "ATTEND_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Catalog and roster seed (JSON) applied at startup
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// How often idle rate-limiter buckets are dropped
const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Main service state
struct Service {
    engine: CoreEngine,
    service: ServiceConfig,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    feeds: FeedViews,
    rate_limiter: RateLimiter,
}

/// Shared handles for request handling
struct Shared {
    engine: Mutex<CoreEngine>,
    service: ServiceConfig,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    feeds: FeedViews,
    rate_limiter: Mutex<RateLimiter>,
}

/// Load the policy file; a missing file means built-in defaults
fn read_policy(path: &Path) -> Result<Option<Policy>> {
    if !path.exists() {
        return Ok(None);
    }
    load_config(path)
        .map(Some)
        .with_context(|| format!("Failed to load config from {:?}", path))
}

impl Service {
    async fn new(args: &Args, policy: Policy) -> Result<Self> {
        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| policy.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("attend.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        if let Some(seed_path) = &args.seed {
            let seed = Seed::load(seed_path)
                .with_context(|| format!("Failed to read seed {:?}", seed_path))?;
            let summary = seed.apply(store.as_ref()).context("Failed to apply seed")?;
            info!(
                periods = summary.periods,
                activities = summary.activities,
                sessions = summary.sessions,
                participants = summary.participants,
                "Seed applied"
            );
            store.append_audit(AuditEvent::new(AuditEventType::SeedApplied {
                sessions: summary.sessions,
                participants: summary.participants,
            }))?;
        }

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let sources =
            build_sources(&policy.feed, &store).context("Failed to build feed sources")?;
        let feeds = FeedViews::new(policy.feed.clone(), sources, store.clone(), clock.clone());

        let rate_limiter =
            RateLimiter::new(policy.requests.max_requests, policy.requests.interval);

        let service = policy.service.clone();
        let engine = CoreEngine::new(policy, store.clone(), clock);

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            engine,
            service,
            ipc: Arc::new(ipc),
            store,
            feeds,
            rate_limiter,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc_ref = self.ipc.clone();
        let mut ipc_messages = ipc_ref
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let shared = Arc::new(Shared {
            engine: Mutex::new(self.engine),
            service: self.service,
            ipc: self.ipc,
            store: self.store,
            feeds: self.feeds,
            rate_limiter: Mutex::new(self.rate_limiter),
        });

        let ipc_accept = ipc_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let mut cleanup_timer = tokio::time::interval(LIMITER_CLEANUP_INTERVAL);

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                _ = cleanup_timer.tick() => {
                    shared.rate_limiter.lock().await.cleanup(LIMITER_CLEANUP_INTERVAL);
                }

                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&shared, msg).await;
                }
            }
        }

        info!("Shutting down attendd");

        shared.ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = shared
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    async fn handle_ipc_message(shared: &Arc<Shared>, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                {
                    let mut limiter = shared.rate_limiter.lock().await;
                    if !limiter.check(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = shared.ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                // Feed fetches wait on upstream sources; keep them off the loop
                if matches!(request.command, Command::FeedLoad { .. } | Command::FeedMore) {
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        let response = Self::handle_request(&shared, &client_id, request).await;
                        let _ = shared.ipc.send_response(&client_id, response).await;
                    });
                    return;
                }

                let response = Self::handle_request(shared, &client_id, request).await;
                let _ = shared.ipc.send_response(&client_id, response).await;
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );

                let _ = shared.store.append_audit(AuditEvent::new(
                    AuditEventType::ClientConnected {
                        client_id: client_id.to_string(),
                        role: format!("{:?}", info.role),
                        uid: info.uid,
                    },
                ));
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                let _ = shared.store.append_audit(AuditEvent::new(
                    AuditEventType::ClientDisconnected {
                        client_id: client_id.to_string(),
                    },
                ));

                shared.feeds.close(&client_id).await;
                shared.rate_limiter.lock().await.remove_client(&client_id);
            }
        }
    }

    async fn handle_request(shared: &Shared, client_id: &ClientId, request: Request) -> Response {
        let request_id = request.request_id;

        if request.api_version != API_VERSION {
            return Response::error(
                request_id,
                ErrorInfo::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "Unsupported API version {} (expected {})",
                        request.api_version, API_VERSION
                    ),
                ),
            );
        }

        let Some(info) = shared.ipc.get_client_info(client_id).await else {
            return Response::error(
                request_id,
                ErrorInfo::new(ErrorCode::InvalidRequest, "Unknown client"),
            );
        };

        let own_record = shared.service.record_for_uid(info.uid);
        if let Err(e) = authorize(&request.command, info.role, own_record) {
            debug!(client_id = %client_id, role = ?info.role, error = %e, "Command refused");
            return Response::error(request_id, error_info(&e));
        }

        let result =
            Self::handle_command(shared, client_id, request.acting_site, request.command).await;
        match result {
            Ok(payload) => Response::success(request_id, payload),
            Err(e) => {
                match error_info(&e).code {
                    ErrorCode::StoreError | ErrorCode::InternalError => {
                        error!(client_id = %client_id, error = %e, "Request failed")
                    }
                    _ => debug!(client_id = %client_id, error = %e, "Request rejected"),
                }
                Response::error(request_id, error_info(&e))
            }
        }
    }

    async fn handle_command(
        shared: &Shared,
        client_id: &ClientId,
        acting_site: Option<SiteId>,
        command: Command,
    ) -> Result<ResponsePayload, AttendError> {
        match command {
            Command::FeedLoad { period } => {
                let filter = shared.feeds.filter_for(period, acting_site)?;
                let (snapshot, refreshed) = shared.feeds.load(client_id, filter).await;
                Ok(ResponsePayload::Feed {
                    snapshot,
                    refreshed,
                })
            }

            Command::FeedMore => {
                let (snapshot, refreshed) = shared.feeds.more(client_id).await?;
                Ok(ResponsePayload::Feed {
                    snapshot,
                    refreshed,
                })
            }

            Command::FeedClose => {
                shared.feeds.close(client_id).await;
                Ok(ResponsePayload::FeedClosed)
            }

            Command::SubscribeEvents => Ok(ResponsePayload::Subscribed {
                client_id: client_id.clone(),
            }),

            Command::UnsubscribeEvents => Ok(ResponsePayload::Unsubscribed),

            Command::GetHealth => {
                let engine = shared.engine.lock().await;
                Ok(ResponsePayload::Health(HealthStatus {
                    live: true,
                    ready: true,
                    policy_loaded: true,
                    store_ok: engine.is_store_healthy(),
                }))
            }

            command => {
                let mut engine = shared.engine.lock().await;
                let result = execute(&mut engine, command, acting_site);

                // Broadcast whatever the operation produced, even on a late failure
                for event in engine.drain_events() {
                    shared.ipc.broadcast_event(Event::new(event.into()));
                }
                result
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = read_policy(&args.config)?;
    let defaulted = loaded.is_none();
    let policy = loaded.unwrap_or_default();

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| policy.service.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "attendd starting");
    if defaulted {
        warn!(config_path = %args.config.display(), "Config file not found, using defaults");
    } else {
        info!(
            config_path = %args.config.display(),
            feed_sources = policy.feed.sources.len(),
            page_size = policy.feed.page_size,
            "Configuration loaded"
        );
    }

    let service = Service::new(&args, policy).await?;
    service.run().await
}
