//! homegated - The homegate background service
//!
//! This is the main entry point for the homegated service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Policy engine
//! - IPC server
//! - Enforcement host (broadcast to platform agents)

mod host;
mod persist;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use homegate_api::{
    ClientRole, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Request,
    Response, ResponsePayload, Verdict, API_VERSION,
};
use homegate_config::{load_config, ConfigError, Policy};
use homegate_core::{
    override_granted_message, CoreEvent, HomeProfile, LocationFix, PolicyEngine, PolicyError,
};
use homegate_host_api::{EnforcementHost, HostError};
use homegate_ipc::{IpcServer, ServerMessage};
use homegate_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use homegate_util::{
    default_config_path, is_mock_time_active, ClientId, HomegateError, RateLimiter, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::host::BroadcastHost;
use crate::persist::WriteBehindStore;

/// Requests per second allowed for each client
const RATE_LIMIT_PER_SECOND: u32 = 30;

/// Buckets idle this long are dropped on the next tick
const RATE_LIMIT_IDLE: Duration = Duration::from_secs(300);

/// Failed state and audit writes are retried this often
const STORE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Reads of the persisted state attempted before startup gives up
const LOAD_ATTEMPTS: u32 = 3;

const LOAD_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human-readable lines on stdout
    Text,
    /// Human-readable lines on stdout plus JSON lines in the log directory
    Json,
}

/// homegated - Location-based access policy for a restricted app
#[derive(Parser, Debug)]
#[command(name = "homegated")]
#[command(about = "Location-based access policy for a restricted app", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/homegate/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set HOMEGATE_SOCKET env var)
    #[arg(short, long, env = "HOMEGATE_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set HOMEGATE_DATA_DIR env var)
    #[arg(short, long, env = "HOMEGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// State shared by the main loop and request handling
struct Shared {
    engine: Mutex<PolicyEngine>,
    host: Arc<dyn EnforcementHost>,
    ipc: Arc<IpcServer>,
    store: Arc<WriteBehindStore>,
    rate_limiter: Mutex<RateLimiter>,
}

/// Main service state
struct Service {
    ctx: Arc<Shared>,
    tick_interval: Duration,
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

        let db_path = data_dir.join("homegated.db");
        let sqlite: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        // Writes happen off the request path
        let (store, _writer) = WriteBehindStore::spawn(sqlite, STORE_RETRY_INTERVAL);

        let engine = open_engine(&policy, store.clone(), LOAD_RETRY_DELAY).await?;
        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;
        let ipc = Arc::new(ipc);

        info!(socket_path = %socket_path.display(), "IPC server started");

        let host: Arc<dyn EnforcementHost> = Arc::new(BroadcastHost::new(ipc.clone()));

        let rate_limiter = RateLimiter::new(RATE_LIMIT_PER_SECOND, Duration::from_secs(1));

        Ok(Self {
            ctx: Arc::new(Shared {
                engine: Mutex::new(engine),
                host,
                ipc,
                store,
                rate_limiter: Mutex::new(rate_limiter),
            }),
            tick_interval: policy.service.tick_interval,
        })
    }

    async fn run(self) -> Result<()> {
        let ctx = self.ctx;
        let mut ipc_messages = ctx
            .ipc
            .take_message_receiver()
            .await
            .ok_or_else(|| HomegateError::internal("IPC message receiver already taken"))?;

        let ipc_accept = ctx.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        let mut tick_timer = tokio::time::interval(self.tick_interval);

        info!(tick_interval_ms = self.tick_interval.as_millis() as u64, "Service running");

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

                // Override expiry, due blocks and quota warnings
                _ = tick_timer.tick() => {
                    let (events, snapshot) = {
                        let mut engine = ctx.engine.lock().await;
                        let events = engine.tick();
                        let snapshot = (!events.is_empty()).then(|| engine.status());
                        (events, snapshot)
                    };
                    dispatch_events(&ctx, events, snapshot).await;

                    ctx.rate_limiter.lock().await.cleanup(RATE_LIMIT_IDLE);
                }

                Some(msg) = ipc_messages.recv() => {
                    handle_ipc_message(&ctx, msg).await;
                }
            }
        }

        info!("Shutting down homegated");

        ctx.ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        {
            let mut engine = ctx.engine.lock().await;
            if engine.session().is_active() {
                let minutes = engine.app_closed();
                info!(minutes, "Committed active session");
            }
            engine.flush();
        }

        if let Err(e) = ctx
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        if !ctx.store.flush().await {
            warn!("Final state save failed");
        }

        ctx.ipc.shutdown();
        info!("Shutdown complete");
        Ok(())
    }
}

async fn handle_ipc_message(ctx: &Shared, msg: ServerMessage) {
    match msg {
        ServerMessage::Request { client_id, request } => {
            let request_id = request.request_id;
            let subscribing = matches!(request.command, Command::SubscribeEvents);

            let response = if !ctx.rate_limiter.lock().await.check(&client_id) {
                error_response(request_id, HomegateError::RateLimited)
            } else {
                handle_request(ctx, &client_id, request).await
            };

            let _ = ctx.ipc.send_response(&client_id, response).await;

            // New subscribers start from a full snapshot
            if subscribing {
                let snapshot = ctx.engine.lock().await.status();
                let _ = ctx
                    .ipc
                    .send_event(&client_id, Event::new(EventPayload::StateChanged(snapshot)))
                    .await;
            }
        }

        ServerMessage::ClientConnected { client_id, info } => {
            info!(
                client_id = %client_id,
                role = ?info.role,
                uid = ?info.uid,
                "Client connected"
            );

            let _ = ctx.store.append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                client_id: client_id.to_string(),
                role: format!("{:?}", info.role),
                uid: info.uid,
            }));
        }

        ServerMessage::ClientDisconnected { client_id } => {
            debug!(client_id = %client_id, "Client disconnected");

            let _ = ctx
                .store
                .append_audit(AuditEvent::new(AuditEventType::ClientDisconnected {
                    client_id: client_id.to_string(),
                }));

            ctx.rate_limiter.lock().await.remove_client(&client_id);
        }
    }
}

async fn handle_request(ctx: &Shared, client_id: &ClientId, request: Request) -> Response {
    let request_id = request.request_id;

    if request.api_version != API_VERSION {
        return Response::error(
            request_id,
            ErrorInfo::new(
                ErrorCode::UnsupportedVersion,
                format!(
                    "API version {} not supported, expected {}",
                    request.api_version, API_VERSION
                ),
            ),
        );
    }

    let role = match ctx.ipc.get_client_info(client_id).await {
        Some(info) => info.role,
        None => ClientRole::Observer,
    };
    if !request.command.permitted_for(role) {
        return error_response(
            request_id,
            HomegateError::permission(format!("{:?} role may not issue this command", role)),
        );
    }

    let mut engine = ctx.engine.lock().await;
    let response = execute(&mut engine, ctx, client_id, request_id, request.command);

    let events = engine.take_events();
    let snapshot = (!events.is_empty()).then(|| engine.status());
    drop(engine);

    dispatch_events(ctx, events, snapshot).await;
    response
}

/// Run one command against the engine. Events it produces are left queued.
fn execute(
    engine: &mut PolicyEngine,
    ctx: &Shared,
    client_id: &ClientId,
    request_id: u64,
    command: Command,
) -> Response {
    let payload = match command {
        Command::GetStatus => ResponsePayload::Status(engine.status()),

        Command::SetPresence { at_home } => {
            let changed = engine.set_presence(at_home);
            // Apply the new presence right away while the app is in use
            if changed && engine.session().is_active() {
                engine.evaluate_current();
            }
            ResponsePayload::PresenceUpdated { at_home, changed }
        }

        Command::ReportLocation {
            latitude,
            longitude,
            wifi_ssid,
        } => {
            let fix = match LocationFix::new(latitude, longitude, wifi_ssid) {
                Ok(fix) => fix,
                Err(e) => return policy_error_response(request_id, &e),
            };
            let before = engine.is_at_home();
            let at_home = engine.report_location(&fix);
            let changed = at_home != before;
            if changed && engine.session().is_active() {
                engine.evaluate_current();
            }
            ResponsePayload::PresenceUpdated { at_home, changed }
        }

        Command::Evaluate { presence } => {
            let verdict = match presence {
                Some(at_home) => engine.evaluate(at_home),
                None => engine.evaluate_current(),
            };
            verdict_payload(engine, verdict)
        }

        Command::AppOpened => {
            let verdict = engine.app_opened();
            verdict_payload(engine, verdict)
        }

        Command::AppClosed => ResponsePayload::SessionClosed {
            minutes: engine.app_closed(),
        },

        Command::ActivateOverride => match engine.activate_override() {
            Ok(expires_at) => {
                // Lift a block in force right now
                engine.evaluate_current();
                ResponsePayload::OverrideActivated {
                    overrides_remaining: engine.overrides_remaining(),
                    expires_at,
                }
            }
            Err(e) => return policy_error_response(request_id, &e),
        },

        Command::SetDailyLimit { minutes } => ResponsePayload::DailyLimitSet {
            minutes: engine.set_daily_limit(minutes),
        },

        Command::SetHomeProfile {
            latitude,
            longitude,
            wifi_ssid,
        } => match HomeProfile::new(latitude, longitude, wifi_ssid.unwrap_or_default()) {
            Ok(profile) => {
                engine.set_home_profile(profile);
                ResponsePayload::HomeProfileSet
            }
            Err(e) => return policy_error_response(request_id, &e),
        },

        Command::SetSetupFlags {
            monitor_enabled,
            enforcement_enabled,
        } => ResponsePayload::SetupFlagsSet(
            engine.set_setup_flags(monitor_enabled, enforcement_enabled),
        ),

        Command::SubscribeEvents => ResponsePayload::Subscribed {
            client_id: client_id.clone(),
        },

        Command::UnsubscribeEvents => ResponsePayload::Unsubscribed,

        Command::GetHealth => ResponsePayload::Health(HealthStatus {
            live: true,
            ready: true,
            store_ok: ctx.store.is_healthy(),
            host_ok: ctx.host.is_healthy(),
            fully_configured: engine.setup_flags().is_fully_configured(),
        }),

        Command::Ping => ResponsePayload::Pong,
    };

    Response::success(request_id, payload)
}

fn verdict_payload(engine: &mut PolicyEngine, verdict: Verdict) -> ResponsePayload {
    ResponsePayload::Verdict {
        verdict,
        state: engine.last_state(),
        notice: engine.block_notice(),
    }
}

/// Publish engine events; blocks go through the enforcement host
async fn dispatch_events(
    ctx: &Shared,
    events: Vec<CoreEvent>,
    snapshot: Option<homegate_api::StatusSnapshot>,
) {
    for event in events {
        match &event {
            CoreEvent::Blocked(notice) => match ctx.host.enforce_block(notice).await {
                Ok(()) => {}
                Err(HostError::NoAgent) => {
                    warn!(reason = ?notice.reason, "Block issued with no enforcement agent listening");
                }
                Err(e) => warn!(error = %e, "Enforcement failed"),
            },
            CoreEvent::OverrideActivated {
                overrides_remaining,
                ..
            } => {
                notify(ctx, &override_granted_message(*overrides_remaining)).await;
            }
            CoreEvent::QuotaWarning { remaining_minutes } => {
                notify(
                    ctx,
                    &format!("{} minutes of app time left today", remaining_minutes),
                )
                .await;
            }
            _ => {}
        }

        if let Some(payload) = event_payload(event) {
            ctx.ipc.broadcast_event(Event::new(payload));
        }
    }

    if let Some(snapshot) = snapshot {
        ctx.ipc
            .broadcast_event(Event::new(EventPayload::StateChanged(snapshot)));
    }
}

async fn notify(ctx: &Shared, message: &str) {
    if let Err(e) = ctx.host.notify(message).await {
        debug!(error = %e, "Notification not delivered");
    }
}

/// Wire form of an engine event. `Blocked` is published by the enforcement host.
fn event_payload(event: CoreEvent) -> Option<EventPayload> {
    let payload = match event {
        CoreEvent::Blocked(_) => return None,
        CoreEvent::VerdictChanged { verdict, state } => {
            EventPayload::VerdictChanged { verdict, state }
        }
        CoreEvent::PresenceChanged { at_home } => EventPayload::PresenceChanged { at_home },
        CoreEvent::OverrideActivated {
            overrides_remaining,
            expires_at,
        } => EventPayload::OverrideActivated {
            overrides_remaining,
            expires_at,
        },
        CoreEvent::OverrideExpired => EventPayload::OverrideExpired,
        CoreEvent::SessionEnded {
            minutes,
            used_today,
        } => EventPayload::SessionEnded {
            minutes,
            used_today,
        },
        CoreEvent::QuotaWarning { remaining_minutes } => {
            EventPayload::QuotaWarning { remaining_minutes }
        }
    };
    Some(payload)
}

fn error_response(request_id: u64, error: HomegateError) -> Response {
    let code = match &error {
        HomegateError::ValidationError(_) => ErrorCode::InvalidArgument,
        HomegateError::PermissionDenied(_) => ErrorCode::PermissionDenied,
        HomegateError::RateLimited => ErrorCode::RateLimited,
        _ => ErrorCode::InternalError,
    };
    Response::error(request_id, ErrorInfo::new(code, error.to_string()))
}

fn policy_error_response(request_id: u64, error: &PolicyError) -> Response {
    match error {
        PolicyError::OverrideQuotaExhausted => Response::error(
            request_id,
            ErrorInfo::new(ErrorCode::OverrideUnavailable, error.to_string()),
        ),
        PolicyError::NegativeMinutes(_) | PolicyError::InvalidCoordinates { .. } => {
            error_response(request_id, HomegateError::validation(error.to_string()))
        }
    }
}

/// Build the engine from persisted state. An unreadable store is retried a
/// few times and then stops startup rather than starting from scratch.
async fn open_engine(
    policy: &Policy,
    store: Arc<dyn Store>,
    retry_delay: Duration,
) -> Result<PolicyEngine> {
    let mut attempt = 1;
    loop {
        match PolicyEngine::new(policy, store.clone(), Arc::new(SystemClock)) {
            Ok(engine) => return Ok(engine),
            Err(e) if attempt < LOAD_ATTEMPTS => {
                warn!(error = %e, attempt, "Failed to load persisted state, retrying");
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(e).context("Failed to load persisted state"),
        }
    }
}

/// Load the config file; a missing file means built-in defaults
fn load_policy(args: &Args) -> Result<(Policy, bool)> {
    match load_config(&args.config) {
        Ok(policy) => Ok((policy, true)),
        Err(ConfigError::ReadError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok((Policy::default(), false))
        }
        Err(e) => {
            Err(e).with_context(|| format!("Failed to load config from {:?}", args.config))
        }
    }
}

fn init_logging(args: &Args, policy: &Policy) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let json_layer = match args.log_format {
        LogFormat::Text => None,
        LogFormat::Json => {
            let log_dir = &policy.service.log_dir;
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join("homegated.log"))
                .with_context(|| format!("Failed to open log file in {:?}", log_dir))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(json_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (policy, from_file) = load_policy(&args)?;
    init_logging(&args, &policy)?;

    info!(version = env!("CARGO_PKG_VERSION"), "homegated starting");

    if is_mock_time_active() {
        warn!(now = %homegate_util::now(), "Mock time is active");
    }

    if from_file {
        info!(
            config_path = %args.config.display(),
            daily_limit_minutes = policy.daily_limit_minutes,
            at_home_mode = ?policy.at_home_mode,
            home_configured = policy.home.is_some(),
            "Configuration loaded"
        );
    } else {
        warn!(
            config_path = %args.config.display(),
            "No configuration file, using defaults"
        );
    }

    let service = Service::new(&args, policy).await?;
    service.run().await
}
