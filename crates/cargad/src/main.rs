//! cargad - The Carga tracking service
//!
//! This is the main entry point for the cargad service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization and stale-session recovery
//! - Location sampler (gpsd)
//! - Tracking controllers and chat
//! - IPC server and realtime fan-out

mod handler;

use anyhow::{Context, Result};
use carga_api::{Event, EventPayload, ErrorCode, ErrorInfo, Response};
use carga_config::{SamplerConfig, Settings, load_config};
use carga_core::{ControllerOptions, SessionRegistry};
use carga_geo_api::{LocationSampler, UnsupportedSampler};
use carga_geo_gpsd::GpsdSampler;
use carga_ipc::{IpcServer, ServerMessage};
use carga_store::{ChangeEvent, ChangeFeed, SqliteStore, TrackingStore};
use carga_util::{RateLimiter, default_config_path, default_data_dir, default_socket_path};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use handler::CommandHandler;

/// cargad - GPS tracking and shipment chat service
#[derive(Parser, Debug)]
#[command(name = "cargad")]
#[command(about = "GPS tracking and shipment chat service for the Carga marketplace", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/carga/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set CARGA_SOCKET env var)
    #[arg(short, long, env = "CARGA_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set CARGA_DATA_DIR env var)
    #[arg(short, long, env = "CARGA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Main service state
struct Service {
    handler: Arc<CommandHandler>,
    ipc: Arc<IpcServer>,
    store: Arc<SqliteStore>,
    rate_limiter: RateLimiter,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let settings = if args.config.exists() {
            let settings = load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?;
            info!(config_path = %args.config.display(), "Configuration loaded");
            settings
        } else {
            info!(config_path = %args.config.display(), "No configuration file, using defaults");
            Settings::default()
        };

        let socket_path = args
            .socket
            .clone()
            .or_else(|| settings.service.socket_path.clone())
            .unwrap_or_else(default_socket_path);

        let data_dir = args
            .data_dir
            .clone()
            .or_else(|| settings.service.data_dir.clone())
            .unwrap_or_else(default_data_dir);

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("cargad.db");
        let feed = ChangeFeed::new(settings.service.event_buffer);
        let store = Arc::new(
            SqliteStore::open_with_feed(&db_path, feed)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        // Watches do not survive a restart
        let closed = store
            .close_stale_sessions()
            .await
            .context("Failed to close stale tracking sessions")?;
        if closed > 0 {
            warn!(count = closed, "Closed tracking sessions left active by a previous run");
        }

        let sampler: Arc<dyn LocationSampler> = match &settings.sampler {
            SamplerConfig::Gpsd { address } => {
                let gpsd = GpsdSampler::new(address.clone());
                gpsd.check_connection().await;
                Arc::new(gpsd)
            }
            SamplerConfig::None => Arc::new(UnsupportedSampler),
        };
        info!(sampler = sampler.name(), "Location sampler initialized");
        if !sampler.is_healthy() {
            warn!(sampler = sampler.name(), "Location sampler unavailable, tracking requests will fail");
        }

        let options = ControllerOptions {
            one_shot: settings.tracking.one_shot_options(),
            watch: settings.tracking.watch_options(),
        };
        let handler = CommandHandler::new(
            sampler,
            store.clone(),
            SessionRegistry::global(),
            options,
            settings.chat.max_message_length,
        );

        let mut ipc = IpcServer::with_event_buffer(&socket_path, settings.service.event_buffer);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        // Rate limiter: 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            handler: Arc::new(handler),
            ipc: Arc::new(ipc),
            store,
            rate_limiter,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc = self.ipc.clone();
        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;
        let mut changes = self.store.subscribe();
        let rate_limiter = Arc::new(Mutex::new(self.rate_limiter));
        let handler = self.handler.clone();

        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

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

                // Store changes, fanned out to channel subscribers
                change = changes.recv() => match change {
                    Ok(change) => Self::forward_change(&ipc, change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change feed lagged, realtime events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("Change feed closed");
                        break;
                    }
                },

                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&handler, &ipc, &rate_limiter, msg).await;
                }
            }
        }

        info!("Shutting down cargad");

        handler.stop_all().await;
        ipc.broadcast_event(Event::broadcast(EventPayload::Shutdown));

        // Let writers flush the shutdown event
        tokio::time::sleep(Duration::from_millis(100)).await;
        ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    fn forward_change(ipc: &Arc<IpcServer>, change: ChangeEvent) {
        for event in change.into_events() {
            debug!(channel = ?event.channel, "Forwarding change");
            ipc.broadcast_event(event);
        }
    }

    async fn handle_ipc_message(
        handler: &Arc<CommandHandler>,
        ipc: &Arc<IpcServer>,
        rate_limiter: &Arc<Mutex<RateLimiter>>,
        msg: ServerMessage,
    ) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.check(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                // Location reads can take seconds; keep the loop responsive
                let handler = handler.clone();
                let ipc = ipc.clone();
                tokio::spawn(async move {
                    let response = handler
                        .handle(&client_id, request.request_id, request.command)
                        .await;
                    if let Err(e) = ipc.send_response(&client_id, response).await {
                        debug!(client_id = %client_id, error = %e, "Client left before response");
                    }
                });
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(client_id = %client_id, uid = ?info.uid, "Client connected");
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                let mut limiter = rate_limiter.lock().await;
                limiter.remove_client(&client_id);
            }
        }
    }
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!(version = env!("CARGO_PKG_VERSION"), "cargad starting");

    if carga_util::is_mock_time_active() {
        warn!(now = %carga_util::now(), "Mock time is active, timestamps are not real");
    }

    let service = Service::new(&args).await?;
    service.run().await
}
