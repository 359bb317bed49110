//! Docwatch Daemon - push-notification driven document monitor
//!
//! This binary handles:
//! - The inbound HTTP endpoint that receives change notifications
//! - Watch setup for the documents and folder named in the configuration
//! - Periodic renewal of channels before they expire
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon builds the Drive adapter, the keyring credential provider and
//! the change reconciler, starts the notification server, then runs the
//! renewal loop. A `CancellationToken` shared by the server, the renewal
//! loop and in-flight notification tasks is cancelled on SIGTERM or SIGINT.

mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use docwatch_core::config::{Config, LoggingConfig};
use docwatch_core::domain::{DocumentId, FolderId};
use docwatch_drive::auth::{KeyringCredentialProvider, RefreshFlow};
use docwatch_drive::client::DriveClient;
use docwatch_drive::provider::DriveDocumentStore;
use docwatch_monitor::hub::SubscriberHub;
use docwatch_monitor::reconciler::ReconcilerSettings;
use docwatch_monitor::ChangeReconciler;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::server::{AppState, NotificationServer};

/// Bound on each shutdown step (channel cancellation, task drain)
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(
    name = "docwatchd",
    version,
    about = "Watches cloud documents and streams their text when they change"
)]
struct Args {
    /// Configuration file [default: $XDG_CONFIG_HOME/docwatch/config.yaml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address of the notification endpoint (overrides `server.listen`)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log as JSON lines (overrides `logging.json`)
    #[arg(long)]
    json_logs: bool,
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the reconciler and everything that drives it
struct DaemonService {
    config: Config,
    reconciler: Arc<ChangeReconciler>,
    hub: Arc<SubscriberHub>,
    /// Notification cycles spawned by the server
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Wires the Drive adapter, the credential provider and the reconciler
    fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let timeout = config.monitor.remote_timeout();
        let client = match &config.drive.api_base_url {
            Some(base_url) => DriveClient::with_base_url(base_url.clone(), timeout),
            None => DriveClient::with_timeout(timeout),
        }
        .context("Failed to build Drive client")?;

        let flow = match (&config.auth.client_id, &config.auth.client_secret) {
            (Some(id), Some(secret)) => Some(
                RefreshFlow::new(id.clone(), secret.clone())
                    .context("Failed to configure OAuth2 refresh")?,
            ),
            _ => {
                warn!("No OAuth2 client configured; expired tokens cannot be refreshed");
                None
            }
        };
        let credentials = Arc::new(KeyringCredentialProvider::new(
            config.auth.account.clone(),
            flow,
        ));

        let hub = Arc::new(SubscriberHub::new(config.server.subscriber_queue));
        let reconciler = Arc::new(ChangeReconciler::new(
            Arc::new(DriveDocumentStore::new(client)),
            credentials,
            hub.clone(),
            ReconcilerSettings::from_config(&config.monitor),
        ));

        Ok(Self {
            config,
            reconciler,
            hub,
            tasks: TaskTracker::new(),
            shutdown,
        })
    }

    /// Runs until shutdown
    ///
    /// 1. Binds and starts the notification server
    /// 2. Registers the configured watches
    /// 3. Renews channels periodically
    /// 4. On shutdown, cancels channels and drains in-flight notifications
    async fn run(&self) -> Result<()> {
        let state = Arc::new(AppState {
            reconciler: Arc::clone(&self.reconciler),
            hub: Arc::clone(&self.hub),
            tasks: self.tasks.clone(),
            shutdown: self.shutdown.clone(),
        });
        let listen = &self.config.server.listen;
        let server = NotificationServer::bind(state, listen)
            .await
            .with_context(|| format!("Failed to bind notification endpoint {listen}"))?;
        let server_task = tokio::spawn(server.run());

        tokio::select! {
            _ = self.register_configured() => {}
            _ = self.shutdown.cancelled() => {
                info!("Shutdown signal received during watch setup");
            }
        }

        self.renewal_loop().await;

        match tokio::time::timeout(SHUTDOWN_GRACE, self.reconciler.stop_all()).await {
            Ok(stopped) => info!(stopped, "Watches stopped"),
            Err(_) => warn!("Timed out cancelling channels"),
        }

        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait()).await.is_err() {
            warn!(pending = self.tasks.len(), "Notification tasks still running at exit");
        }

        server_task
            .await
            .context("Notification server task panicked")?
    }

    /// Registers the watches named in the configuration
    ///
    /// Failures are logged; the daemon keeps serving so watches can be
    /// added later through the HTTP surface.
    async fn register_configured(&self) {
        for raw in &self.config.monitor.documents {
            let id = match DocumentId::new(raw.clone()) {
                Ok(id) => id,
                Err(e) => {
                    warn!(document_id = %raw, error = %e, "Skipping invalid document id");
                    continue;
                }
            };
            if let Err(e) = self.reconciler.register_file_watch(&id).await {
                error!(document_id = %id, error = %e, "Failed to watch document");
            }
        }

        if let Some(raw) = &self.config.monitor.folder_id {
            match FolderId::new(raw.clone()) {
                Ok(folder_id) => {
                    if let Err(e) = self.reconciler.register_folder_watch(&folder_id).await {
                        error!(folder_id = %folder_id, error = %e, "Failed to watch folder");
                    }
                }
                Err(e) => warn!(folder_id = %raw, error = %e, "Skipping invalid folder id"),
            }
        }
    }

    /// Renews channels expiring within the configured margin
    async fn renewal_loop(&self) {
        let period = self.config.monitor.renew_interval().max(Duration::from_secs(1));
        let margin = self.config.monitor.renew_margin();
        info!(interval_secs = period.as_secs(), "Starting channel renewal loop");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let results = self.reconciler.renew_expiring(margin).await;
                    if !results.is_empty() {
                        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                        info!(renewed = results.len() - failed, failed, "Renewal pass complete");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Renewal loop terminated");
    }
}

// ============================================================================
// Startup helpers
// ============================================================================

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()),
    };

    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }
    Ok(config)
}

/// Installs the global subscriber; `RUST_LOG` wins over `logging.level`
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Docwatch daemon starting (docwatchd)");

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(field = %problem.field, message = %problem.message, "Invalid configuration");
        }
        anyhow::bail!("Configuration has {} error(s)", problems.len());
    }

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone())?;

    let result = service.run().await;

    match &result {
        Ok(()) => info!("Docwatch daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "Docwatch daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
