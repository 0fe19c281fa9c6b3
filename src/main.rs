//! iSolarCloud CLI - Lightweight Sungrow iSolarCloud client
//!
//! Signs in against the OpenAPI gateway, keeps the token fresh, and shows
//! the battery charge of the selected plant as a badge.

mod api;
mod auth;
mod badge;
mod cli;
mod config;
mod error;
mod models;
mod service;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::GatewayClient;
use crate::auth::{
    AuthOrchestrator, AuthorizationFlow, Credentials, LoopbackFlow, NoopScheduler,
    RefreshScheduler, SystemClock, TimerScheduler, TokenManager, UnavailableFlow,
};
use crate::badge::{BadgePoller, FileBadge};
use crate::config::{CredentialStore, FileStore};
use crate::models::PointId;
use crate::service::Service;

/// How long `login` waits for the browser redirect.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REDIRECT_PORT: u16 = 8765;

#[derive(Parser)]
#[command(name = "isolar-cli")]
#[command(about = "Lightweight CLI client for Sungrow iSolarCloud", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Save API credentials from the developer portal
    Configure {
        #[arg(long)]
        app_key: String,

        #[arg(long)]
        secret_key: String,

        /// Authorization page URL, including its query parameters
        #[arg(long)]
        auth_url: String,

        /// Regional gateway (default https://augateway.isolarcloud.com)
        #[arg(long)]
        gateway_url: Option<String>,
    },

    /// Sign in through the browser
    Login {
        /// Local port that receives the authorization redirect
        #[arg(short, long, default_value_t = DEFAULT_REDIRECT_PORT)]
        port: u16,
    },

    /// Clear tokens (credentials are kept)
    Logout,

    /// Show current authentication status
    Status,

    /// Refresh the access token now
    Refresh,

    /// List plants
    Plants {
        /// Fetch from the gateway instead of the cached list
        #[arg(short, long)]
        refresh: bool,
    },

    /// List devices of a plant
    Devices {
        /// Plant id (from `plants` output)
        ps_id: u64,
    },

    /// Read real-time telemetry points of a device
    Points {
        /// Device type code (43 for batteries)
        #[arg(short = 't', long)]
        device_type: i64,

        /// Device key (from `devices` output)
        #[arg(short = 'k', long)]
        ps_key: String,

        /// Point ids, e.g. 58604 for battery state of charge
        #[arg(required = true)]
        point_ids: Vec<PointId>,
    },

    /// Select the plant whose battery the badge shows
    Select {
        ps_id: String,
    },

    /// Update the battery badge once and print it
    Badge,

    /// Run in the background: refresh tokens, update the badge, and answer
    /// JSON commands on stdin
    Serve {
        /// Local port that receives the authorization redirect
        #[arg(short, long, default_value_t = DEFAULT_REDIRECT_PORT)]
        port: u16,
    },
}

/// Wire up the service around the given collaborators.
fn build_service(
    store: Arc<dyn CredentialStore>,
    flow: Arc<dyn AuthorizationFlow>,
    scheduler: Arc<dyn RefreshScheduler>,
) -> Result<Arc<Service>> {
    let gateway = Arc::new(GatewayClient::new()?);
    let tokens = TokenManager::new(store, gateway, flow, scheduler, Arc::new(SystemClock));
    let badge = Arc::new(BadgePoller::new(
        tokens.clone(),
        Arc::new(FileBadge::open_default()?),
    ));
    let auth = Arc::new(AuthOrchestrator::new(tokens));
    Ok(Arc::new(Service::new(auth, badge)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr; stdout carries command output)
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let store: Arc<dyn CredentialStore> = match cli.store {
        Some(path) => Arc::new(FileStore::at(path)),
        None => Arc::new(FileStore::open_default()?),
    };
    let one_shot = |flow: Arc<dyn AuthorizationFlow>| {
        build_service(Arc::clone(&store), flow, Arc::new(NoopScheduler))
    };

    match cli.command {
        Commands::Configure {
            app_key,
            secret_key,
            auth_url,
            gateway_url,
        } => {
            let credentials = Credentials {
                app_key,
                secret_key,
                auth_url,
                gateway_url,
            };
            cli::configure(&*one_shot(Arc::new(UnavailableFlow))?, &credentials)?;
        }
        Commands::Login { port } => {
            tracing::info!("Starting authentication flow...");
            let flow = LoopbackFlow::bind(port, LOGIN_TIMEOUT).await?;
            cli::login(&*one_shot(Arc::new(flow))?).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            cli::logout(&*one_shot(Arc::new(UnavailableFlow))?).await?;
        }
        Commands::Status => {
            cli::status(&*one_shot(Arc::new(UnavailableFlow))?)?;
        }
        Commands::Refresh => {
            cli::refresh(&*one_shot(Arc::new(UnavailableFlow))?).await?;
        }
        Commands::Plants { refresh } => {
            tracing::info!("Fetching plants...");
            cli::plants(&*one_shot(Arc::new(UnavailableFlow))?, refresh).await?;
        }
        Commands::Devices { ps_id } => {
            cli::devices(&*one_shot(Arc::new(UnavailableFlow))?, ps_id).await?;
        }
        Commands::Points {
            device_type,
            ps_key,
            point_ids,
        } => {
            let service = one_shot(Arc::new(UnavailableFlow))?;
            cli::points(&service, device_type, ps_key, point_ids).await?;
        }
        Commands::Select { ps_id } => {
            cli::select(&*one_shot(Arc::new(UnavailableFlow))?, &ps_id).await?;
        }
        Commands::Badge => {
            cli::badge(&*one_shot(Arc::new(UnavailableFlow))?).await?;
        }
        Commands::Serve { port } => {
            let flow = LoopbackFlow::bind(port, LOGIN_TIMEOUT).await?;
            let (scheduler, refresh_rx) = TimerScheduler::new();
            let service = build_service(Arc::clone(&store), Arc::new(flow), Arc::new(scheduler))?;
            service::daemon::serve(service, refresh_rx).await?;
        }
    }

    Ok(())
}
