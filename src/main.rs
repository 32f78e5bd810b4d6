mod config;
mod git;
mod http;
mod post_receive;
mod repo;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::repo::hook::HookCommand;
use crate::repo::RepoStore;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gitto", version, about = "Bare git hosting over HTTP")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "GITTO_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the management API and git smart HTTP (the default).
    Serve {
        /// Override the configured listen address.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Run as a repository's post-receive hook.
    Hook,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: RepoStore,
    /// Shared secret every `/api` request must present as a bearer token.
    pub api_token: Arc<str>,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState, listen: &str) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state));

    let listen_addr: std::net::SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address: {listen}"))?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

async fn serve(config: Config, listen: Option<String>) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let api_token = config::load_api_token(&config)?;

    tokio::fs::create_dir_all(&config.root)
        .await
        .with_context(|| format!("failed to create repository root: {}", config.root.display()))?;

    tracing::info!(
        root = %config.root.display(),
        config_path = ?config.source,
        "starting gitto"
    );

    let hook = HookCommand::current(config.source.clone())?;
    let store = RepoStore::new(&config, hook);
    let listen = listen.unwrap_or_else(|| config.listen.clone());

    let state = AppState {
        store,
        api_token: Arc::from(api_token),
    };
    run_http_server(state, &listen).await
}

// ---------------------------------------------------------------------------
// Hook mode
// ---------------------------------------------------------------------------

async fn hook(config: Config) -> Result<()> {
    // stdout belongs to the pushing client, so diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cwd = std::env::current_dir().context("failed to read working directory")?;
    post_receive::run(&config, &cwd, &mut tokio::io::stdout()).await
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Serve { listen } => serve(config, listen).await,
        Command::Hook => hook(config).await,
    }
}
