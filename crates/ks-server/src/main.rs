//! keyshell server
//!
//! Serves one shared shell over a raw TCP socket to clients that prove
//! possession of the configured key, or that name a username issued to
//! such a client earlier.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ks_core::config::{self, ServerConfig};
use ks_server::{KeyShellServer, ServerState};

#[derive(Parser)]
#[command(name = "keyshell")]
#[command(about = "Key-gated remote shell over raw TCP")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, host:port (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "KEYSHELL_PORT")]
    port: Option<u16>,

    /// PEM public key clients must prove possession of (overrides config)
    #[arg(short = 'k', long, env = "KEYSHELL_PUBLIC_KEY")]
    public_key: Option<PathBuf>,

    /// Prompt delimiter (overrides config)
    #[arg(long)]
    delimiter: Option<String>,

    /// Shell program to run (overrides config)
    #[arg(long)]
    shell: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Apply command line overrides on top of the file configuration
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.set_listen_address(bind);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.public_key {
            config.public_key_path = Some(path.clone());
        }
        if let Some(delimiter) = &self.delimiter {
            config.delimiter = delimiter.clone();
        }
        if let Some(shell) = &self.shell {
            config.shell = shell.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("keyshell starting...");

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ServerConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ServerConfig::default()
        }
    };
    args.apply(&mut config);

    let state = Arc::new(ServerState::start(config).context("Failed to start keyshell")?);

    let server = match KeyShellServer::bind(Arc::clone(&state)).await {
        Ok(server) => server,
        Err(e) => {
            state.shutdown().await;
            return Err(e).context("Failed to start listener");
        }
    };

    // Setup signal handlers
    let cancel = state.cancel_token();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });

    server.run().await;
    state.shutdown().await;

    tracing::info!("keyshell shutdown complete");
    Ok(())
}
