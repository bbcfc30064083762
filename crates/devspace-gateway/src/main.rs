use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use devspace_gateway::{
    AppState, Config,
    hub::BroadcastHub,
    paths::PathResolver,
    refresh::spawn_debouncer,
    router,
    terminal::start_terminal,
    watcher::ChangeWatcher,
    workspace::Workspace,
};

#[derive(Parser, Debug)]
#[command(name = "devspace-gateway")]
#[command(about = "Shared workspace, shared terminal and run-on-save for browser sessions")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "DEVSPACE_PORT", default_value = "9000")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "DEVSPACE_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Workspace root (wiped and recreated on startup)
    #[arg(short, long, env = "DEVSPACE_ROOT", default_value = "./user")]
    root: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, env = "DEVSPACE_VERBOSE")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "DEVSPACE_CONFIG")]
    config: Option<PathBuf>,
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("devspace_gateway={level},tower_http={level}")));

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Load config from file if provided, otherwise use defaults
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    Workspace::reset(&cli.root)
        .await
        .with_context(|| format!("preparing workspace root {}", cli.root.display()))?;
    let resolver = PathResolver::canonical(&cli.root)
        .with_context(|| format!("resolving workspace root {}", cli.root.display()))?;
    info!("Serving workspace from: {}", resolver.root().display());

    let hub = Arc::new(BroadcastHub::new());
    let (refresh, debouncer) = spawn_debouncer(hub.clone(), config.debounce_window());

    let watcher = match ChangeWatcher::start(resolver.clone(), refresh.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("File watcher unavailable, relying on direct notifications: {}", e);
            None
        }
    };

    let terminal = start_terminal(&config.terminal, resolver.root(), hub.clone());
    let state = AppState::new(config, resolver, hub, refresh, terminal.clone());
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.bind, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Starting devspace-gateway on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    drop(watcher);
    terminal.shutdown();
    debouncer.abort();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
