//! Workspace session gateway.
//!
//! Serves one shared workspace directory and one shared shell to any number
//! of browser sessions over HTTP and a WebSocket event channel. File
//! mutations and shell output are fanned out to every connected session.

pub mod archive;
pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod paths;
pub mod protocol;
pub mod refresh;
pub mod routes;
pub mod runner;
pub mod terminal;
pub mod tree;
pub mod watcher;
pub mod workspace;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::GatewayError;

use hub::BroadcastHub;
use paths::PathResolver;
use refresh::RefreshSignal;
use runner::RunDispatcher;
use terminal::Terminal;
use workspace::{ClearRetry, Workspace};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub workspace: Workspace,
    pub hub: Arc<BroadcastHub>,
    pub terminal: Arc<dyn Terminal>,
    pub runner: Arc<RunDispatcher>,
}

impl AppState {
    pub fn new(
        config: Config,
        resolver: PathResolver,
        hub: Arc<BroadcastHub>,
        refresh: RefreshSignal,
        terminal: Arc<dyn Terminal>,
    ) -> Self {
        let clear_retry = ClearRetry {
            attempts: config.clear_retries,
            delay: Duration::from_millis(config.clear_retry_delay_ms),
        };
        let runner = RunDispatcher::new(resolver.clone(), config.run_templates(), terminal.clone());

        Self {
            workspace: Workspace::new(resolver, refresh, clear_retry),
            config: Arc::new(config),
            hub,
            terminal,
            runner: Arc::new(runner),
        }
    }
}

/// Build the full router with CORS, tracing and the body limit applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::gateway_routes())
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
