use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;
use crate::{handlers, ws};

/// Create gateway routes
pub fn gateway_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Event channel
        .route("/ws", get(ws::ws_handler))
        // Tree and content
        .route("/files", get(handlers::get_tree))
        .route("/files/content", get(handlers::get_content))
        // Mutations
        .route("/files/create-file", post(handlers::create_file))
        .route("/files/create-folder", post(handlers::create_folder))
        .route("/files/write", post(handlers::write_file))
        .route("/files/rename", post(handlers::rename))
        .route("/files/delete", post(handlers::delete))
        .route("/files/upload-project", post(handlers::upload_project))
        // Download
        .route("/files/download-folder", get(handlers::download_folder))
        // Run
        .route("/run", post(handlers::run))
}
