//! Test utilities and common setup.
#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use devspace_gateway::hub::BroadcastHub;
use devspace_gateway::paths::PathResolver;
use devspace_gateway::refresh::{DebounceWindow, spawn_debouncer};
use devspace_gateway::terminal::{Terminal, TerminalState};
use devspace_gateway::{AppState, Config, router};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Terminal double that records everything written to it.
#[derive(Default)]
pub struct RecordingTerminal {
    written: Mutex<Vec<String>>,
}

impl RecordingTerminal {
    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }
}

impl Terminal for RecordingTerminal {
    fn write(&self, bytes: &[u8]) {
        self.written
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(bytes).to_string());
    }

    fn state(&self) -> TerminalState {
        TerminalState::Running
    }

    fn shutdown(&self) {}
}

pub struct TestApp {
    pub router: Router,
    pub hub: Arc<BroadcastHub>,
    pub terminal: Arc<RecordingTerminal>,
    temp_dir: TempDir,
}

impl TestApp {
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(Method::GET)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn post_raw(&self, uri: &str, body: impl Into<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method(Method::POST)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn post(&self, uri: &str, body: Value) -> Response<Body> {
        self.post_raw(uri, serde_json::to_string(&body).unwrap())
            .await
    }
}

/// Build the router over a fresh temporary workspace.
pub async fn test_app() -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let resolver = PathResolver::canonical(temp_dir.path()).unwrap();

    let hub = Arc::new(BroadcastHub::new());
    let (refresh, _debouncer) = spawn_debouncer(
        hub.clone(),
        DebounceWindow::new(Duration::from_millis(20), Duration::from_millis(200)),
    );
    let terminal = Arc::new(RecordingTerminal::default());

    let state = AppState::new(
        Config::default(),
        resolver,
        hub.clone(),
        refresh,
        terminal.clone(),
    );

    TestApp {
        router: router(state),
        hub,
        terminal,
        temp_dir,
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
