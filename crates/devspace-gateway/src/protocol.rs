//! Event channel message types.
//!
//! Frames are JSON objects of the form `{"event": "...", "data": ...}`.
//! Server frames also carry the per-session `seq` assigned by the hub.

use serde::{Deserialize, Serialize};

// ============================================================================
// Change events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// A single observed mutation under the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Virtual path, `/` for the root itself
    pub path: String,
    pub is_directory: bool,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<String>, is_directory: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            is_directory,
        }
    }
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Events delivered to sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// The workspace changed; clients refetch the tree.
    #[serde(rename = "file:refresh")]
    FileRefresh { changes: Vec<ChangeEvent> },

    /// Output from the shared shell.
    #[serde(rename = "terminal:data")]
    TerminalData(String),

    /// A run request was handed to the shell.
    #[serde(rename = "run:accepted")]
    RunAccepted { path: String, command: String },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    /// Events of the same kind keep their publish order per session.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::FileRefresh { .. } => "file:refresh",
            ServerEvent::TerminalData(_) => "terminal:data",
            ServerEvent::RunAccepted { .. } => "run:accepted",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// A server event stamped with its per-session sequence number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub seq: u64,
    #[serde(flatten)]
    pub event: ServerEvent,
}

// ============================================================================
// Client -> Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Debounced autosave from the editor.
    #[serde(rename = "file:change")]
    FileChange { path: String, content: String },

    /// Raw keystrokes for the shared shell.
    #[serde(rename = "terminal:write")]
    TerminalWrite(String),

    #[serde(rename = "run:file")]
    RunFile { path: String },
}
