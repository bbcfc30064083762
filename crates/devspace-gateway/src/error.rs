use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid path: {0}")]
    PathInvalid(String),

    #[error("Path is outside the workspace root")]
    PathEscape,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot read content of a directory: {0}")]
    IsADirectory(String),

    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    #[error("Destination already exists: {0}")]
    AlreadyExists(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Failed to spawn shell process: {0}")]
    ProcessSpawn(String),

    #[error("Archive too large: {size} bytes exceeds limit of {limit} bytes")]
    ArchiveTooLarge { size: u64, limit: u64 },

    #[error("Archive has too many entries: {entries} exceeds limit of {limit}")]
    ArchiveTooManyEntries { entries: u64, limit: u64 },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::PathInvalid(_) => StatusCode::BAD_REQUEST,
            GatewayError::PathEscape => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::IsADirectory(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotADirectory(_) => StatusCode::BAD_REQUEST,
            GatewayError::AlreadyExists(_) => StatusCode::CONFLICT,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::ProcessSpawn(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ArchiveTooLarge { .. } | GatewayError::ArchiveTooManyEntries { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            GatewayError::Watch(_) | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::PathInvalid(_) => "PATH_INVALID",
            GatewayError::PathEscape => "PATH_ESCAPE",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::IsADirectory(_) => "IS_A_DIRECTORY",
            GatewayError::NotADirectory(_) => "NOT_A_DIRECTORY",
            GatewayError::AlreadyExists(_) => "ALREADY_EXISTS",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::ProcessSpawn(_) => "PROCESS_SPAWN_FAILURE",
            GatewayError::ArchiveTooLarge { .. } => "ARCHIVE_TOO_LARGE",
            GatewayError::ArchiveTooManyEntries { .. } => "ARCHIVE_TOO_MANY_ENTRIES",
            GatewayError::Watch(_) => "WATCH_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }

    /// Map an IO error for `path` to the matching client error where there is one.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => GatewayError::NotFound(path.to_string()),
            std::io::ErrorKind::NotADirectory => GatewayError::NotADirectory(path.to_string()),
            std::io::ErrorKind::IsADirectory => GatewayError::IsADirectory(path.to_string()),
            _ => GatewayError::Io(err),
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        GatewayError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    code: &'static str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = ErrorResponse {
            ok: false,
            error: self.to_string(),
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::PathEscape.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::NotFound("/a".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::IsADirectory("/a".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::AlreadyExists("/a".into()).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_from_io_maps_client_errors() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            GatewayError::from_io(err, "/x"),
            GatewayError::NotFound(p) if p == "/x"
        ));

        let err = std::io::Error::new(std::io::ErrorKind::NotADirectory, "through a file");
        assert!(matches!(
            GatewayError::from_io(err, "/f.txt/x"),
            GatewayError::NotADirectory(p) if p == "/f.txt/x"
        ));

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(GatewayError::from_io(err, "/x"), GatewayError::Io(_)));
    }
}
