use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the request plane.
#[derive(Error, Debug)]
pub enum FileServerError {
    #[error("Not found")]
    NotFound,

    #[error("Path is outside root directory")]
    PathTraversal,

    #[error("Invalid ID")]
    InvalidId,

    #[error("Invalid name")]
    InvalidName,

    #[error("Invalid target directory")]
    InvalidTargetDirectory,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid action")]
    InvalidAction,

    #[error("No files uploaded")]
    NoFiles,

    #[error("{0} already exists")]
    Conflict(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedMediaType(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Upload too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Failed to parse form: {0}")]
    Multipart(#[from] MultipartError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal fault whose details must not reach the client.
    #[error("Internal Server Error")]
    Internal,
}

impl FileServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            FileServerError::NotFound => StatusCode::NOT_FOUND,
            FileServerError::PathTraversal => StatusCode::FORBIDDEN,
            FileServerError::InvalidId
            | FileServerError::InvalidName
            | FileServerError::InvalidTargetDirectory
            | FileServerError::InvalidRequest(_)
            | FileServerError::InvalidAction
            | FileServerError::NoFiles => StatusCode::BAD_REQUEST,
            FileServerError::Conflict(_) => StatusCode::CONFLICT,
            FileServerError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            FileServerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            FileServerError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            FileServerError::Multipart(err) => match err.status() {
                StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            },
            FileServerError::Io(_) | FileServerError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            FileServerError::NotFound => "NOT_FOUND",
            FileServerError::PathTraversal => "PATH_TRAVERSAL",
            FileServerError::InvalidId => "INVALID_ID",
            FileServerError::InvalidName => "INVALID_NAME",
            FileServerError::InvalidTargetDirectory => "INVALID_TARGET_DIRECTORY",
            FileServerError::InvalidRequest(_) => "INVALID_REQUEST",
            FileServerError::InvalidAction => "INVALID_ACTION",
            FileServerError::NoFiles => "NO_FILES",
            FileServerError::Conflict(_) => "CONFLICT",
            FileServerError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            FileServerError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            FileServerError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            FileServerError::Multipart(_) => "INVALID_FORM",
            FileServerError::Io(_) => "IO_ERROR",
            FileServerError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether the error points at a server-side fault rather than a bad request.
    pub fn is_internal(&self) -> bool {
        self.status().is_server_error()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for FileServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

/// Errors returned by the control plane. These never abort the caller; they
/// are folded into a `ControlResponse`.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Please choose a directory to serve")]
    EmptyDirectory,

    #[error("Directory does not exist or is not accessible: {path}: {source}")]
    DirectoryNotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Selected path is not a directory: {0}")]
    NotADirectory(String),

    #[error("Invalid IP address: {0:?}")]
    InvalidAddress(String),

    #[error("Port must be an integer between 1 and 65535, got {0:?}")]
    InvalidPort(String),

    #[error(
        "Port {port} is already in use or cannot be bound on {address}: {source}. \
         Try another port or check your firewall settings."
    )]
    Bind {
        address: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Error while stopping server: {0}")]
    Shutdown(String),
}
