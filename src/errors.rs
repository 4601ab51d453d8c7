use std::io;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transfer::TaskId;

/// Longest slice of a response body carried into an error message.
const BODY_PREVIEW_CHARS: usize = 100;

/// Which remote operation produced a failure. Only uploads can be
/// refused with `405`, everything else treats it as a plain HTTP error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Search,
    Upload,
    Delete,
    Download,
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Authentication required, sign in again and retry")]
    AuthRequired,

    #[error("Access denied")]
    Forbidden,

    #[error("Uploads are disabled on this server")]
    UploadDisabled,

    #[error("The server rejected the upload")]
    UploadRejected,

    #[error("Request timed out")]
    Timeout,

    #[error("Network error, check the connection: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Task {0} already registered")]
    DuplicateTask(TaskId),

    #[error("Manager shut down")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Fieldless view of [`TransferError`], used wherever errors are
/// classified rather than displayed (banner policy, task snapshots).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthRequired,
    Forbidden,
    UploadDisabled,
    Timeout,
    Network,
    Http,
    Local,
    Internal,
}

impl TransferError {
    /// Map a non-success status and its body onto the taxonomy.
    pub fn from_status(status: StatusCode, body: &str, operation: Operation) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Self::AuthRequired,
            StatusCode::FORBIDDEN => Self::Forbidden,
            StatusCode::METHOD_NOT_ALLOWED if operation == Operation::Upload => Self::UploadDisabled,
            _ => {
                let body = body.trim();
                let body = if body.is_empty() {
                    status.canonical_reason().unwrap_or_default().to_string()
                } else {
                    body.chars().take(BODY_PREVIEW_CHARS).collect()
                };

                Self::Http {
                    status: status.as_u16(),
                    body,
                }
            }
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRequired => ErrorKind::AuthRequired,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::UploadDisabled => ErrorKind::UploadDisabled,
            Self::Timeout => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Network,
            Self::Http { .. } | Self::UploadRejected | Self::Decode(_) => ErrorKind::Http,
            Self::Io(_) | Self::InvalidFile(_) | Self::InvalidUrl(_) | Self::Config(_) => ErrorKind::Local,
            Self::DuplicateTask(_) | Self::ManagerShutdown | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Timeouts and network failures are worth retrying as-is; the
    /// others need a change on the server or in permissions first.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Network | ErrorKind::Http)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Internal(format!("Failed to parse response: {err}"))
        } else if let Some(local) = local_io_error(&err) {
            Self::Io(local)
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// The first I/O failure in `err`'s source chain that did not come from
/// the socket, e.g. a file read failing while its body streams out.
fn local_io_error(err: &(dyn std::error::Error + 'static)) -> Option<io::Error> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if is_socket_error(io_err.kind()) {
                return None;
            }
            return Some(io::Error::new(io_err.kind(), io_err.to_string()));
        }
        source = cause.source();
    }

    None
}

fn is_socket_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::UnexpectedEof
    )
}

/// Error alias
pub type Result<T, E = TransferError> = std::result::Result<T, E>;
