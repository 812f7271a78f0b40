//! Error types for couchlink
//!
//! Provides a unified error type for all operations.

use bytes::Bytes;
use thiserror::Error;

use crate::protocol::StatusCode;
use crate::result::OperationKind;

/// Result type alias using CouchError
pub type Result<T> = std::result::Result<T, CouchError>;

/// Unified error type for couchlink operations
#[derive(Debug, Clone, Error)]
pub enum CouchError {
    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Connect(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Argument(String),

    // -------------------------------------------------------------------------
    // Native Library Errors
    // -------------------------------------------------------------------------
    #[error(transparent)]
    Library(#[from] LibraryError),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fixture error: {0}")]
    Fixture(String),
}

impl CouchError {
    /// Error raised for any operation on a torn-down handle
    pub fn closed() -> Self {
        CouchError::Connect("closed connection".to_string())
    }

    /// Native status behind this error, if it came from the library
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CouchError::Library(e) => Some(e.status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::KeyNotFound)
    }

    pub fn is_key_exists(&self) -> bool {
        self.status() == Some(StatusCode::KeyExists)
    }

    pub fn is_temporary_failure(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::TemporaryFailure | StatusCode::ClientTemporaryFailure)
        )
    }

    /// Tag a library error with the operation that produced it
    pub fn with_operation(self, operation: OperationKind) -> Self {
        match self {
            CouchError::Library(mut e) => {
                e.operation = Some(operation);
                CouchError::Library(e)
            }
            other => other,
        }
    }
}

/// A non-success status reported by the native library
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.render())]
pub struct LibraryError {
    pub status: StatusCode,
    pub message: String,
    pub key: Option<Bytes>,
    pub operation: Option<OperationKind>,

    /// HTTP status for view/management requests
    pub http_status: Option<u16>,
}

impl LibraryError {
    /// `message: key="k" (status) [HTTP n]`, optional parts omitted
    fn render(&self) -> String {
        let mut text = format!("{}:", self.message);
        if let Some(key) = &self.key {
            text.push_str(&format!(" key=\"{}\"", String::from_utf8_lossy(key)));
        }
        text.push_str(&format!(" ({})", self.status));
        if let Some(status) = self.http_status {
            text.push_str(&format!(" [HTTP {}]", status));
        }
        text
    }
}

/// Convert a native status into an error, `None` on success
pub fn check_status(status: StatusCode, message: &str, key: Option<&Bytes>) -> Option<CouchError> {
    if status.is_success() {
        return None;
    }
    Some(CouchError::Library(LibraryError {
        status,
        message: message.to_string(),
        key: key.cloned(),
        operation: None,
        http_status: None,
    }))
}

/// Like [`check_status`] but also fails on a non-2xx HTTP status
pub fn check_http_status(
    status: StatusCode,
    message: &str,
    key: Option<&Bytes>,
    http_status: u16,
) -> Option<CouchError> {
    let http_ok = http_status == 0 || http_status / 100 == 2;
    if status.is_success() && http_ok {
        return None;
    }
    let status = if status.is_success() {
        StatusCode::HttpError
    } else {
        status
    };
    Some(CouchError::Library(LibraryError {
        status,
        message: message.to_string(),
        key: key.cloned(),
        operation: None,
        http_status: (http_status != 0).then_some(http_status),
    }))
}
