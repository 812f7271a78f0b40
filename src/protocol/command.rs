//! Command definitions
//!
//! Request descriptors handed to the native library. Each descriptor owns
//! its key/body buffers for the duration of the native call.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{CouchError, Result};

/// Remove a key, optionally guarded by CAS (0 = unconditional)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveCommand {
    pub key: Bytes,
    pub cas: u64,
}

/// Unlock a key previously locked by a get-and-lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockCommand {
    pub key: Bytes,
    pub cas: u64,
}

/// Which HTTP endpoint family a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpType {
    /// Couch view API on the data nodes
    #[default]
    View,

    /// Cluster management REST API
    Management,
}

impl FromStr for HttpType {
    type Err = CouchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "view" => Ok(HttpType::View),
            "management" => Ok(HttpType::Management),
            _ => Err(CouchError::Argument("unsupported request type".to_string())),
        }
    }
}

impl fmt::Display for HttpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpType::View => f.write_str("view"),
            HttpType::Management => f.write_str("management"),
        }
    }
}

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl FromStr for HttpMethod {
    type Err = CouchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(CouchError::Argument("unsupported HTTP method".to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A single HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCommand {
    pub path: String,
    pub method: HttpMethod,
    pub body: Option<Bytes>,
    pub content_type: String,

    /// Deliver the body piecewise instead of buffering it
    pub chunked: bool,
}

impl HttpCommand {
    /// Create a GET request for `path` with the given content type
    pub fn new(path: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: HttpMethod::Get,
            body: None,
            content_type: content_type.into(),
            chunked: false,
        }
    }
}
