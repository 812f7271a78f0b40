//! Configuration for couchlink
//!
//! Centralized configuration with sensible defaults.

use bytes::Bytes;

use crate::protocol::HttpType;

/// Main configuration for a bucket handle
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Dispatch Configuration
    // -------------------------------------------------------------------------
    /// Start in asynchronous mode: operations return immediately and
    /// results arrive through callbacks while the event loop runs
    pub async_mode: bool,

    /// Default for batches that don't say whether a missing key is an error
    pub quiet: bool,

    /// Payload bytes scheduled in asynchronous mode before the dispatcher
    /// runs the event loop on its own (0 disables)
    pub flush_threshold: usize,

    // -------------------------------------------------------------------------
    // Key Configuration
    // -------------------------------------------------------------------------
    /// Prepended to every key sent to the cluster, stripped from replies
    pub key_prefix: Option<Bytes>,

    // -------------------------------------------------------------------------
    // HTTP Configuration
    // -------------------------------------------------------------------------
    /// Content type for HTTP requests that don't set one
    pub default_content_type: String,

    /// Endpoint family for HTTP requests that don't set one
    pub default_http_type: HttpType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_mode: false,
            quiet: false,
            flush_threshold: 0,
            key_prefix: None,
            default_content_type: "application/json".to_string(),
            default_http_type: HttpType::View,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Key prefix as a byte slice, if one is set
    pub fn prefix(&self) -> Option<&[u8]> {
        self.key_prefix.as_deref()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start in asynchronous mode
    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.config.async_mode = enabled;
        self
    }

    /// Set the default quiet flag
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.config.quiet = quiet;
        self
    }

    /// Set the asynchronous flush threshold (in bytes)
    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.config.flush_threshold = bytes;
        self
    }

    /// Set the key prefix
    pub fn key_prefix(mut self, prefix: impl Into<Bytes>) -> Self {
        self.config.key_prefix = Some(prefix.into());
        self
    }

    /// Set the default HTTP content type
    pub fn default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.config.default_content_type = content_type.into();
        self
    }

    /// Set the default HTTP endpoint family
    pub fn default_http_type(mut self, kind: HttpType) -> Self {
        self.config.default_http_type = kind;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
