//! # couchlink
//!
//! Client-side bindings for batch key operations and HTTP requests against
//! a Couchbase-style cluster, layered over a native client library:
//! - Batch delete and unlock with optional per-key CAS
//! - Blocking mode with aggregated results, asynchronous mode with callbacks
//! - Chunked and plain view/management HTTP requests with pause/resume
//! - An in-process simulated cluster for tests and the CLI
//!
//! ## Architecture Overview
//!
//! ```text
//!  caller                        couchlink                      native library
//!  ──────                        ─────────                      ──────────────
//!  delete / unlock ──▶ KeyBatch ─▶ params ─▶ slot table ──cookie──▶ remove / unlock
//!  HttpRequest::perform ───────────────────▶ slot table ──cookie──▶ make_http_request
//!
//!                                 dispatcher ◀──── events ──────── wait()
//!                                     │
//!              ┌──────────────────────┴──────────────────────┐
//!              ▼                                             ▼
//!       blocking: Outcome                          async: callbacks per key,
//!       (first error raised                        per chunk; PendingBatch
//!        once batch drained)                       tracks what is left
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod native;
pub mod context;
pub mod result;
pub mod bucket;
pub mod http;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CouchError, LibraryError, Result};
pub use config::Config;
pub use bucket::Bucket;
pub use http::{HttpOptions, HttpReply, HttpRequest, HttpResult, PauseHandle};
pub use native::{MockCluster, MockRoute, MockTransport, Transport};
pub use protocol::{HttpMethod, HttpType, KeyBatch, StatusCode};
pub use result::{OperationKind, OperationResult, Outcome, PendingBatch, Reply};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of couchlink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
