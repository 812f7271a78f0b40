//! Protocol Module
//!
//! Models the native library's command/callback ABI.
//!
//! ## Batch Entry Points
//! - `remove`            - Descriptors: key + CAS
//! - `unlock`            - Descriptors: key + CAS
//! - `make_http_request` - Descriptor: path, method, body, content type, chunked
//!
//! Every entry point takes an opaque cookie and the library later reports one
//! completion [`Event`] per key (or per HTTP chunk) carrying that cookie.
//!
//! ### Status Codes
//! - 0x00: SUCCESS
//! - 0x0b: TEMPORARY_FAILURE
//! - 0x0c: KEY_EXISTS (CAS mismatch)
//! - 0x0d: KEY_NOT_FOUND
//! - ...see [`StatusCode`]

mod command;
mod response;
pub mod params;

pub use command::{HttpCommand, HttpMethod, HttpType, RemoveCommand, UnlockCommand};
pub use params::{KeyBatch, KeyEntry, Params};
pub use response::{Event, HttpResponse, StatusCode};
