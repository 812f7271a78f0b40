//! Response definitions
//!
//! Status codes and completion events delivered by the native library.

use std::fmt;

use bytes::Bytes;

use crate::native::{Cookie, HttpRequestId};

/// Native library status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    AuthError = 0x02,
    DeltaBadValue = 0x03,
    TooBig = 0x04,
    Busy = 0x05,
    Internal = 0x06,
    Invalid = 0x07,
    NoMemory = 0x08,
    Range = 0x09,
    Generic = 0x0a,
    TemporaryFailure = 0x0b,
    KeyExists = 0x0c,
    KeyNotFound = 0x0d,
    NetworkError = 0x10,
    NotMyVbucket = 0x11,
    NotStored = 0x12,
    NotSupported = 0x13,
    UnknownCommand = 0x14,
    UnknownHost = 0x15,
    ProtocolError = 0x16,
    TimedOut = 0x17,
    ConnectError = 0x18,
    BucketNotFound = 0x19,
    ClientNoMemory = 0x1a,
    ClientTemporaryFailure = 0x1b,
    BadHandle = 0x1c,
    ServerBug = 0x1d,
    InvalidHostFormat = 0x1f,
    InvalidChar = 0x20,
    HttpError = 0x21,
}

impl StatusCode {
    /// Numeric code as reported by the library
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// Look up a status by its numeric code
    pub fn from_code(code: u8) -> Option<Self> {
        use StatusCode::*;
        let status = match code {
            0x00 => Success,
            0x02 => AuthError,
            0x03 => DeltaBadValue,
            0x04 => TooBig,
            0x05 => Busy,
            0x06 => Internal,
            0x07 => Invalid,
            0x08 => NoMemory,
            0x09 => Range,
            0x0a => Generic,
            0x0b => TemporaryFailure,
            0x0c => KeyExists,
            0x0d => KeyNotFound,
            0x10 => NetworkError,
            0x11 => NotMyVbucket,
            0x12 => NotStored,
            0x13 => NotSupported,
            0x14 => UnknownCommand,
            0x15 => UnknownHost,
            0x16 => ProtocolError,
            0x17 => TimedOut,
            0x18 => ConnectError,
            0x19 => BucketNotFound,
            0x1a => ClientNoMemory,
            0x1b => ClientTemporaryFailure,
            0x1c => BadHandle,
            0x1d => ServerBug,
            0x1f => InvalidHostFormat,
            0x20 => InvalidChar,
            0x21 => HttpError,
            _ => return None,
        };
        Some(status)
    }

    /// Human readable description of the status
    pub fn description(self) -> &'static str {
        use StatusCode::*;
        match self {
            Success => "Success",
            AuthError => "Authentication error",
            DeltaBadValue => "Not a number",
            TooBig => "Object too big",
            Busy => "Too busy. Try again later",
            Internal => "Internal error",
            Invalid => "Invalid arguments",
            NoMemory => "Out of memory",
            Range => "Invalid range",
            Generic => "Generic error",
            TemporaryFailure => "Temporary failure. Try again later",
            KeyExists => "Key exists (with a different CAS value)",
            KeyNotFound => "No such key",
            NetworkError => "Network error",
            NotMyVbucket => "The vbucket is not located on this server",
            NotStored => "Not stored",
            NotSupported => "Not supported",
            UnknownCommand => "Unknown command",
            UnknownHost => "Unknown host",
            ProtocolError => "Protocol error",
            TimedOut => "Operation timed out",
            ConnectError => "Connection failure",
            BucketNotFound => "No such bucket",
            ClientNoMemory => "Out of memory on the client",
            ClientTemporaryFailure => "Temporary failure on the client. Try again later",
            BadHandle => "Invalid handle type",
            ServerBug => "Internal error in the server",
            InvalidHostFormat => "The host format is invalid",
            InvalidChar => "Invalid character",
            HttpError => "HTTP Error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.description(), self.code())
    }
}

/// One HTTP response (or response chunk) as seen by a callback
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// HTTP status, 0 when the transport never got that far
    pub status: u16,

    /// Requested path
    pub path: String,

    /// Raw header pairs in arrival order
    pub headers: Vec<(String, String)>,

    /// Body bytes for this chunk, if any
    pub body: Option<Bytes>,
}

/// A completion event delivered by the event loop
#[derive(Debug, Clone)]
pub enum Event {
    /// One key of a remove batch finished
    Remove {
        cookie: Cookie,
        status: StatusCode,
        key: Bytes,
    },

    /// One key of an unlock batch finished
    Unlock {
        cookie: Cookie,
        status: StatusCode,
        key: Bytes,
    },

    /// A chunk of a streaming HTTP response
    HttpData {
        cookie: Cookie,
        request: HttpRequestId,
        status: StatusCode,
        response: HttpResponse,
    },

    /// Final event of an HTTP request
    HttpComplete {
        cookie: Cookie,
        request: HttpRequestId,
        status: StatusCode,
        response: HttpResponse,
    },

    /// Connection-level failure not tied to any request
    Error { status: StatusCode, message: String },
}

impl Event {
    /// Cookie of the request this event belongs to
    pub fn cookie(&self) -> Option<Cookie> {
        match self {
            Event::Remove { cookie, .. }
            | Event::Unlock { cookie, .. }
            | Event::HttpData { cookie, .. }
            | Event::HttpComplete { cookie, .. } => Some(*cookie),
            Event::Error { .. } => None,
        }
    }
}
