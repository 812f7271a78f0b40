//! HTTP requests
//!
//! View and management API calls routed through the native library.
//!
//! ## Lifecycle
//! ```text
//! constructed ──perform──▶ running ──final event──▶ completed
//!                             │
//!                             └──drop / cancel──▶ canceled
//! ```
//!
//! A chunked request hands every body piece to the body callback as it
//! arrives and finishes with a `completed` reply; a plain request invokes
//! the callback once with the whole body. Dropping a request that is still
//! running cancels it natively, and its callbacks never run again.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::bucket::{Bucket, Session, WeakBucket};
use crate::context::HttpContext;
use crate::error::{CouchError, Result};
use crate::protocol::{HttpCommand, HttpMethod, HttpType};

/// Response headers; repeated names keep every value in arrival order
pub type Headers = BTreeMap<String, Vec<String>>;

/// Callback receiving body chunks or the final reply
pub type BodyCallback = Box<dyn FnMut(HttpReply)>;

/// Full view of one HTTP callback invocation
#[derive(Debug, Clone)]
pub struct HttpResult {
    pub path: String,
    pub value: Option<Bytes>,
    pub status: u16,

    /// Headers accumulated so far
    pub headers: Headers,

    /// `false` for intermediate chunks
    pub completed: bool,
    pub error: Option<CouchError>,
}

impl HttpResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// What the body callback (and a blocking perform) receives
#[derive(Debug, Clone)]
pub enum HttpReply {
    /// Just the body bytes
    Body(Option<Bytes>),

    /// Body plus status, headers, completion flag and error
    Extended(HttpResult),
}

impl HttpReply {
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            HttpReply::Body(body) => body.as_ref(),
            HttpReply::Extended(result) => result.value.as_ref(),
        }
    }

    pub fn as_extended(&self) -> Option<&HttpResult> {
        match self {
            HttpReply::Extended(result) => Some(result),
            HttpReply::Body(_) => None,
        }
    }
}

/// Options for [`HttpRequest::new`]
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// Hand callbacks an [`HttpResult`] instead of bare bytes
    pub extended: bool,

    /// Stream the body in pieces
    pub chunked: bool,

    /// Endpoint family, bucket default when unset
    pub kind: Option<HttpType>,
    pub method: HttpMethod,
    pub body: Option<Bytes>,

    /// Content type, bucket default when unset
    pub content_type: Option<String>,
}

impl HttpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    pub fn chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    pub fn kind(mut self, kind: HttpType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Stops the owning bucket's event loop from inside a callback
#[derive(Clone)]
pub struct PauseHandle {
    session: Rc<Session>,
}

impl PauseHandle {
    pub fn pause(&self) {
        self.session.request_stop();
    }
}

/// One view or management request
pub struct HttpRequest {
    bucket: WeakBucket,
    kind: HttpType,
    command: HttpCommand,
    context: Rc<RefCell<HttpContext>>,
}

impl HttpRequest {
    /// Build a request against `bucket`; nothing is sent until [`perform`](Self::perform)
    pub fn new(bucket: &Bucket, path: impl Into<String>, options: HttpOptions) -> Self {
        let config = bucket.config();
        let mut command = HttpCommand::new(
            path,
            options
                .content_type
                .unwrap_or_else(|| config.default_content_type.clone()),
        );
        command.method = options.method;
        command.body = options.body;
        command.chunked = options.chunked;

        Self {
            bucket: bucket.downgrade(),
            kind: options.kind.unwrap_or(config.default_http_type),
            command,
            context: Rc::new(RefCell::new(HttpContext::new(options.extended, None))),
        }
    }

    pub fn path(&self) -> &str {
        &self.command.path
    }

    pub fn is_chunked(&self) -> bool {
        self.command.chunked
    }

    pub fn is_extended(&self) -> bool {
        self.context.borrow().extended
    }

    pub fn method(&self) -> HttpMethod {
        self.command.method
    }

    pub fn kind(&self) -> HttpType {
        self.kind
    }

    pub fn command(&self) -> &HttpCommand {
        &self.command
    }

    pub fn is_running(&self) -> bool {
        self.context.borrow().running
    }

    pub fn is_completed(&self) -> bool {
        self.context.borrow().completed
    }

    pub fn is_canceled(&self) -> bool {
        self.context.borrow().canceled
    }

    /// Set the body callback, returning the previous one
    pub fn on_body<F>(&mut self, callback: F) -> Option<BodyCallback>
    where
        F: FnMut(HttpReply) + 'static,
    {
        self.context.borrow_mut().on_body.replace(Box::new(callback))
    }

    pub(crate) fn set_on_body(&mut self, callback: Option<BodyCallback>) {
        self.context.borrow_mut().on_body = callback;
    }

    /// Send the request.
    ///
    /// Blocking mode drives the event loop and returns the final reply, the
    /// request's error, or `None` if a callback paused the loop first.
    /// Asynchronous mode returns `None` at once.
    pub fn perform(&mut self) -> Result<Option<HttpReply>> {
        let bucket = self.bucket.upgrade().ok_or_else(CouchError::closed)?;
        if !bucket.is_connected() {
            return Err(CouchError::closed());
        }
        {
            let ctx = self.context.borrow();
            if ctx.running && !ctx.completed {
                return Err(CouchError::Argument(
                    "request is already running".to_string(),
                ));
            }
        }
        self.context.borrow_mut().reset();

        bucket.schedule_http(&self.context, self.kind, &self.command)?;
        if bucket.is_async() {
            return Ok(None);
        }
        bucket.drive()?;
        self.collect()
    }

    /// Send the request with a callback used for this run only
    pub fn perform_with<F>(&mut self, callback: F) -> Result<Option<HttpReply>>
    where
        F: FnMut(HttpReply) + 'static,
    {
        self.context.borrow_mut().override_callback = Some(Box::new(callback));
        let result = self.perform();
        if result.is_err() {
            self.context.borrow_mut().override_callback = None;
        }
        result
    }

    /// Stop the owning bucket's event loop after the current event
    pub fn pause(&self) {
        if let Some(session) = self.bucket.session() {
            session.request_stop();
        }
    }

    /// Handle that pauses this request's event loop; safe to move into a callback
    pub fn pause_handle(&self) -> Option<PauseHandle> {
        self.bucket.session().map(|session| PauseHandle { session })
    }

    /// Continue a paused request, or start one that never ran
    pub fn resume(&mut self) -> Result<Option<HttpReply>> {
        let (running, completed) = {
            let ctx = self.context.borrow();
            (ctx.running, ctx.completed)
        };
        if completed {
            return self.collect();
        }
        if running {
            let bucket = self.bucket.upgrade().ok_or_else(CouchError::closed)?;
            bucket.drive()?;
            return self.collect();
        }
        self.perform()
    }

    /// Cancel a running request; its callbacks never run again
    pub fn cancel(&mut self) {
        let pending = {
            let mut ctx = self.context.borrow_mut();
            let pending = if ctx.running && !ctx.completed {
                ctx.cookie.zip(ctx.request)
            } else {
                None
            };
            if pending.is_some() {
                ctx.canceled = true;
                ctx.running = false;
                ctx.on_body = None;
                ctx.override_callback = None;
            }
            pending
        };

        if let Some((cookie, request)) = pending {
            tracing::debug!("Canceling HTTP request {:?} for {}", request, self.command.path);
            if let Some(bucket) = self.bucket.upgrade() {
                bucket.cancel_http(cookie, request);
            }
        }
    }

    fn collect(&mut self) -> Result<Option<HttpReply>> {
        let mut ctx = self.context.borrow_mut();
        if !ctx.completed {
            return Ok(None);
        }
        ctx.override_callback = None;
        if let Some(error) = ctx.error.take() {
            return Err(error);
        }
        Ok(ctx.reply.take())
    }

    /// `#<CouchRequest:0x.. "path" chunked:false>`
    pub fn inspect(&self) -> String {
        format!(
            "#<CouchRequest:{:p} \"{}\" chunked:{}>",
            Rc::as_ptr(&self.context),
            self.command.path,
            self.command.chunked
        )
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

impl Drop for HttpRequest {
    fn drop(&mut self) {
        self.cancel();
    }
}
