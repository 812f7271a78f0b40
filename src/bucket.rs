//! Bucket Module
//!
//! The connected session handle and the dispatcher that routes native
//! completion events back to the contexts that are waiting for them.
//!
//! ## Responsibilities
//! - Build descriptor arrays and submit them as one native batch
//! - Own the slot table of in-flight contexts (the cookie is the slot index)
//! - Blocking mode: drive the event loop and aggregate per-key results
//! - Asynchronous mode: return at once; callbacks fire while the loop runs
//!
//! ## Concurrency Model: single event loop
//!
//! Every callback runs on the thread that called [`Bucket::wait`] (or a
//! blocking operation), from inside the native library's loop. The bucket
//! is therefore `!Send` and uses `Rc`/`RefCell` rather than locks. While
//! the loop runs the bucket is borrowed, and operations issued from inside
//! a callback fail with an argument error instead of re-entering it.

use std::cell::{Cell, RefCell, RefMut};
use std::rc::{Rc, Weak};

use slab::Slab;

use crate::config::Config;
use crate::context::{complete_key, http_complete, http_data, BatchContext, HttpContext, Slot};
use crate::error::{check_status, CouchError, LibraryError, Result};
use crate::http::{BodyCallback, HttpOptions, HttpRequest};
use crate::native::{Cookie, EventHandler, HttpRequestId, LoopControl, Transport};
use crate::protocol::params::{build_remove, build_unlock, strip_prefix, Params};
use crate::protocol::{Event, HttpCommand, HttpType, KeyBatch, StatusCode};
use crate::result::{OperationKind, Outcome, PendingBatch, Reply, ResultCallback};

/// Session state readable while the event loop holds the bucket
#[derive(Debug)]
pub(crate) struct Session {
    config: Config,
    async_mode: Cell<bool>,
    quiet: Cell<bool>,
    connected: Cell<bool>,

    /// Inside `run`
    running: Cell<bool>,

    /// A callback asked the loop to stop
    stop: Cell<bool>,

    /// Cancellations issued while the loop held the bucket
    cancels: RefCell<Vec<(Cookie, HttpRequestId)>>,

    /// Slot count as of the last event, readable while the loop runs
    in_flight: Cell<usize>,
}

impl Session {
    fn new(config: Config) -> Self {
        Self {
            async_mode: Cell::new(config.async_mode),
            quiet: Cell::new(config.quiet),
            connected: Cell::new(true),
            running: Cell::new(false),
            stop: Cell::new(false),
            cancels: RefCell::new(Vec::new()),
            in_flight: Cell::new(0),
            config,
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stop.set(true);
    }

    fn defer_cancel(&self, cookie: Cookie, request: HttpRequestId) {
        self.cancels.borrow_mut().push((cookie, request));
    }

    fn take_cancels(&self) -> Vec<(Cookie, HttpRequestId)> {
        std::mem::take(&mut *self.cancels.borrow_mut())
    }
}

pub(crate) struct BucketInner {
    /// `None` once disconnected
    transport: Option<Box<dyn Transport>>,
    slots: Slab<Slot>,

    /// Payload bytes scheduled since the loop last ran
    nbytes: usize,

    /// Connection-level error waiting to be raised
    error: Option<CouchError>,
}

impl BucketInner {
    /// Run the native event loop once through
    fn drive(&mut self, session: &Session) {
        let BucketInner {
            transport,
            slots,
            error,
            nbytes,
        } = self;
        let Some(transport) = transport.as_mut() else {
            return;
        };

        session.stop.set(false);
        for (cookie, request) in session.take_cancels() {
            transport.cancel_http_request(request);
            release_http(slots, cookie, request);
        }
        session.in_flight.set(slots.len());

        let mut dispatcher = Dispatcher {
            slots,
            error,
            session,
        };
        transport.wait(&mut dispatcher);
        *nbytes = 0;

        let outstanding = transport.outstanding();
        if outstanding > 0 {
            tracing::debug!("Event loop paused with {} native operations queued", outstanding);
        }
    }
}

/// Remove an HTTP slot if it still belongs to `request`
fn release_http(slots: &mut Slab<Slot>, cookie: Cookie, request: HttpRequestId) {
    let owned = matches!(
        slots.get(cookie.0),
        Some(Slot::Http(ctx)) if ctx.borrow().request == Some(request)
    );
    if owned {
        slots.remove(cookie.0);
    }
}

/// Routes completion events to their contexts
struct Dispatcher<'a> {
    slots: &'a mut Slab<Slot>,
    error: &'a mut Option<CouchError>,
    session: &'a Session,
}

impl Dispatcher<'_> {
    fn dispatch(&mut self, event: Event, control: &mut LoopControl) {
        match event {
            Event::Error { status, message } => {
                tracing::warn!("Connection error: {} ({})", message, status);
                if self.error.is_none() {
                    *self.error = check_status(status, &message, None);
                }
            }
            Event::Remove { cookie, status, key } | Event::Unlock { cookie, status, key } => {
                let context = match self.slots.get(cookie.0) {
                    Some(Slot::Batch(ctx)) => Rc::clone(ctx),
                    _ => {
                        tracing::trace!("Completion for unknown cookie {:?} ignored", cookie);
                        return;
                    }
                };
                let key = strip_prefix(self.session.config.prefix(), key);
                tracing::trace!(
                    "Key {:?} completed with {}",
                    String::from_utf8_lossy(&key),
                    status
                );
                if complete_key(&context, status, key) {
                    self.slots.remove(cookie.0);
                }
            }
            Event::HttpData {
                cookie,
                request,
                status,
                response,
            } => {
                let Some(context) = self.http_context(cookie) else {
                    return;
                };
                tracing::trace!(
                    "HTTP chunk for {} ({} bytes)",
                    response.path,
                    response.body.as_ref().map_or(0, |b| b.len())
                );
                if http_data(&context, request, status, &response, control) {
                    self.slots.remove(cookie.0);
                }
            }
            Event::HttpComplete {
                cookie,
                status,
                response,
                ..
            } => {
                let Some(context) = self.http_context(cookie) else {
                    return;
                };
                tracing::trace!(
                    "HTTP request {} completed with status {}",
                    response.path,
                    response.status
                );
                http_complete(&context, status, &response);
                self.slots.remove(cookie.0);
            }
        }
    }

    fn http_context(&self, cookie: Cookie) -> Option<Rc<RefCell<HttpContext>>> {
        match self.slots.get(cookie.0) {
            Some(Slot::Http(ctx)) => Some(Rc::clone(ctx)),
            _ => None,
        }
    }

    /// Apply pauses and cancellations requested by callbacks
    fn apply_signals(&mut self, control: &mut LoopControl) {
        if self.session.stop.replace(false) {
            control.stop();
        }
        for (cookie, request) in self.session.take_cancels() {
            control.cancel(request);
            release_http(self.slots, cookie, request);
        }
    }
}

impl EventHandler for Dispatcher<'_> {
    fn on_event(&mut self, event: Event, control: &mut LoopControl) {
        self.dispatch(event, control);
        self.apply_signals(control);
        self.session.in_flight.set(self.slots.len());
    }
}

/// A connected session to one bucket
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Bucket {
    inner: Rc<RefCell<BucketInner>>,
    session: Rc<Session>,
}

/// Non-owning reference held by HTTP requests
#[derive(Clone)]
pub(crate) struct WeakBucket {
    inner: Weak<RefCell<BucketInner>>,
    session: Weak<Session>,
}

impl WeakBucket {
    pub(crate) fn upgrade(&self) -> Option<Bucket> {
        Some(Bucket {
            inner: self.inner.upgrade()?,
            session: self.session.upgrade()?,
        })
    }

    pub(crate) fn session(&self) -> Option<Rc<Session>> {
        self.session.upgrade()
    }
}

impl Bucket {
    /// Wrap a connected native handle
    pub fn connect<T>(config: Config, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        tracing::debug!(
            "Bucket connected (async={}, quiet={})",
            config.async_mode,
            config.quiet
        );
        let inner = BucketInner {
            transport: Some(Box::new(transport)),
            slots: Slab::new(),
            nbytes: 0,
            error: None,
        };
        Self {
            inner: Rc::new(RefCell::new(inner)),
            session: Rc::new(Session::new(config)),
        }
    }

    fn inner_mut(&self) -> Result<RefMut<'_, BucketInner>> {
        if !self.session.connected.get() {
            return Err(CouchError::closed());
        }
        self.inner.try_borrow_mut().map_err(|_| {
            CouchError::Argument("bucket is busy running the event loop".to_string())
        })
    }

    pub(crate) fn downgrade(&self) -> WeakBucket {
        WeakBucket {
            inner: Rc::downgrade(&self.inner),
            session: Rc::downgrade(&self.session),
        }
    }

    // =========================================================================
    // Session State
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.session.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.connected.get()
    }

    pub fn is_async(&self) -> bool {
        self.session.async_mode.get()
    }

    pub fn set_async(&self, enabled: bool) {
        self.session.async_mode.set(enabled);
    }

    /// Default quiet flag for batches that don't set one
    pub fn quiet(&self) -> bool {
        self.session.quiet.get()
    }

    pub fn set_quiet(&self, quiet: bool) {
        self.session.quiet.set(quiet);
    }

    /// Contexts still waiting for completions. Inside a callback this is
    /// the count as of the event being dispatched.
    pub fn in_flight(&self) -> usize {
        match self.inner.try_borrow() {
            Ok(inner) => inner.slots.len(),
            Err(_) => self.session.in_flight.get(),
        }
    }

    /// Tear down the native handle. Outstanding contexts are released and
    /// every later operation fails with a connect error.
    pub fn disconnect(&self) -> Result<()> {
        let slots: Vec<Slot> = {
            let mut inner = self.inner_mut()?;
            tracing::debug!("Bucket disconnected with {} contexts in flight", inner.slots.len());
            inner.transport = None;
            inner.slots.drain().collect()
        };
        self.session.connected.set(false);
        self.session.in_flight.set(0);

        // Callbacks are dropped here, after every borrow is released
        for slot in slots {
            match slot {
                Slot::Batch(ctx) => {
                    let callback = ctx.borrow_mut().abandon();
                    drop(callback);
                }
                Slot::Http(ctx) => {
                    let callbacks = ctx.borrow_mut().abandon();
                    drop(callbacks);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Key-Value Operations
    // =========================================================================

    /// Delete every key in `batch`.
    ///
    /// Blocking mode returns [`Reply::Completed`]: a scalar for one key, a
    /// key => success map otherwise. The first per-key error is raised once
    /// the whole batch has completed; with `quiet` a missing key is just
    /// `false`. Asynchronous mode returns [`Reply::Scheduled`] and invokes
    /// `callback` once per key while the loop runs.
    pub fn delete(&self, batch: &KeyBatch, callback: Option<ResultCallback>) -> Result<Reply> {
        self.batch(OperationKind::Delete, batch, callback)
    }

    /// Unlock every key in `batch` using its CAS; same contract as [`delete`](Self::delete)
    pub fn unlock(&self, batch: &KeyBatch, callback: Option<ResultCallback>) -> Result<Reply> {
        self.batch(OperationKind::Unlock, batch, callback)
    }

    fn batch(
        &self,
        operation: OperationKind,
        batch: &KeyBatch,
        callback: Option<ResultCallback>,
    ) -> Result<Reply> {
        let mut inner = self.inner_mut()?;
        let async_mode = self.is_async();
        if !async_mode && callback.is_some() {
            return Err(CouchError::Argument(
                "synchronous mode doesn't support callbacks".to_string(),
            ));
        }

        let prefix = self.session.config.prefix();
        let quiet = self.quiet();
        let (context, count, npayload) = match operation {
            OperationKind::Delete => {
                let params = build_remove(batch, prefix, quiet)?;
                submit(
                    &mut inner,
                    async_mode,
                    operation,
                    params,
                    callback,
                    |t, cookie, commands| t.remove(cookie, commands),
                )?
            }
            OperationKind::Unlock => {
                let params = build_unlock(batch, prefix, quiet)?;
                submit(
                    &mut inner,
                    async_mode,
                    operation,
                    params,
                    callback,
                    |t, cookie, commands| t.unlock(cookie, commands),
                )?
            }
            OperationKind::HttpRequest => {
                return Err(CouchError::Argument(
                    "HTTP requests are not key batches".to_string(),
                ))
            }
        };

        if async_mode {
            inner.nbytes += npayload;
            let threshold = self.session.config.flush_threshold;
            if threshold != 0 && inner.nbytes > threshold {
                tracing::debug!("Flush threshold reached ({} bytes), running loop", inner.nbytes);
                inner.drive(&self.session);
            }
            return Ok(Reply::Scheduled(PendingBatch::new(context)));
        }

        if context.borrow().pending > 0 {
            inner.drive(&self.session);
        }

        let mut ctx = context.borrow_mut();
        if ctx.pending > 0 {
            tracing::warn!(
                "Event loop stopped with {} of {} {} completions outstanding",
                ctx.pending,
                count,
                operation
            );
        }
        if let Some(error) = ctx.first_error.take() {
            return Err(error);
        }
        if let Some(error) = inner.error.take() {
            return Err(error);
        }

        let results = ctx.take_results();
        if count > 1 {
            Ok(Reply::Completed(Outcome::Batch(results)))
        } else {
            let ok = results.into_values().next().unwrap_or(false);
            Ok(Reply::Completed(Outcome::Single(ok)))
        }
    }

    // =========================================================================
    // HTTP
    // =========================================================================

    /// Build an HTTP request against this bucket
    pub fn make_http_request(
        &self,
        path: impl Into<String>,
        options: HttpOptions,
        on_body: Option<BodyCallback>,
    ) -> HttpRequest {
        let mut request = HttpRequest::new(self, path, options);
        request.set_on_body(on_body);
        request
    }

    pub(crate) fn schedule_http(
        &self,
        context: &Rc<RefCell<HttpContext>>,
        kind: HttpType,
        command: &HttpCommand,
    ) -> Result<()> {
        let mut inner = self.inner_mut()?;
        let inner = &mut *inner;
        let transport = inner.transport.as_mut().ok_or_else(CouchError::closed)?;
        let entry = inner.slots.vacant_entry();
        let cookie = Cookie(entry.key());
        entry.insert(Slot::Http(Rc::clone(context)));

        let scheduled = transport.make_http_request(cookie, kind, command);
        match scheduled {
            Ok(request) => {
                tracing::debug!(
                    "Scheduled {} {} request {} (chunked={})",
                    kind,
                    command.method,
                    command.path,
                    command.chunked
                );
                let mut ctx = context.borrow_mut();
                ctx.cookie = Some(cookie);
                ctx.request = Some(request);
                ctx.running = true;
                Ok(())
            }
            Err(status) => {
                inner.slots.remove(cookie.0);
                let mut error = schedule_error(status, "failed to schedule document request");
                if let CouchError::Library(e) = &mut error {
                    e.key = Some(command.path.clone().into());
                    e.operation = Some(OperationKind::HttpRequest);
                }
                Err(error)
            }
        }
    }

    pub(crate) fn cancel_http(&self, cookie: Cookie, request: HttpRequestId) {
        match self.inner.try_borrow_mut() {
            Ok(mut inner) => {
                let inner = &mut *inner;
                if let Some(transport) = inner.transport.as_mut() {
                    transport.cancel_http_request(request);
                    release_http(&mut inner.slots, cookie, request);
                }
            }
            // The loop is running; it applies the cancel after this callback
            Err(_) => self.session.defer_cancel(cookie, request),
        }
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    pub(crate) fn drive(&self) -> Result<()> {
        let mut inner = self.inner_mut()?;
        inner.drive(&self.session);
        Ok(())
    }

    /// Run the event loop until everything scheduled has completed (or a
    /// callback paused it). Raises a pending connection-level error.
    pub fn wait(&self) -> Result<()> {
        let mut inner = self.inner_mut()?;
        inner.drive(&self.session);
        match inner.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Switch to asynchronous mode for the duration of `f`, then run the
    /// event loop so every operation `f` scheduled completes before
    /// returning. The previous mode is restored afterwards.
    pub fn run<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Bucket) -> Result<()>,
    {
        {
            let mut inner = self.inner_mut()?;
            if self.session.running.get() {
                return Err(CouchError::Argument("nested run isn't allowed".to_string()));
            }
            inner.nbytes = 0;
        }
        self.session.running.set(true);
        let previous = self.session.async_mode.replace(true);

        let result = f(self);
        // A connection error stays on the bucket when `f` already failed
        let waited = if self.is_connected() {
            self.inner_mut().map(|mut inner| {
                inner.drive(&self.session);
                if result.is_ok() {
                    inner.error.take()
                } else {
                    None
                }
            })
        } else {
            Ok(None)
        };

        self.session.async_mode.set(previous);
        self.session.running.set(false);
        result?;
        match waited? {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Allocate a slot and hand the descriptor array to the library
fn submit<C>(
    inner: &mut BucketInner,
    async_mode: bool,
    operation: OperationKind,
    params: Params<C>,
    callback: Option<ResultCallback>,
    native: impl FnOnce(&mut dyn Transport, Cookie, &[C]) -> std::result::Result<(), StatusCode>,
) -> Result<(Rc<RefCell<BatchContext>>, usize, usize)> {
    let count = params.len();
    let context = if async_mode {
        BatchContext::with_callback(operation, count, params.quiet, callback)
    } else {
        BatchContext::collecting(operation, count, params.quiet)
    };
    let context = Rc::new(RefCell::new(context));

    let transport = inner.transport.as_mut().ok_or_else(CouchError::closed)?;
    let entry = inner.slots.vacant_entry();
    let cookie = Cookie(entry.key());
    entry.insert(Slot::Batch(Rc::clone(&context)));

    if let Err(status) = native(transport.as_mut(), cookie, &params.commands) {
        inner.slots.remove(cookie.0);
        let message = match operation {
            OperationKind::Unlock => "failed to schedule unlock request",
            _ => "failed to schedule delete request",
        };
        return Err(schedule_error(status, message).with_operation(operation));
    }

    tracing::debug!(
        "Scheduled {} of {} keys ({} bytes, quiet={})",
        operation,
        count,
        params.npayload,
        params.quiet
    );
    Ok((context, count, params.npayload))
}

/// A rejected schedule call; a success status here still means failure
fn schedule_error(status: StatusCode, message: &str) -> CouchError {
    check_status(status, message, None).unwrap_or_else(|| {
        CouchError::Library(LibraryError {
            status: StatusCode::Generic,
            message: message.to_string(),
            key: None,
            operation: None,
            http_status: None,
        })
    })
}
