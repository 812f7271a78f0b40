//! Operation contexts
//!
//! One context exists per scheduled batch (or HTTP request) and lives in the
//! bucket's slot table for as long as the native library may still report
//! completions for it. The slot index doubles as the cookie handed to the
//! library.
//!
//! ## Release Rule
//! A batch slot is removed exactly once, when its pending count reaches
//! zero; removing it drops the context's callback. Completions for a cookie
//! that has no slot are ignored, so a late or duplicated event can neither
//! underflow the count nor release the callback twice.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::{check_http_status, check_status, CouchError};
use crate::http::{BodyCallback, Headers, HttpReply, HttpResult};
use crate::native::{Cookie, HttpRequestId, LoopControl};
use crate::protocol::{HttpResponse, StatusCode};
use crate::result::{OperationKind, OperationResult, ResultCallback};

/// Entry in the bucket's slot table
pub(crate) enum Slot {
    Batch(Rc<RefCell<BatchContext>>),
    Http(Rc<RefCell<HttpContext>>),
}

/// Where per-key results go
pub(crate) enum ResultSink {
    /// Blocking mode: collected for the caller
    Collect(BTreeMap<Bytes, bool>),

    /// Asynchronous mode: handed to the caller's callback as they arrive
    Callback(Option<ResultCallback>),
}

/// State shared by every key of one delete/unlock batch
pub struct BatchContext {
    pub(crate) operation: OperationKind,
    pub(crate) pending: usize,
    pub(crate) quiet: bool,
    pub(crate) first_error: Option<CouchError>,
    pub(crate) sink: ResultSink,
    detached: bool,
}

impl BatchContext {
    /// Context for a blocking batch
    pub(crate) fn collecting(operation: OperationKind, pending: usize, quiet: bool) -> Self {
        Self {
            operation,
            pending,
            quiet,
            first_error: None,
            sink: ResultSink::Collect(BTreeMap::new()),
            detached: false,
        }
    }

    /// Context for an asynchronous batch
    pub(crate) fn with_callback(
        operation: OperationKind,
        pending: usize,
        quiet: bool,
        callback: Option<ResultCallback>,
    ) -> Self {
        Self {
            operation,
            pending,
            quiet,
            first_error: None,
            sink: ResultSink::Callback(callback),
            detached: false,
        }
    }

    /// Stop invoking the callback for this batch
    pub(crate) fn detach(&mut self) {
        self.detached = true;
        if let ResultSink::Callback(callback) = &mut self.sink {
            *callback = None;
        }
    }

    /// Give up on the batch after the connection went away. Returns the
    /// callback so the caller can drop it outside any borrow.
    pub(crate) fn abandon(&mut self) -> Option<ResultCallback> {
        self.pending = 0;
        self.detached = true;
        match &mut self.sink {
            ResultSink::Callback(callback) => callback.take(),
            ResultSink::Collect(_) => None,
        }
    }

    /// Collected key => success map of a blocking batch
    pub(crate) fn take_results(&mut self) -> BTreeMap<Bytes, bool> {
        match &mut self.sink {
            ResultSink::Collect(map) => std::mem::take(map),
            ResultSink::Callback(_) => BTreeMap::new(),
        }
    }
}

fn failure_message(operation: OperationKind) -> &'static str {
    match operation {
        OperationKind::Delete => "failed to remove value",
        OperationKind::Unlock => "failed to unlock value",
        OperationKind::HttpRequest => "failed to execute HTTP request",
    }
}

/// Record the completion of one key. Returns `true` once the batch drained.
pub(crate) fn complete_key(
    context: &Rc<RefCell<BatchContext>>,
    status: StatusCode,
    key: Bytes,
) -> bool {
    let (callback, result) = {
        let mut ctx = context.borrow_mut();
        if ctx.pending == 0 {
            tracing::warn!("Completion for an already drained batch ignored");
            return true;
        }
        ctx.pending -= 1;

        let operation = ctx.operation;
        let mut error = None;
        if status != StatusCode::KeyNotFound || !ctx.quiet {
            error = check_status(status, failure_message(operation), Some(&key))
                .map(|e| e.with_operation(operation));
            if let Some(e) = &error {
                if ctx.first_error.is_none() {
                    ctx.first_error = Some(e.clone());
                }
            }
        }

        match &mut ctx.sink {
            ResultSink::Collect(map) => {
                map.insert(key, status.is_success());
                (None, None)
            }
            ResultSink::Callback(callback) => (
                callback.take(),
                Some(OperationResult {
                    operation,
                    key,
                    error,
                }),
            ),
        }
    };

    // The callback runs without the context borrowed so it may inspect its
    // own PendingBatch.
    if let (Some(mut callback), Some(result)) = (callback, result) {
        callback(result);
        let mut ctx = context.borrow_mut();
        if ctx.pending > 0 && !ctx.detached {
            if let ResultSink::Callback(slot) = &mut ctx.sink {
                *slot = Some(callback);
            }
        }
    }

    context.borrow().pending == 0
}

/// State shared between an [`HttpRequest`](crate::http::HttpRequest) and its slot
#[derive(Default)]
pub struct HttpContext {
    pub(crate) cookie: Option<Cookie>,
    pub(crate) request: Option<HttpRequestId>,
    pub(crate) extended: bool,

    /// Callback registered on the request
    pub(crate) on_body: Option<BodyCallback>,

    /// Callback supplied for a single perform, wins over `on_body`
    pub(crate) override_callback: Option<BodyCallback>,

    pub(crate) headers: Headers,
    pub(crate) error: Option<CouchError>,
    pub(crate) reply: Option<HttpReply>,
    pub(crate) running: bool,
    pub(crate) completed: bool,
    pub(crate) canceled: bool,
}

impl HttpContext {
    pub(crate) fn new(extended: bool, on_body: Option<BodyCallback>) -> Self {
        Self {
            extended,
            on_body,
            ..Self::default()
        }
    }

    /// Forget everything from a previous run
    pub(crate) fn reset(&mut self) {
        self.cookie = None;
        self.request = None;
        self.headers.clear();
        self.error = None;
        self.reply = None;
        self.running = false;
        self.completed = false;
        self.canceled = false;
    }

    /// Mark the request canceled after the connection went away
    pub(crate) fn abandon(&mut self) -> (Option<BodyCallback>, Option<BodyCallback>) {
        self.canceled = true;
        self.running = false;
        (self.on_body.take(), self.override_callback.take())
    }

    fn fold_headers(&mut self, pairs: &[(String, String)]) {
        for (name, value) in pairs {
            self.headers
                .entry(name.clone())
                .or_default()
                .push(value.clone());
        }
    }

    fn build_reply(
        &self,
        response: &HttpResponse,
        error: Option<CouchError>,
        completed: bool,
    ) -> HttpReply {
        if self.extended {
            HttpReply::Extended(HttpResult {
                path: response.path.clone(),
                value: response.body.clone(),
                status: response.status,
                headers: self.headers.clone(),
                completed,
                error,
            })
        } else {
            HttpReply::Body(response.body.clone())
        }
    }

    fn take_callback(&mut self) -> (Option<BodyCallback>, bool) {
        match self.override_callback.take() {
            Some(callback) => (Some(callback), true),
            None => (self.on_body.take(), false),
        }
    }

    fn restore_callback(&mut self, callback: BodyCallback, was_override: bool) {
        if self.canceled || (was_override && self.completed) {
            return;
        }
        if was_override {
            self.override_callback = Some(callback);
        } else if self.on_body.is_none() {
            self.on_body = Some(callback);
        }
    }
}

fn invoke(context: &Rc<RefCell<HttpContext>>, callback: Option<(BodyCallback, bool)>, reply: HttpReply) {
    if let Some((mut callback, was_override)) = callback {
        callback(reply);
        context
            .borrow_mut()
            .restore_callback(callback, was_override);
    }
}

/// Handle one chunk of a streaming response. Returns `true` when the request
/// reached a terminal state and its slot can be released.
pub(crate) fn http_data(
    context: &Rc<RefCell<HttpContext>>,
    request: HttpRequestId,
    status: StatusCode,
    response: &HttpResponse,
    control: &mut LoopControl,
) -> bool {
    let (callback, reply, terminal) = {
        let mut ctx = context.borrow_mut();
        if ctx.canceled || ctx.completed {
            return true;
        }
        let path = Bytes::from(response.path.clone());
        let error = check_http_status(
            status,
            failure_message(OperationKind::HttpRequest),
            Some(&path),
            response.status,
        )
        .map(|e| e.with_operation(OperationKind::HttpRequest));

        // A failed chunk ends the request: the rest is canceled and the
        // error becomes the request's final result.
        let terminal = error.is_some();
        if terminal {
            control.cancel(request);
            ctx.error = error.clone();
            ctx.completed = true;
            ctx.running = false;
        }
        ctx.fold_headers(&response.headers);

        let reply = ctx.build_reply(response, error, false);
        let (callback, was_override) = ctx.take_callback();
        (callback.map(|c| (c, was_override)), reply, terminal)
    };

    invoke(context, callback, reply);
    terminal
}

/// Handle the final event of a request. Always terminal.
pub(crate) fn http_complete(
    context: &Rc<RefCell<HttpContext>>,
    status: StatusCode,
    response: &HttpResponse,
) {
    let (callback, reply) = {
        let mut ctx = context.borrow_mut();
        if ctx.canceled || ctx.completed {
            return;
        }
        ctx.completed = true;
        ctx.running = false;

        let path = Bytes::from(response.path.clone());
        let error = check_http_status(
            status,
            failure_message(OperationKind::HttpRequest),
            Some(&path),
            response.status,
        )
        .map(|e| e.with_operation(OperationKind::HttpRequest));
        ctx.fold_headers(&response.headers);

        let reply = ctx.build_reply(response, error.clone(), true);
        if error.is_none() {
            ctx.reply = Some(reply.clone());
        }
        ctx.error = error;
        let (callback, was_override) = ctx.take_callback();
        (callback.map(|c| (c, was_override)), reply)
    };

    invoke(context, callback, reply);
}
