//! Simulated cluster
//!
//! An in-process [`Transport`] with the same completion semantics as the
//! real library: scheduling either fails for the whole batch or queues one
//! operation per descriptor, and events are produced lazily while
//! [`Transport::wait`] runs. Stopping the loop leaves the rest queued.
//!
//! The document store lives in a [`MockCluster`] that can be shared
//! between several transports and inspected by tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::{Cookie, EventHandler, HttpRequestId, LoopControl, Transport};
use crate::protocol::{
    Event, HttpCommand, HttpMethod, HttpResponse, HttpType, RemoveCommand, StatusCode,
    UnlockCommand,
};

/// First CAS handed out by a fresh cluster
const INITIAL_CAS: u64 = 0x5300_0000_0000;

#[derive(Debug, Clone)]
struct Document {
    value: Bytes,
    cas: u64,
    locked: bool,
}

/// Canned HTTP response served for a (type, method, path)
#[derive(Debug, Clone)]
pub struct MockRoute {
    pub status: u16,
    pub headers: Vec<(String, String)>,

    /// Body pieces; a chunked request sees one data event per piece
    pub chunks: Vec<Bytes>,
}

impl MockRoute {
    /// 200 response with a single body piece
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            chunks: vec![body.into()],
        }
    }

    /// 200 response split into pieces
    pub fn chunked<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            status: 200,
            headers: Vec::new(),
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn full_body(&self) -> Option<Bytes> {
        match self.chunks.len() {
            0 => None,
            1 => Some(self.chunks[0].clone()),
            _ => {
                let mut buf = BytesMut::new();
                for chunk in &self.chunks {
                    buf.extend_from_slice(chunk);
                }
                Some(buf.freeze())
            }
        }
    }
}

type RouteKey = (HttpType, HttpMethod, String);

#[derive(Debug)]
struct ClusterState {
    documents: HashMap<Bytes, Document>,
    routes: HashMap<RouteKey, MockRoute>,
    next_cas: u64,

    /// Status forced onto every operation touching a key
    forced: HashMap<Bytes, StatusCode>,

    /// Status returned by the next schedule call
    reject_next: Option<StatusCode>,

    /// Connection-level errors delivered on the next loop run
    errors: VecDeque<(StatusCode, String)>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            documents: HashMap::new(),
            routes: HashMap::new(),
            next_cas: INITIAL_CAS,
            forced: HashMap::new(),
            reject_next: None,
            errors: VecDeque::new(),
        }
    }
}

impl ClusterState {
    /// Next CAS; wraps past `u64::MAX` to 1 since 0 means "no CAS"
    fn bump_cas(&mut self) -> u64 {
        self.next_cas = self.next_cas.checked_add(1).unwrap_or(1);
        self.next_cas
    }

    fn remove(&mut self, command: &RemoveCommand) -> StatusCode {
        if let Some(status) = self.forced.get(&command.key) {
            return *status;
        }
        let Some(doc) = self.documents.get(&command.key) else {
            return StatusCode::KeyNotFound;
        };
        if doc.locked && command.cas != doc.cas {
            return StatusCode::TemporaryFailure;
        }
        if command.cas != 0 && command.cas != doc.cas {
            return StatusCode::KeyExists;
        }
        self.documents.remove(&command.key);
        StatusCode::Success
    }

    fn unlock(&mut self, command: &UnlockCommand) -> StatusCode {
        if let Some(status) = self.forced.get(&command.key) {
            return *status;
        }
        let Some(doc) = self.documents.get_mut(&command.key) else {
            return StatusCode::KeyNotFound;
        };
        if !doc.locked || command.cas != doc.cas {
            return StatusCode::TemporaryFailure;
        }
        doc.locked = false;
        StatusCode::Success
    }
}

/// Shared document store and failure injection switches
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport talking to this cluster
    pub fn transport(&self) -> MockTransport {
        MockTransport::new(self.clone())
    }

    /// Store a value, returning its new CAS
    pub fn insert(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> u64 {
        let mut state = self.state.lock();
        let cas = state.bump_cas();
        state.documents.insert(
            key.into(),
            Document {
                value: value.into(),
                cas,
                locked: false,
            },
        );
        cas
    }

    /// Store a value with an explicit CAS and lock state
    pub fn insert_with_cas(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        cas: u64,
        locked: bool,
    ) {
        let mut state = self.state.lock();
        state.next_cas = state.next_cas.max(cas);
        state.documents.insert(
            key.into(),
            Document {
                value: value.into(),
                cas,
                locked,
            },
        );
    }

    /// Lock a key the way get-and-lock does, returning the CAS to unlock with
    pub fn lock(&self, key: &[u8]) -> Option<u64> {
        let mut state = self.state.lock();
        if !state.documents.contains_key(key) {
            return None;
        }
        let cas = state.bump_cas();
        let doc = state.documents.get_mut(key)?;
        doc.locked = true;
        doc.cas = cas;
        Some(cas)
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.state.lock().documents.get(key).map(|d| d.value.clone())
    }

    pub fn cas(&self, key: &[u8]) -> Option<u64> {
        self.state.lock().documents.get(key).map(|d| d.cas)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.state.lock().documents.contains_key(key)
    }

    pub fn is_locked(&self, key: &[u8]) -> bool {
        self.state
            .lock()
            .documents
            .get(key)
            .map(|d| d.locked)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.state.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serve `route` for requests matching type, method and path
    pub fn add_route(
        &self,
        kind: HttpType,
        method: HttpMethod,
        path: impl Into<String>,
        route: MockRoute,
    ) {
        self.state
            .lock()
            .routes
            .insert((kind, method, path.into()), route);
    }

    /// Make every operation on `key` complete with `status`
    pub fn force_status(&self, key: impl Into<Bytes>, status: StatusCode) {
        self.state.lock().forced.insert(key.into(), status);
    }

    pub fn clear_forced(&self) {
        self.state.lock().forced.clear();
    }

    /// Reject the next schedule call of any transport
    pub fn reject_next_schedule(&self, status: StatusCode) {
        self.state.lock().reject_next = Some(status);
    }

    /// Report a connection-level error on the next loop run
    pub fn emit_error(&self, status: StatusCode, message: impl Into<String>) {
        self.state.lock().errors.push_back((status, message.into()));
    }

    fn take_rejection(&self) -> Option<StatusCode> {
        self.state.lock().reject_next.take()
    }

    fn take_error(&self) -> Option<(StatusCode, String)> {
        self.state.lock().errors.pop_front()
    }

    fn route(&self, kind: HttpType, method: HttpMethod, path: &str) -> Option<MockRoute> {
        self.state
            .lock()
            .routes
            .get(&(kind, method, path.to_string()))
            .cloned()
    }
}

#[derive(Debug)]
enum PendingOp {
    Remove {
        cookie: Cookie,
        command: RemoveCommand,
    },
    Unlock {
        cookie: Cookie,
        command: UnlockCommand,
    },
    Http {
        cookie: Cookie,
        request: HttpRequestId,
        kind: HttpType,
        command: HttpCommand,
    },
}

/// In-process stand-in for the native client library
#[derive(Debug)]
pub struct MockTransport {
    cluster: MockCluster,
    ops: VecDeque<PendingOp>,

    /// Events already produced but not yet delivered
    outbox: VecDeque<Event>,
    canceled: HashSet<HttpRequestId>,
    next_request: u64,
}

impl MockTransport {
    pub fn new(cluster: MockCluster) -> Self {
        Self {
            cluster,
            ops: VecDeque::new(),
            outbox: VecDeque::new(),
            canceled: HashSet::new(),
            next_request: 1,
        }
    }

    pub fn cluster(&self) -> &MockCluster {
        &self.cluster
    }

    fn check_schedule(&self) -> Result<(), StatusCode> {
        match self.cluster.take_rejection() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn next_event(&mut self) -> Option<Event> {
        if let Some((status, message)) = self.cluster.take_error() {
            return Some(Event::Error { status, message });
        }
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }
            let op = self.ops.pop_front()?;
            self.execute(op);
        }
    }

    fn execute(&mut self, op: PendingOp) {
        match op {
            PendingOp::Remove { cookie, command } => {
                let status = self.cluster.state.lock().remove(&command);
                self.outbox.push_back(Event::Remove {
                    cookie,
                    status,
                    key: command.key,
                });
            }
            PendingOp::Unlock { cookie, command } => {
                let status = self.cluster.state.lock().unlock(&command);
                self.outbox.push_back(Event::Unlock {
                    cookie,
                    status,
                    key: command.key,
                });
            }
            PendingOp::Http {
                cookie,
                request,
                kind,
                command,
            } => self.serve_http(cookie, request, kind, &command),
        }
    }

    fn serve_http(
        &mut self,
        cookie: Cookie,
        request: HttpRequestId,
        kind: HttpType,
        command: &HttpCommand,
    ) {
        let route = self
            .cluster
            .route(kind, command.method, &command.path)
            .unwrap_or_else(|| {
                MockRoute::ok(r#"{"error":"not_found","reason":"missing"}"#).with_status(404)
            });
        let response = |headers: Vec<(String, String)>, body: Option<Bytes>| HttpResponse {
            status: route.status,
            path: command.path.clone(),
            headers,
            body,
        };

        if command.chunked && !route.chunks.is_empty() {
            for (i, chunk) in route.chunks.iter().enumerate() {
                let headers = if i == 0 { route.headers.clone() } else { Vec::new() };
                self.outbox.push_back(Event::HttpData {
                    cookie,
                    request,
                    status: StatusCode::Success,
                    response: response(headers, Some(chunk.clone())),
                });
            }
            self.outbox.push_back(Event::HttpComplete {
                cookie,
                request,
                status: StatusCode::Success,
                response: response(Vec::new(), None),
            });
        } else {
            self.outbox.push_back(Event::HttpComplete {
                cookie,
                request,
                status: StatusCode::Success,
                response: response(route.headers.clone(), route.full_body()),
            });
        }
    }

    fn is_canceled(&self, event: &Event) -> bool {
        match event {
            Event::HttpData { request, .. } | Event::HttpComplete { request, .. } => {
                self.canceled.contains(request)
            }
            _ => false,
        }
    }
}

impl Transport for MockTransport {
    fn remove(&mut self, cookie: Cookie, commands: &[RemoveCommand]) -> Result<(), StatusCode> {
        self.check_schedule()?;
        self.ops.extend(commands.iter().map(|command| PendingOp::Remove {
            cookie,
            command: command.clone(),
        }));
        Ok(())
    }

    fn unlock(&mut self, cookie: Cookie, commands: &[UnlockCommand]) -> Result<(), StatusCode> {
        self.check_schedule()?;
        self.ops.extend(commands.iter().map(|command| PendingOp::Unlock {
            cookie,
            command: command.clone(),
        }));
        Ok(())
    }

    fn make_http_request(
        &mut self,
        cookie: Cookie,
        kind: HttpType,
        command: &HttpCommand,
    ) -> Result<HttpRequestId, StatusCode> {
        self.check_schedule()?;
        let request = HttpRequestId(self.next_request);
        self.next_request += 1;
        self.ops.push_back(PendingOp::Http {
            cookie,
            request,
            kind,
            command: command.clone(),
        });
        Ok(request)
    }

    fn cancel_http_request(&mut self, request: HttpRequestId) {
        self.canceled.insert(request);
        self.ops
            .retain(|op| !matches!(op, PendingOp::Http { request: r, .. } if *r == request));
        self.outbox.retain(|event| {
            !matches!(
                event,
                Event::HttpData { request: r, .. } | Event::HttpComplete { request: r, .. }
                    if *r == request
            )
        });
    }

    fn wait(&mut self, handler: &mut dyn EventHandler) {
        while let Some(event) = self.next_event() {
            if self.is_canceled(&event) {
                continue;
            }
            let mut control = LoopControl::new();
            handler.on_event(event, &mut control);
            for request in control.take_cancels() {
                self.cancel_http_request(request);
            }
            if control.stop_requested() {
                break;
            }
        }
    }

    fn outstanding(&self) -> usize {
        self.ops.len() + self.outbox.len()
    }
}
