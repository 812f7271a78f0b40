//! Native Module
//!
//! The boundary to the wrapped client library.
//!
//! ## Contract
//! - Batch entry points accept a cookie and a descriptor array, and either
//!   reject the whole batch up front or accept it and later report one
//!   completion per descriptor
//! - Completions are only ever delivered from inside [`Transport::wait`]
//! - Exactly one event loop drives all callbacks; nothing here is `Send`
//!
//! Cancellation and loop stops requested by a callback go through
//! [`LoopControl`] and take effect as soon as the callback returns.

pub mod fixture;
pub mod mock;

pub use fixture::Fixture;
pub use mock::{MockCluster, MockRoute, MockTransport};

use crate::protocol::{
    Event, HttpCommand, HttpType, RemoveCommand, StatusCode, UnlockCommand,
};

/// Opaque per-batch token handed to the library and echoed in every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(pub usize);

/// Handle of an outstanding HTTP request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HttpRequestId(pub u64);

/// Requests a callback makes of the running event loop
#[derive(Debug, Default)]
pub struct LoopControl {
    stop: bool,
    cancels: Vec<HttpRequestId>,
}

impl LoopControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave the event loop once the current event is handled
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Cancel an HTTP request; no further events are delivered for it
    pub fn cancel(&mut self, request: HttpRequestId) {
        if !self.cancels.contains(&request) {
            self.cancels.push(request);
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop
    }

    /// Take the cancellations requested so far
    pub fn take_cancels(&mut self) -> Vec<HttpRequestId> {
        std::mem::take(&mut self.cancels)
    }
}

/// Receiver of completion events
pub trait EventHandler {
    fn on_event(&mut self, event: Event, control: &mut LoopControl);
}

impl<F> EventHandler for F
where
    F: FnMut(Event, &mut LoopControl),
{
    fn on_event(&mut self, event: Event, control: &mut LoopControl) {
        self(event, control)
    }
}

/// The wrapped client library
pub trait Transport {
    /// Schedule removal of every key in `commands`
    fn remove(&mut self, cookie: Cookie, commands: &[RemoveCommand]) -> Result<(), StatusCode>;

    /// Schedule unlocking of every key in `commands`
    fn unlock(&mut self, cookie: Cookie, commands: &[UnlockCommand]) -> Result<(), StatusCode>;

    /// Schedule an HTTP request against the view or management API
    fn make_http_request(
        &mut self,
        cookie: Cookie,
        kind: HttpType,
        command: &HttpCommand,
    ) -> Result<HttpRequestId, StatusCode>;

    /// Stop delivering events for an HTTP request
    fn cancel_http_request(&mut self, request: HttpRequestId);

    /// Run the event loop until nothing is outstanding or a handler stops it
    fn wait(&mut self, handler: &mut dyn EventHandler);

    /// Number of operations still waiting for completion
    fn outstanding(&self) -> usize;
}
