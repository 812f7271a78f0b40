//! Operation results
//!
//! A blocking call yields an [`Outcome`]; an asynchronous call yields a
//! [`PendingBatch`] and reports each key through an [`OperationResult`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::context::BatchContext;
use crate::error::CouchError;

/// Which operation produced a result or error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Delete,
    Unlock,
    HttpRequest,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Delete => f.write_str("delete"),
            OperationKind::Unlock => f.write_str("unlock"),
            OperationKind::HttpRequest => f.write_str("http_request"),
        }
    }
}

/// Per-key result handed to asynchronous callbacks
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub operation: OperationKind,
    pub key: Bytes,
    pub error: Option<CouchError>,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Callback invoked once per key in asynchronous mode
pub type ResultCallback = Box<dyn FnMut(OperationResult)>;

/// Result of a blocking batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The batch held exactly one key
    Single(bool),

    /// Key => success for batches of two or more keys
    Batch(BTreeMap<Bytes, bool>),
}

impl Outcome {
    pub fn is_single(&self) -> bool {
        matches!(self, Outcome::Single(_))
    }

    /// Success flag for `key`; a single outcome answers for any key
    pub fn get(&self, key: &[u8]) -> Option<bool> {
        match self {
            Outcome::Single(ok) => Some(*ok),
            Outcome::Batch(map) => map.get(key).copied(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Outcome::Single(_) => 1,
            Outcome::Batch(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The scalar value of a single-key outcome
    pub fn as_single(&self) -> Option<bool> {
        match self {
            Outcome::Single(ok) => Some(*ok),
            Outcome::Batch(_) => None,
        }
    }

    pub fn as_batch(&self) -> Option<&BTreeMap<Bytes, bool>> {
        match self {
            Outcome::Batch(map) => Some(map),
            Outcome::Single(_) => None,
        }
    }
}

/// What a batch call returned
#[derive(Debug)]
pub enum Reply {
    /// Blocking mode: every key has completed
    Completed(Outcome),

    /// Asynchronous mode: results arrive while the event loop runs
    Scheduled(PendingBatch),
}

impl Reply {
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            Reply::Completed(outcome) => Some(outcome),
            Reply::Scheduled(_) => None,
        }
    }

    pub fn pending(self) -> Option<PendingBatch> {
        match self {
            Reply::Scheduled(pending) => Some(pending),
            Reply::Completed(_) => None,
        }
    }
}

/// Handle on an asynchronous batch still in flight
pub struct PendingBatch {
    context: Rc<RefCell<BatchContext>>,
}

impl PendingBatch {
    pub(crate) fn new(context: Rc<RefCell<BatchContext>>) -> Self {
        Self { context }
    }

    pub fn operation(&self) -> OperationKind {
        self.context.borrow().operation
    }

    /// Keys that have not completed yet
    pub fn remaining(&self) -> usize {
        self.context.borrow().pending
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// First error reported by any key so far
    pub fn first_error(&self) -> Option<CouchError> {
        self.context.borrow().first_error.clone()
    }

    /// Drop the callback; the remaining completions still drain silently
    pub fn cancel(&self) {
        self.context.borrow_mut().detach();
    }
}

impl fmt::Debug for PendingBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ctx = self.context.borrow();
        f.debug_struct("PendingBatch")
            .field("operation", &ctx.operation)
            .field("remaining", &ctx.pending)
            .finish()
    }
}
