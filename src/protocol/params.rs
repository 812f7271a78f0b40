//! Command builder
//!
//! Turns a caller-facing [`KeyBatch`] into the descriptor array the native
//! library consumes. Key prefixes are applied here and the payload size is
//! accounted for the bucket's flush threshold.

use bytes::{BufMut, Bytes, BytesMut};

use super::{RemoveCommand, UnlockCommand};
use crate::error::{CouchError, Result};

/// A single key in a batch with an optional per-key CAS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub key: Bytes,
    pub cas: Option<u64>,
}

/// Keys to operate on plus batch-wide options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBatch {
    entries: Vec<KeyEntry>,

    /// Treat not-found as a plain `false` instead of an error.
    /// `None` falls back to the bucket default.
    quiet: Option<bool>,

    /// CAS applied to entries without their own
    cas: Option<u64>,
}

impl KeyBatch {
    /// Batch with a single key
    pub fn key(key: impl Into<Bytes>) -> Self {
        Self::keys([key])
    }

    /// Batch of plain keys
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        let entries = keys
            .into_iter()
            .map(|k| KeyEntry {
                key: k.into(),
                cas: None,
            })
            .collect();
        Self {
            entries,
            ..Self::default()
        }
    }

    /// Batch of key => CAS pairs
    pub fn with_cas<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<Bytes>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, cas)| KeyEntry {
                key: k.into(),
                cas: Some(cas),
            })
            .collect();
        Self {
            entries,
            ..Self::default()
        }
    }

    /// Add one more key
    pub fn push(mut self, key: impl Into<Bytes>, cas: Option<u64>) -> Self {
        self.entries.push(KeyEntry {
            key: key.into(),
            cas,
        });
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = Some(quiet);
        self
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = Some(cas);
        self
    }

    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn quiet_override(&self) -> Option<bool> {
        self.quiet
    }
}

/// Descriptor array ready for a native batch call
#[derive(Debug, Clone)]
pub struct Params<C> {
    pub commands: Vec<C>,

    /// Effective quiet flag for the batch
    pub quiet: bool,

    /// Bytes handed to the native layer
    pub npayload: usize,
}

impl<C> Params<C> {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Build remove descriptors
pub fn build_remove(
    batch: &KeyBatch,
    prefix: Option<&[u8]>,
    default_quiet: bool,
) -> Result<Params<RemoveCommand>> {
    build(batch, prefix, default_quiet, |key, cas| RemoveCommand { key, cas })
}

/// Build unlock descriptors
pub fn build_unlock(
    batch: &KeyBatch,
    prefix: Option<&[u8]>,
    default_quiet: bool,
) -> Result<Params<UnlockCommand>> {
    build(batch, prefix, default_quiet, |key, cas| UnlockCommand { key, cas })
}

fn build<C>(
    batch: &KeyBatch,
    prefix: Option<&[u8]>,
    default_quiet: bool,
    make: impl Fn(Bytes, u64) -> C,
) -> Result<Params<C>> {
    if batch.is_empty() {
        return Err(CouchError::Argument("must be at least one key".to_string()));
    }

    let mut npayload = 0;
    let commands = batch
        .entries
        .iter()
        .map(|entry| {
            let key = apply_prefix(prefix, &entry.key);
            npayload += key.len();
            let cas = entry.cas.or(batch.cas).unwrap_or(0);
            make(key, cas)
        })
        .collect();

    Ok(Params {
        commands,
        quiet: batch.quiet.unwrap_or(default_quiet),
        npayload,
    })
}

/// Prepend the bucket's key prefix
pub fn apply_prefix(prefix: Option<&[u8]>, key: &Bytes) -> Bytes {
    match prefix {
        Some(p) if !p.is_empty() => {
            let mut buf = BytesMut::with_capacity(p.len() + key.len());
            buf.put_slice(p);
            buf.put_slice(key);
            buf.freeze()
        }
        _ => key.clone(),
    }
}

/// Remove the bucket's key prefix from a key reported by the library
pub fn strip_prefix(prefix: Option<&[u8]>, key: Bytes) -> Bytes {
    match prefix {
        Some(p) if !p.is_empty() && key.starts_with(p) => key.slice(p.len()..),
        _ => key,
    }
}
