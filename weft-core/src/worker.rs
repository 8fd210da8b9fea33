use std::borrow::Cow;
use std::fmt;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// The item stream a worker subscription produces: zero or more values, an
/// optional terminal error, then end-of-stream.
pub type WorkerStream<T> = BoxStream<'static, Result<T, WorkerError>>;

pub(crate) type Subscribe<T> = Box<dyn FnOnce() -> WorkerStream<T> + Send>;

/// Stable identity distinguishing one logical worker from another across
/// reconciliations, independent of the underlying source object's identity.
///
/// A key combines the worker's logical role (usually the adapter kind, see
/// [`sources`](crate::sources)) with a caller-supplied tag that disambiguates
/// several workers of the same kind running concurrently. Two simultaneously
/// running workers never share a key; the pool enforces this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerKey {
    role: Cow<'static, str>,
    tag: Cow<'static, str>,
}

impl WorkerKey {
    pub fn new(role: impl Into<Cow<'static, str>>, tag: impl Into<Cow<'static, str>>) -> Self {
        Self {
            role: role.into(),
            tag: tag.into(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.is_empty() {
            write!(f, "{}", self.role)
        } else {
            write!(f, "{}:{}", self.role, self.tag)
        }
    }
}

/// A declared worker: an identity key plus a one-shot subscription to an
/// external asynchronous source.
///
/// Subscribing opens the external resource; dropping the produced stream
/// releases it exactly once. A spec is consumed when the pool starts it. A
/// later declaration of the same key (after the previous incarnation was
/// withdrawn) builds a fresh subscription - subscriptions are never replayed.
pub struct WorkerSpec<T> {
    key: WorkerKey,
    subscribe: Subscribe<T>,
}

impl<T: Send + 'static> WorkerSpec<T> {
    /// Wraps a subscription closure under `key`. Prefer the adapters in
    /// [`sources`](crate::sources) for common source kinds.
    pub fn new<F>(key: WorkerKey, subscribe: F) -> Self
    where
        F: FnOnce() -> WorkerStream<T> + Send + 'static,
    {
        Self {
            key,
            subscribe: Box::new(subscribe),
        }
    }

    pub fn key(&self) -> &WorkerKey {
        &self.key
    }

    /// Replaces the identity key. Useful when the adapter-derived role/tag
    /// is not specific enough for the host's reconciliation scheme.
    pub fn with_key(mut self, key: WorkerKey) -> Self {
        self.key = key;
        self
    }

    /// Maps every emitted value through `f`, keeping the identity key.
    ///
    /// Transforms are assumed pure and stable for a given key: a matching
    /// key in a later declaration keeps its running subscription even when
    /// the transform closure's identity differs.
    pub fn map<U, F>(self, mut f: F) -> WorkerSpec<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let subscribe = self.subscribe;
        WorkerSpec {
            key: self.key,
            subscribe: Box::new(move || subscribe().map(move |item| item.map(&mut f)).boxed()),
        }
    }

    /// Opens the subscription immediately, consuming the spec.
    ///
    /// Inside a session the pool performs this when the key first appears;
    /// calling it directly is mainly useful for composition and tests.
    pub fn into_stream(self) -> WorkerStream<T> {
        (self.subscribe)()
    }

    pub(crate) fn into_parts(self) -> (WorkerKey, Subscribe<T>) {
        (self.key, self.subscribe)
    }
}

impl<T> fmt::Debug for WorkerSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
