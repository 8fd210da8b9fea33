//! Adapters turning common asynchronous sources into [`WorkerSpec`]s.
//!
//! Each adapter derives the key's role from the source kind; the caller
//! supplies the disambiguating tag. Subscriptions are opened lazily, when
//! the pool first starts the worker.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures_util::{Stream, StreamExt, stream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream, ReceiverStream, WatchStream};

use crate::error::WorkerError;
use crate::worker::{WorkerKey, WorkerSpec, WorkerStream};

type Tag = Cow<'static, str>;

/// Forwards every item of an infallible stream.
pub fn from_stream<S, T>(tag: impl Into<Tag>, stream: S) -> WorkerSpec<T>
where
    S: Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    WorkerSpec::new(WorkerKey::new("stream", tag), move || {
        stream.map(Ok).boxed()
    })
}

/// Forwards a fallible stream; the first `Err` item is terminal for the
/// worker.
pub fn from_try_stream<S, T, E>(tag: impl Into<Tag>, stream: S) -> WorkerSpec<T>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display,
{
    WorkerSpec::new(WorkerKey::new("try-stream", tag), move || {
        stream
            .map(|item| item.map_err(|error| WorkerError::Source(error.to_string())))
            .boxed()
    })
}

/// Emits the future's value once, then finishes.
pub fn from_future<F, T>(tag: impl Into<Tag>, fut: F) -> WorkerSpec<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    WorkerSpec::new(WorkerKey::new("future", tag), move || {
        stream::once(fut).map(Ok).boxed()
    })
}

/// Emits the future's value once; a future that resolves to `Err` surfaces
/// as a terminal source failure instead.
pub fn from_try_future<F, T, E>(tag: impl Into<Tag>, fut: F) -> WorkerSpec<T>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    WorkerSpec::new(WorkerKey::new("try-future", tag), move || {
        Box::pin(async_stream::stream! {
            match fut.await {
                Ok(value) => yield Ok(value),
                Err(error) => yield Err(WorkerError::Source(error.to_string())),
            }
        })
    })
}

/// Forwards values received on an mpsc channel; finishes when every sender
/// is gone.
pub fn from_channel<T>(tag: impl Into<Tag>, rx: mpsc::Receiver<T>) -> WorkerSpec<T>
where
    T: Send + 'static,
{
    WorkerSpec::new(WorkerKey::new("channel", tag), move || {
        ReceiverStream::new(rx).map(Ok).boxed()
    })
}

/// Observes a watch (conflated) channel: the subscription immediately yields
/// the current value, then the latest value after each change. Intermediate
/// values may be skipped; finishes when the sender is gone.
pub fn from_watch<T>(tag: impl Into<Tag>, rx: watch::Receiver<T>) -> WorkerSpec<T>
where
    T: Clone + Send + Sync + 'static,
{
    WorkerSpec::new(WorkerKey::new("watch", tag), move || {
        WatchStream::new(rx).map(Ok).boxed()
    })
}

/// Forwards values received on a broadcast channel; finishes when every
/// sender is gone. A subscription that lags behind the channel's capacity
/// fails terminally with [`WorkerError::Lagged`].
pub fn from_broadcast<T>(tag: impl Into<Tag>, rx: broadcast::Receiver<T>) -> WorkerSpec<T>
where
    T: Clone + Send + 'static,
{
    WorkerSpec::new(WorkerKey::new("broadcast", tag), move || {
        BroadcastStream::new(rx)
            .map(|item| {
                item.map_err(|error| match error {
                    BroadcastStreamRecvError::Lagged(skipped) => WorkerError::Lagged(skipped),
                })
            })
            .boxed()
    })
}

/// Emits `()` on every tick of `period`, forever.
pub fn interval(tag: impl Into<Tag>, period: Duration) -> WorkerSpec<()> {
    WorkerSpec::new(WorkerKey::new("interval", tag), move || {
        IntervalStream::new(tokio::time::interval(period))
            .map(|_| Ok(()))
            .boxed()
    })
}

/// Emits `()` once after `delay`, then finishes.
pub fn timer(tag: impl Into<Tag>, delay: Duration) -> WorkerSpec<()> {
    WorkerSpec::new(WorkerKey::new("timer", tag), move || {
        stream::once(tokio::time::sleep(delay)).map(Ok).boxed()
    })
}

/// Finishes immediately without emitting. Useful as a placeholder that still
/// produces its terminal signal.
pub fn finished<T>(tag: impl Into<Tag>) -> WorkerSpec<T>
where
    T: Send + 'static,
{
    WorkerSpec::new(WorkerKey::new("finished", tag), move || {
        stream::empty().boxed()
    })
}
