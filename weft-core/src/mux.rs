use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RuntimeError, WorkerError};
use crate::events::WorkerEvent;
use crate::worker::WorkerKey;

type SenderSlot<T> = Arc<StdMutex<Option<mpsc::Sender<WorkerEvent<T>>>>>;

/// Fan-in of every attached worker's emissions into one consumer-facing
/// ordered channel.
///
/// Each attached worker forwards through its own [`OutputGate`]; whichever
/// worker produces next is delivered next. Per-worker order is preserved;
/// cross-worker interleaving is scheduler-determined. Fairness under
/// contention is best-effort: producers await capacity on the shared bounded
/// channel, so none can be starved indefinitely, but no round-robin rotation
/// is guaranteed.
pub struct OutputMultiplexer<T> {
    tx: SenderSlot<T>,
    output: Option<OutputStream<T>>,
    attached: Arc<Mutex<HashMap<WorkerKey, u64>>>,
    next_generation: AtomicU64,
    capacity: usize,
}

impl<T> fmt::Debug for OutputMultiplexer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attached = self
            .attached
            .try_lock()
            .map(|guard| guard.len())
            .unwrap_or_default();
        let closed = self
            .tx
            .try_lock()
            .map(|guard| guard.is_none())
            .unwrap_or(false);
        f.debug_struct("OutputMultiplexer")
            .field("capacity", &self.capacity)
            .field("attached", &attached)
            .field("closed", &closed)
            .field("output_taken", &self.output.is_none())
            .finish()
    }
}

impl<T> OutputMultiplexer<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Arc::new(StdMutex::new(Some(tx))),
            output: Some(OutputStream { rx }),
            attached: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            capacity,
        }
    }

    /// Hands the consumer side to the caller. Can succeed only once.
    pub fn take_output(&mut self) -> Result<OutputStream<T>> {
        self.output.take().ok_or(RuntimeError::OutputAlreadyTaken)
    }

    /// Registers `key` and returns the gate its worker task forwards
    /// through. Rejects a key that is already attached: the pool must have
    /// detached the previous incarnation first.
    pub async fn attach(&self, key: WorkerKey, cancel: CancellationToken) -> Result<OutputGate<T>> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RuntimeError::SessionTerminated)?;
        // Each attachment carries a generation so a stale gate's terminal
        // cannot unregister a later incarnation of the same key.
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut attached = self.attached.lock().await;
        if attached.contains_key(&key) {
            return Err(RuntimeError::WorkerAlreadyAttached(key));
        }
        attached.insert(key.clone(), generation);
        tracing::trace!(target: "mux", worker = %key, generation, "attached");
        Ok(OutputGate {
            key,
            generation,
            tx,
            attached: Arc::clone(&self.attached),
            cancel,
        })
    }

    /// Stops forwarding from `key`. Idempotent; emissions already in the
    /// shared channel are still delivered to the consumer.
    pub async fn detach(&self, key: &WorkerKey) {
        let mut attached = self.attached.lock().await;
        if attached.remove(key).is_some() {
            tracing::trace!(target: "mux", worker = %key, "detached");
        }
    }

    /// Number of currently attached workers.
    pub async fn attached_count(&self) -> usize {
        self.attached.lock().await.len()
    }

    /// Drops the prototype sender. The consumer keeps draining buffered
    /// emissions (and anything still in flight through live gates) and
    /// observes end-of-stream once the last gate is gone.
    pub fn close(&mut self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Handle that closes the shared channel from another task, for scope
    /// watchers that outlive the `&mut self` borrow.
    pub(crate) fn closer(&self) -> OutputCloser<T> {
        OutputCloser {
            tx: Arc::clone(&self.tx),
        }
    }
}

/// Detached closer for the multiplexer's prototype sender.
pub(crate) struct OutputCloser<T> {
    tx: SenderSlot<T>,
}

impl<T> OutputCloser<T> {
    pub(crate) fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// A single worker's handle into the shared output channel.
///
/// Terminal sends consume the gate; a worker terminates its contribution at
/// most once. All sends race the worker's cancellation token, so a cancelled
/// worker stops promptly even when the consumer applies backpressure.
pub struct OutputGate<T> {
    key: WorkerKey,
    generation: u64,
    tx: mpsc::Sender<WorkerEvent<T>>,
    attached: Arc<Mutex<HashMap<WorkerKey, u64>>>,
    cancel: CancellationToken,
}

impl<T> fmt::Debug for OutputGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputGate")
            .field("key", &self.key)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<T> OutputGate<T> {
    /// Forwards one value. Returns `false` when the worker should stop
    /// producing (cancellation won the race, or the consumer is gone).
    pub async fn emit(&self, value: T) -> bool {
        let event = WorkerEvent::Emitted {
            key: self.key.clone(),
            value,
        };
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    /// Reports natural completion and detaches the key. Skipped when the
    /// worker was cancelled: cancelled workers contribute no terminal event
    /// and the pool already detached them.
    pub async fn finish(self) {
        let event = WorkerEvent::Finished {
            key: self.key.clone(),
        };
        self.terminate(event).await;
    }

    /// Reports a terminal source error and detaches the key.
    pub async fn fail(self, error: WorkerError) {
        let event = WorkerEvent::Failed {
            key: self.key.clone(),
            error,
        };
        self.terminate(event).await;
    }

    async fn terminate(self, event: WorkerEvent<T>) {
        if self.cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = self.tx.send(event) => {}
        }
        // Unregister only our own generation: the key may already belong to
        // a later incarnation started after this gate was withdrawn.
        let mut attached = self.attached.lock().await;
        if attached.get(&self.key) == Some(&self.generation) {
            attached.remove(&self.key);
            tracing::trace!(target: "mux", worker = %self.key, "detached on terminal");
        }
    }
}

/// The session's merged output: every running worker's emissions and
/// terminal signals, one ordered stream.
pub struct OutputStream<T> {
    rx: mpsc::Receiver<WorkerEvent<T>>,
}

impl<T> fmt::Debug for OutputStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream").finish_non_exhaustive()
    }
}

impl<T> OutputStream<T> {
    /// Receives the next event; `None` once the session has terminated and
    /// all buffered emissions have drained.
    pub async fn recv(&mut self) -> Option<WorkerEvent<T>> {
        self.rx.recv().await
    }
}

impl<T> Stream for OutputStream<T> {
    type Item = WorkerEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
