use std::collections::{HashMap, HashSet};
use std::fmt;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RuntimeError};
use crate::mux::{OutputGate, OutputMultiplexer};
use crate::worker::{Subscribe, WorkerKey, WorkerSpec};

/// Live subscription handle for one pooled worker.
struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// The set of workers currently pooled for one session, keyed by identity.
///
/// Mutated only by the owning session's serialized control flow; the worker
/// subscriptions themselves run concurrently and independently once started.
pub struct WorkerPool {
    workers: HashMap<WorkerKey, WorkerHandle>,
    root: CancellationToken,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pooled", &self.workers.len())
            .field("running", &self.running())
            .field("cancelled", &self.root.is_cancelled())
            .finish()
    }
}

/// What one reconciliation pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Keys whose subscriptions were newly opened.
    pub started: Vec<WorkerKey>,
    /// Keys withdrawn from the declaration and issued cancellation.
    pub cancelled: Vec<WorkerKey>,
    /// Declared keys that matched a pooled worker and were left untouched.
    pub retained: usize,
}

impl WorkerPool {
    pub(crate) fn new(root: CancellationToken) -> Self {
        Self {
            workers: HashMap::new(),
            root,
        }
    }

    /// Keys of every pooled worker, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &WorkerKey> {
        self.workers.keys()
    }

    pub fn contains(&self, key: &WorkerKey) -> bool {
        self.workers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Pooled workers whose subscription task has not yet wound down. A
    /// naturally completed worker stays pooled (and stops counting here)
    /// until its key is withdrawn.
    pub fn running(&self) -> usize {
        self.workers
            .values()
            .filter(|handle| !handle.join.is_finished())
            .count()
    }

    /// Diffs `declared` against the pooled set: cancels withdrawn keys,
    /// starts new ones, leaves matching ones untouched.
    ///
    /// Duplicate keys inside one declaration are a programming error; the
    /// whole pass is rejected before any start/stop side effect. Withdrawn
    /// workers are issued cancellation (and detached) before new starts, so
    /// a key present in both sets always means the same logical worker.
    /// Returns once removed workers have been issued cancellation and new
    /// subscriptions are registered; it never waits on a slow teardown.
    pub(crate) async fn reconcile<T: Send + 'static>(
        &mut self,
        declared: Vec<WorkerSpec<T>>,
        mux: &OutputMultiplexer<T>,
    ) -> Result<ReconcileSummary> {
        let mut declared_keys = HashSet::with_capacity(declared.len());
        for spec in &declared {
            if !declared_keys.insert(spec.key().clone()) {
                return Err(RuntimeError::DuplicateWorkerKey(spec.key().clone()));
            }
        }

        let withdrawn: Vec<WorkerKey> = self
            .workers
            .keys()
            .filter(|key| !declared_keys.contains(*key))
            .cloned()
            .collect();
        let mut cancelled = Vec::with_capacity(withdrawn.len());
        for key in withdrawn {
            if let Some(handle) = self.workers.remove(&key) {
                handle.cancel.cancel();
                mux.detach(&key).await;
                tracing::debug!(target: "pool", worker = %key, "worker cancelled");
                cancelled.push(key);
            }
        }

        let mut started = Vec::new();
        let mut retained = 0usize;
        for spec in declared {
            if self.workers.contains_key(spec.key()) {
                // Same key, same logical worker: keep the existing
                // subscription even if the source object or transform
                // identity changed between updates.
                retained += 1;
                continue;
            }
            let (key, subscribe) = spec.into_parts();
            let cancel = self.root.child_token();
            let gate = mux.attach(key.clone(), cancel.clone()).await?;
            let join = spawn_worker(key.clone(), subscribe, gate, cancel.clone());
            tracing::debug!(target: "pool", worker = %key, "worker started");
            self.workers.insert(key.clone(), WorkerHandle { cancel, join });
            started.push(key);
        }

        Ok(ReconcileSummary {
            started,
            cancelled,
            retained,
        })
    }

    /// Issues cancellation to every pooled worker, at most once each, and
    /// empties the pool. Idempotent.
    pub(crate) fn cancel_all(&mut self) -> usize {
        let mut issued = 0usize;
        for (key, handle) in self.workers.drain() {
            handle.cancel.cancel();
            tracing::debug!(target: "pool", worker = %key, "worker cancelled");
            issued += 1;
        }
        issued
    }
}

/// One concurrent task per running worker: forward values through the gate
/// until cancellation, a terminal source error, or natural completion.
fn spawn_worker<T: Send + 'static>(
    key: WorkerKey,
    subscribe: Subscribe<T>,
    gate: OutputGate<T>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = subscribe();
        tracing::trace!(target: "pool", worker = %key, "subscribed");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::trace!(target: "pool", worker = %key, "cancelled before next value");
                    break;
                }
                item = stream.next() => match item {
                    Some(Ok(value)) => {
                        if !gate.emit(value).await {
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::debug!(target: "pool", worker = %key, error = %error, "source failed");
                        gate.fail(error).await;
                        break;
                    }
                    None => {
                        tracing::trace!(target: "pool", worker = %key, "source completed");
                        gate.finish().await;
                        break;
                    }
                }
            }
        }
        // Dropping the stream releases the underlying source exactly once.
    })
}
