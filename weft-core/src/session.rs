use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{Result, RuntimeError};
use crate::mux::{OutputMultiplexer, OutputStream};
use crate::pool::{ReconcileSummary, WorkerPool};
use crate::worker::{WorkerKey, WorkerSpec};

/// Identifier for one session lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a session. No transition leaves `Terminated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting reconciliations; workers run and the output stream flows.
    Active,
    /// Cancellation requested; workers are being issued cancellation.
    Cancelling,
    /// Every worker has been issued cancellation and the output channel is
    /// closed (the consumer still drains buffered emissions).
    Terminated,
}

/// The scope owning a worker pool and output multiplexer for one logical
/// lifetime.
///
/// The session serializes reconciliations (one per update cycle, through
/// `&mut self`), exposes the merged output stream to its owner, and
/// propagates cancellation transitively: cancelling the session - or its
/// parent token - cancels every pooled worker. Dropping an active session
/// cancels it.
pub struct Session<T> {
    id: SessionId,
    state: SessionState,
    pool: WorkerPool,
    mux: OutputMultiplexer<T>,
    shutdown: CancellationToken,
    done: CancellationToken,
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pool", &self.pool)
            .field("mux", &self.mux)
            .finish()
    }
}

impl<T: Send + 'static> Session<T> {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_parent(config, &CancellationToken::new())
    }

    /// Ties the session under `parent`: cancelling the parent cancels every
    /// pooled worker, closes the output stream, and resolves
    /// [`terminated`](Self::terminated). The owner-facing
    /// [`state`](Self::state) folds to `Terminated` on its next `reconcile`
    /// or `cancel` call.
    ///
    /// Construction spawns the scope watcher, so sessions must be created
    /// inside a Tokio runtime.
    pub fn with_parent(config: SessionConfig, parent: &CancellationToken) -> Self {
        let shutdown = parent.child_token();
        let done = CancellationToken::new();
        let id = SessionId::new();
        let mux = OutputMultiplexer::new(config.output_capacity);

        // React to scope cancellation even when the owner never touches the
        // session again: close the output so the consumer drains to
        // end-of-stream, and make termination observable.
        let closer = mux.closer();
        tokio::spawn({
            let shutdown = shutdown.clone();
            let done = done.clone();
            async move {
                shutdown.cancelled().await;
                closer.close();
                done.cancel();
                tracing::trace!(target: "session", session = %id, "scope watcher closed outputs");
            }
        });

        tracing::debug!(target: "session", session = %id, "session created");
        Self {
            id,
            state: SessionState::Active,
            pool: WorkerPool::new(shutdown.clone()),
            mux,
            shutdown,
            done,
        }
    }
}

impl<T> Session<T> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The pool of currently declared workers.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Keys of every pooled worker.
    pub fn worker_keys(&self) -> Vec<WorkerKey> {
        self.pool.keys().cloned().collect()
    }

    /// Hands the merged output stream to the owner. Succeeds once.
    pub fn outputs(&mut self) -> Result<OutputStream<T>> {
        self.mux.take_output()
    }

    /// Cancels the whole tree: every pooled worker is issued cancellation at
    /// most once, the output channel closes after buffered emissions drain,
    /// and [`terminated`](Self::terminated) resolves. Re-cancel is a no-op.
    pub fn cancel(&mut self) {
        match self.state {
            SessionState::Active => {
                self.state = SessionState::Cancelling;
                tracing::debug!(target: "session", session = %self.id, "session cancelling");
                self.shutdown.cancel();
                let issued = self.pool.cancel_all();
                self.mux.close();
                self.state = SessionState::Terminated;
                self.done.cancel();
                tracing::debug!(
                    target: "session",
                    session = %self.id,
                    workers = issued,
                    "session terminated"
                );
            }
            SessionState::Cancelling | SessionState::Terminated => {}
        }
    }

    /// Resolves once the session has terminated.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }
}

impl<T: Send + 'static> Session<T> {
    /// Applies one update cycle's declared worker set: starts newly declared
    /// keys, cancels withdrawn ones, leaves matching ones untouched.
    ///
    /// Rejects declarations containing duplicate keys without side effects,
    /// and fails with [`RuntimeError::SessionTerminated`] once the session
    /// (or its parent scope) has been cancelled.
    pub async fn reconcile(&mut self, declared: Vec<WorkerSpec<T>>) -> Result<ReconcileSummary> {
        if self.shutdown.is_cancelled() && self.state == SessionState::Active {
            // Parent scope went away between updates.
            tracing::debug!(target: "session", session = %self.id, "parent scope cancelled");
            self.cancel();
        }
        if self.state != SessionState::Active {
            return Err(RuntimeError::SessionTerminated);
        }

        let summary = self.pool.reconcile(declared, &self.mux).await?;
        tracing::debug!(
            target: "session",
            session = %self.id,
            started = summary.started.len(),
            cancelled = summary.cancelled.len(),
            retained = summary.retained,
            "reconciled"
        );
        Ok(summary)
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
