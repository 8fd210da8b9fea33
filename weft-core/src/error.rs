use thiserror::Error;

use crate::worker::WorkerKey;

/// Control-plane failures surfaced to the session owner.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A declaration named the same worker key twice. The reconciliation is
    /// rejected as a whole; the pool is left untouched.
    #[error("duplicate worker key in declaration: {0}")]
    DuplicateWorkerKey(WorkerKey),

    /// A worker key was attached to the output multiplexer while a previous
    /// attachment for the same key was still registered.
    #[error("worker already attached to output: {0}")]
    WorkerAlreadyAttached(WorkerKey),

    /// The session (or its parent scope) has already been cancelled.
    #[error("session already terminated")]
    SessionTerminated,

    /// The session's output stream was already handed to a consumer.
    #[error("output stream already taken")]
    OutputAlreadyTaken,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Terminal failure reported by a worker's underlying source.
///
/// Worker errors travel as data on the output stream (see
/// [`WorkerEvent::Failed`](crate::events::WorkerEvent::Failed)); they never
/// cancel sibling workers. The owning application decides whether one ends
/// the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The external source reported an error.
    #[error("source failed: {0}")]
    Source(String),

    /// A broadcast subscription fell behind and the runtime dropped values
    /// out from under it. Surfaced as terminal because the worker can no
    /// longer honor its per-worker ordering guarantee.
    #[error("source lagged, skipped {0} values")]
    Lagged(u64),
}
