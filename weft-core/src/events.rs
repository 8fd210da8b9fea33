use crate::error::WorkerError;
use crate::worker::WorkerKey;

/// One item on a session's multiplexed output stream.
///
/// Every running worker contributes its emissions in its own order; a worker
/// that terminates naturally contributes exactly one terminal event
/// ([`Finished`](Self::Finished) or [`Failed`](Self::Failed)), attributable
/// to its key. A cancelled worker contributes no terminal event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEvent<T> {
    /// A value forwarded from the worker's source.
    Emitted {
        /// Identity of the emitting worker.
        key: WorkerKey,
        /// The forwarded value, after the worker's transform.
        value: T,
    },
    /// The worker's source completed naturally.
    Finished {
        /// Identity of the completed worker.
        key: WorkerKey,
    },
    /// The worker's source reported a terminal error. Sibling workers are
    /// unaffected; cancellation is explicit and top-down only.
    Failed {
        /// Identity of the failed worker.
        key: WorkerKey,
        /// The error the source reported.
        error: WorkerError,
    },
}

impl<T> WorkerEvent<T> {
    /// The key of the worker this event is attributed to.
    pub fn key(&self) -> &WorkerKey {
        match self {
            Self::Emitted { key, .. } | Self::Finished { key } | Self::Failed { key, .. } => key,
        }
    }

    /// Whether this event ends the contributing worker's output.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Emitted { .. })
    }
}
