//! # Weft Core
//!
//! Concurrent event-dispatch core for state-driven runtimes: many
//! asynchronous sources, one session, one ordered output stream.
//!
//! ## Overview
//!
//! `weft-core` turns arbitrary asynchronous sources (channels, timers,
//! network calls) into **workers** - lazy, cancellable value sequences with
//! stable identity keys - and runs them under a **session** that:
//!
//! - **Reconciles** the running worker set against a newly declared one on
//!   every update cycle: new keys start, withdrawn keys cancel, matching
//!   keys keep their subscription untouched
//! - **Multiplexes** every worker's emissions and terminal signals into one
//!   consumer-facing ordered stream, preserving per-worker order
//! - **Propagates cancellation** transitively: cancelling the session (or
//!   its parent scope) cancels every pooled worker and drains the output
//!
//! The rendering or application layer on top only declares worker sets and
//! consumes [`WorkerEvent`]s; the core knows nothing about it.
//!
//! ## Architecture
//!
//! - [`worker`]: identity keys, worker declarations, transforms
//! - [`sources`]: adapters for channels, watch/broadcast sources, timers,
//!   futures, and plain streams
//! - [`pool`]: the keyed worker pool and its reconciliation pass
//! - [`mux`]: the fan-in output multiplexer and consumer stream
//! - [`session`]: the owning scope, lifecycle states, and cancellation
//!
//! ## Example
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use weft_core::{Session, SessionConfig, sources};
//!
//! # async fn demo() -> weft_core::Result<()> {
//! let (tx, rx) = mpsc::channel::<u32>(8);
//! let mut session = Session::new(SessionConfig::default());
//! let mut outputs = session.outputs()?;
//!
//! session.reconcile(vec![sources::from_channel("ticks", rx)]).await?;
//!
//! tx.send(1).await.ok();
//! if let Some(event) = outputs.recv().await {
//!     println!("{event:?}");
//! }
//! session.cancel();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod mux;
pub mod pool;
pub mod session;
pub mod sources;
pub mod worker;

pub use config::SessionConfig;
pub use error::{Result, RuntimeError, WorkerError};
pub use events::WorkerEvent;
pub use mux::{OutputGate, OutputMultiplexer, OutputStream};
pub use pool::{ReconcileSummary, WorkerPool};
pub use session::{Session, SessionId, SessionState};
pub use worker::{WorkerKey, WorkerSpec, WorkerStream};
