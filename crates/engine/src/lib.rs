//! Execution-marshaling and transaction engine.
//!
//! The host application this crate remote-controls is single-threaded: its
//! object-graph API must only ever be called from one designated execution
//! context. This crate provides the substrate that makes that safe to drive
//! from many concurrent clients:
//!
//! * [`queue`]: bounded FIFO work queue (many producers, one consumer)
//! * [`executor`]: the single serialized execution context owning host state
//! * [`waiter`]: completion waiting with timeout, progress and abandonment
//! * [`revision`]: per-resource monotonic revision counters
//! * [`registry`]: method name → handler + declared parameter shape
//! * [`transaction`]: multi-step atomicity via compensating actions
//! * [`dispatch`]: ties the above together per inbound request
//!
//! Individual domain operations (geometry, constraints, parameters) are
//! external collaborators registered as handlers; nothing in this crate knows
//! their semantics.

#![warn(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod queue;
pub mod registry;
pub mod revision;
pub mod transaction;
pub mod waiter;

pub use config::EngineConfig;
pub use dispatch::Dispatcher;
pub use error::{CompensationFailure, EngineError, Result, Rollback, TransactionError};
pub use executor::{Applied, CompletedWork, ExecCtx, Executor, ExecutorHandle, ExecutorStats, WorkHandle, WorkState};
pub use registry::{HandlerFn, OperationDef, ParamKind, ParamSpec, Registry};
pub use revision::RevisionTracker;
pub use transaction::TransactionOutcome;
