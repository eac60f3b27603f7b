//! Error taxonomy for the marshaling engine.
//!
//! Validation errors (`MethodNotFound`, `MissingField`, `TypeMismatch`) are
//! produced before a request ever reaches the executor. Execution errors are
//! captured per work item and never crash the executor loop. Transaction
//! errors always report both the triggering failure and the rollback outcome.

use armature_proto::{ErrorCode, Revision, WireError};
use serde_json::{Value, json};
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Everything that can go wrong between accepting a request and answering it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
	/// No handler registered under this method name.
	#[error("unknown method: {0}")]
	MethodNotFound(String),

	/// A declared required parameter is absent.
	#[error("missing required field: {field}")]
	MissingField {
		/// Dotted path of the missing field.
		field: String,
	},

	/// A parameter is present but has the wrong JSON type.
	#[error("field `{field}` has the wrong type (expected {expected})")]
	TypeMismatch {
		/// Dotted path of the offending field.
		field: String,
		/// Human-readable expected type.
		expected: &'static str,
	},

	/// The submission queue is at its configured depth.
	#[error("executor queue is full (depth {depth})")]
	Busy {
		/// Configured queue depth that was exceeded.
		depth: usize,
	},

	/// The handler reported a failure while running inside the executor.
	#[error("handler failed: {0}")]
	Handler(String),

	/// The completion ceiling elapsed before the work item finished.
	#[error("timed out after {elapsed_ms} ms")]
	TimedOut {
		/// Time spent waiting, in milliseconds.
		elapsed_ms: u64,
	},

	/// A multi-step operation failed; see [`TransactionError`] for the
	/// rollback outcome.
	#[error(transparent)]
	Transaction(Box<TransactionError>),

	/// The executor has shut down and no longer accepts or answers work.
	#[error("executor is shutting down")]
	Shutdown,
}

/// A multi-step operation failed and compensation ran.
///
/// Carries the original failure (which is what the caller is told about) and
/// the rollback outcome. `CompensationIncomplete` conditions are never
/// downgraded: if the resource could not be walked back to its pre-transaction
/// revision, [`Rollback::Incomplete`] says so explicitly.
#[derive(Debug, Clone, Error)]
#[error("transaction step {failed_step} failed: {cause}")]
pub struct TransactionError {
	/// Zero-based index of the step that failed.
	pub failed_step: usize,
	/// The failure that triggered rollback.
	pub cause: Box<EngineError>,
	/// What compensation achieved.
	pub rollback: Rollback,
}

/// Outcome of running the compensation stack.
#[derive(Debug, Clone)]
pub enum Rollback {
	/// Every compensating action applied and the resource's revision was
	/// audited back to its pre-transaction value.
	Complete {
		/// Revision observed after rollback (equals the pre-transaction value).
		revision: Revision,
	},
	/// Rollback itself partially failed; the resource may be in an
	/// inconsistent state.
	Incomplete {
		/// Per-step compensation failures, in the order they were attempted.
		failures: Vec<CompensationFailure>,
		/// Applied steps that declared no inverse and could not be undone.
		missing_inverse: Vec<usize>,
		/// Revision observed after the rollback attempt.
		observed: Revision,
		/// Revision the rollback was expected to restore.
		expected: Revision,
	},
}

impl Rollback {
	/// Returns true when the resource was restored to its prior state.
	#[must_use]
	pub fn is_complete(&self) -> bool {
		matches!(self, Self::Complete { .. })
	}
}

/// One compensating action that failed to apply.
#[derive(Debug, Clone)]
pub struct CompensationFailure {
	/// Index of the originally applied step being undone.
	pub step: usize,
	/// Method name of the inverse call.
	pub method: String,
	/// Why the inverse call failed.
	pub reason: String,
}

impl EngineError {
	/// Maps this error onto the wire representation.
	///
	/// Transaction failures pick their code from the rollback outcome so a
	/// partially-failed rollback is always loudly labeled.
	#[must_use]
	pub fn to_wire(&self) -> WireError {
		let code = match self {
			Self::MethodNotFound(_) => ErrorCode::MethodNotFound,
			Self::MissingField { .. } | Self::TypeMismatch { .. } => ErrorCode::InvalidParams,
			Self::Busy { .. } => ErrorCode::Busy,
			Self::Handler(_) => ErrorCode::Internal,
			Self::TimedOut { .. } => ErrorCode::TimedOut,
			Self::Transaction(err) => {
				if err.rollback.is_complete() {
					ErrorCode::TransactionFailed
				} else {
					ErrorCode::CompensationIncomplete
				}
			}
			Self::Shutdown => ErrorCode::ShuttingDown,
		};

		let data = match self {
			Self::Transaction(err) => Some(transaction_detail(err)),
			_ => None,
		};

		WireError {
			code,
			message: self.to_string(),
			data,
		}
	}
}

/// Structured detail attached to transaction error responses.
fn transaction_detail(err: &TransactionError) -> Value {
	match &err.rollback {
		Rollback::Complete { revision } => json!({
			"failed_step": err.failed_step,
			"rolled_back": true,
			"revision": revision.0,
		}),
		Rollback::Incomplete {
			failures,
			missing_inverse,
			observed,
			expected,
		} => json!({
			"failed_step": err.failed_step,
			"rolled_back": false,
			"revision_observed": observed.0,
			"revision_expected": expected.0,
			"missing_inverse": missing_inverse,
			"compensation_failures": failures
				.iter()
				.map(|f| json!({ "step": f.step, "method": f.method, "reason": f.reason }))
				.collect::<Vec<_>>(),
		}),
	}
}
