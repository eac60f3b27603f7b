//! Request dispatcher: the funnel from many client tasks into the one
//! serialized executor.
//!
//! Per request: route the `transaction.run` built-in, otherwise look the
//! method up, validate its parameter shape, submit, wait and encode. Every
//! request gets exactly one response; nothing in here can leave a caller
//! hanging short of the whole process going down.

use std::sync::Arc;
use std::time::Duration;

use armature_proto::{OpCall, Params, Request, Response, ResourceId};
use serde_json::{Value, json};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{CompletedWork, ExecutorHandle};
use crate::registry::Registry;
use crate::revision::RevisionTracker;
use crate::transaction;

/// Method name reserved for the transaction built-in.
pub const TRANSACTION_METHOD: &str = "transaction.run";

/// Looks up, validates and runs one handler call, waiting for completion.
///
/// Shape validation happens here, on the caller's task, so malformed calls
/// never consume executor time.
pub(crate) async fn execute_call<H: Send + 'static>(
	registry: &Registry<H>,
	executor: &ExecutorHandle<H>,
	call: &OpCall,
	timeout: Duration,
	progress_every: Duration,
) -> Result<CompletedWork> {
	let op = registry.lookup(&call.method)?;
	op.validate(&call.params)?;

	let handler = op.handler();
	let params = call.params.clone();
	let handle = executor.submit(call.method.clone(), move |ctx| handler(ctx, &params))?;
	handle.wait(timeout, progress_every).await
}

/// Routes requests from any number of concurrent connections into the
/// executor.
///
/// Cheap to clone; clones share the registry, executor and revision tracker.
pub struct Dispatcher<H> {
	registry: Arc<Registry<H>>,
	executor: ExecutorHandle<H>,
	revisions: RevisionTracker,
	config: EngineConfig,
}

impl<H> Clone for Dispatcher<H> {
	fn clone(&self) -> Self {
		Self {
			registry: Arc::clone(&self.registry),
			executor: self.executor.clone(),
			revisions: self.revisions.clone(),
			config: self.config.clone(),
		}
	}
}

impl<H: Send + 'static> Dispatcher<H> {
	/// Builds a dispatcher over an already-spawned executor.
	pub fn new(registry: Registry<H>, executor: ExecutorHandle<H>, revisions: RevisionTracker, config: EngineConfig) -> Self {
		Self {
			registry: Arc::new(registry),
			executor,
			revisions,
			config,
		}
	}

	/// The operation registry.
	#[must_use]
	pub fn registry(&self) -> &Registry<H> {
		&self.registry
	}

	/// The executor submission handle.
	#[must_use]
	pub fn executor(&self) -> &ExecutorHandle<H> {
		&self.executor
	}

	/// The shared revision tracker.
	#[must_use]
	pub fn revisions(&self) -> &RevisionTracker {
		&self.revisions
	}

	/// Handles one request to a response. Infallible by contract: every
	/// failure becomes an error response carrying the request's id.
	pub async fn dispatch(&self, request: Request) -> Response {
		let id = request.id;
		let method = request.method.clone();
		match self.handle(request).await {
			Ok(value) => Response::ok(id, value),
			Err(err) => {
				tracing::debug!(id = id.0, method = %method, error = %err, "request failed");
				Response::err(id, err.to_wire())
			}
		}
	}

	async fn handle(&self, request: Request) -> Result<Value> {
		if request.method == TRANSACTION_METHOD {
			return self.run_transaction(&request.params).await;
		}

		let call = OpCall {
			method: request.method,
			params: request.params,
		};
		let done = execute_call(
			&self.registry,
			&self.executor,
			&call,
			self.config.wait_timeout,
			self.config.progress_interval,
		)
		.await?;
		Ok(done.value)
	}

	async fn run_transaction(&self, params: &Params) -> Result<Value> {
		let resource = ResourceId::new(require_str(params, "resource")?);
		let steps = parse_steps(params)?;

		let outcome = transaction::run(
			&self.registry,
			&self.executor,
			&self.revisions,
			&self.config,
			&resource,
			&steps,
		)
		.await?;

		Ok(json!({
			"result": outcome.value,
			"revision_before": outcome.revision_before.0,
			"revision_after": outcome.revision_after.0,
		}))
	}
}

fn require_str<'p>(params: &'p Params, field: &str) -> Result<&'p str> {
	match params.get(field) {
		None => Err(EngineError::MissingField { field: field.into() }),
		Some(Value::String(s)) => Ok(s),
		Some(_) => Err(EngineError::TypeMismatch {
			field: field.into(),
			expected: "string",
		}),
	}
}

/// Decodes the `steps` array, reporting dotted paths for bad elements.
fn parse_steps(params: &Params) -> Result<Vec<OpCall>> {
	let steps = match params.get("steps") {
		None => {
			return Err(EngineError::MissingField { field: "steps".into() });
		}
		Some(Value::Array(steps)) => steps,
		Some(_) => {
			return Err(EngineError::TypeMismatch {
				field: "steps".into(),
				expected: "array",
			});
		}
	};

	let mut calls = Vec::with_capacity(steps.len());
	for (index, step) in steps.iter().enumerate() {
		let Value::Object(step) = step else {
			return Err(EngineError::TypeMismatch {
				field: format!("steps[{index}]"),
				expected: "object",
			});
		};
		let method = match step.get("method") {
			None => {
				return Err(EngineError::MissingField {
					field: format!("steps[{index}].method"),
				});
			}
			Some(Value::String(method)) => method.clone(),
			Some(_) => {
				return Err(EngineError::TypeMismatch {
					field: format!("steps[{index}].method"),
					expected: "string",
				});
			}
		};
		let step_params = match step.get("params") {
			None => Params::new(),
			Some(Value::Object(map)) => map.clone(),
			Some(_) => {
				return Err(EngineError::TypeMismatch {
					field: format!("steps[{index}].params"),
					expected: "object",
				});
			}
		};
		calls.push(OpCall {
			method,
			params: step_params,
		});
	}
	Ok(calls)
}
