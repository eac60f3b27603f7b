//! Multi-step atomicity via compensating actions.
//!
//! The host has no native transaction concept, so rollback is synthesized
//! here: every applied step contributes an inverse call to an undo stack, and
//! on failure the stack is unwound last-applied-first. Compensation is
//! best-effort by design. Each inverse gets exactly one attempt, no retry:
//! the host offers no idempotence guarantees, so retrying a half-applied
//! inverse can widen the damage. When rollback cannot restore the
//! pre-transaction state, the error says so loudly instead of reporting a
//! clean failure.

use armature_proto::{OpCall, ResourceId, Revision};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::dispatch::execute_call;
use crate::error::{CompensationFailure, EngineError, Result, Rollback, TransactionError};
use crate::executor::{Applied, ExecutorHandle};
use crate::registry::Registry;
use crate::revision::RevisionTracker;

/// Result of a fully-applied transaction.
///
/// Both revisions are returned so the caller can audit exactly what changed.
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
	/// Value returned by the final step.
	pub value: Value,
	/// Resource revision recorded before the first step.
	pub revision_before: Revision,
	/// Resource revision after the last step.
	pub revision_after: Revision,
}

/// Runs an ordered sequence of handler calls against one resource,
/// all-or-nothing.
///
/// Steps are individual executor submissions, so other clients' work may
/// interleave between them; the revision counter is what makes that partial
/// state detectable. Compensation calls are submitted after the failed step
/// and therefore serialize behind it in the global FIFO: by the time an
/// inverse runs, the step it undoes has finished, even if its caller had
/// already timed out.
pub async fn run<H: Send + 'static>(
	registry: &Registry<H>,
	executor: &ExecutorHandle<H>,
	revisions: &RevisionTracker,
	config: &EngineConfig,
	resource: &ResourceId,
	steps: &[OpCall],
) -> Result<TransactionOutcome> {
	let r0 = revisions.current(resource);
	let baseline = r0.unwrap_or_default();

	let mut undo_stack: Vec<(usize, OpCall)> = Vec::new();
	let mut missing_inverse: Vec<usize> = Vec::new();
	let mut last_value = Value::Null;

	for (index, step) in steps.iter().enumerate() {
		match execute_call(registry, executor, step, config.step_timeout, config.progress_interval).await {
			Ok(done) => {
				last_value = done.value;
				match done.undo {
					Some(undo) => undo_stack.push((index, undo)),
					// A mutating step without an inverse cannot be walked
					// back; remember that in case a later step fails.
					None if done.revision.is_some() => missing_inverse.push(index),
					None => {}
				}
			}
			Err(cause) => {
				// A step that timed out (or was cut off by shutdown) has an
				// unknown outcome: the abandoned item may still apply its
				// mutation, and its inverse is discarded with the result. It
				// cannot be walked back, same as a mutation with no declared
				// inverse.
				if matches!(cause, EngineError::TimedOut { .. } | EngineError::Shutdown) {
					missing_inverse.push(index);
				}
				tracing::warn!(
					resource = %resource,
					step = index,
					method = %step.method,
					error = %cause,
					"transaction step failed; compensating"
				);
				let rollback = compensate(
					registry,
					executor,
					revisions,
					config,
					resource,
					r0,
					undo_stack,
					missing_inverse,
				)
				.await;
				return Err(EngineError::Transaction(Box::new(TransactionError {
					failed_step: index,
					cause: Box::new(cause),
					rollback,
				})));
			}
		}
	}

	let revision_after = revisions.current(resource).unwrap_or_default();
	Ok(TransactionOutcome {
		value: last_value,
		revision_before: baseline,
		revision_after,
	})
}

/// Unwinds the undo stack in reverse order and audits the revision.
#[allow(clippy::too_many_arguments)]
async fn compensate<H: Send + 'static>(
	registry: &Registry<H>,
	executor: &ExecutorHandle<H>,
	revisions: &RevisionTracker,
	config: &EngineConfig,
	resource: &ResourceId,
	r0: Option<Revision>,
	undo_stack: Vec<(usize, OpCall)>,
	missing_inverse: Vec<usize>,
) -> Rollback {
	let mut failures: Vec<CompensationFailure> = Vec::new();

	for (step, undo) in undo_stack.into_iter().rev() {
		if let Err(err) = execute_call(registry, executor, &undo, config.step_timeout, config.progress_interval).await {
			tracing::error!(
				resource = %resource,
				step,
				method = %undo.method,
				error = %err,
				"compensating action failed; resource may be inconsistent"
			);
			failures.push(CompensationFailure {
				step,
				method: undo.method,
				reason: err.to_string(),
			});
		}
	}

	if failures.is_empty() && missing_inverse.is_empty() {
		// Every applied step was walked back; restore the counter so a rolled
		// back transaction leaves the revision exactly as found. Done inside
		// the executor context like any other counter write.
		let audit_resource = resource.clone();
		let audit = executor.submit("transaction.rollback_audit", move |ctx| {
			match r0 {
				Some(revision) => ctx.revisions.restore(&audit_resource, revision),
				None => ctx.revisions.forget(&audit_resource),
			}
			Ok(Applied::value(Value::Null))
		});
		match audit {
			Ok(handle) => {
				if let Err(err) = handle.wait(config.step_timeout, config.progress_interval).await {
					failures.push(CompensationFailure {
						step: usize::MAX,
						method: "transaction.rollback_audit".into(),
						reason: err.to_string(),
					});
				}
			}
			Err(err) => {
				failures.push(CompensationFailure {
					step: usize::MAX,
					method: "transaction.rollback_audit".into(),
					reason: err.to_string(),
				});
			}
		}
	}

	// A failed restore lands in `failures` above, so this check also covers
	// the counter write itself.
	if failures.is_empty() && missing_inverse.is_empty() {
		Rollback::Complete {
			revision: r0.unwrap_or_default(),
		}
	} else {
		Rollback::Incomplete {
			failures,
			missing_inverse,
			observed: revisions.current(resource).unwrap_or_default(),
			expected: r0.unwrap_or_default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use armature_proto::Params;
	use serde_json::json;
	use tokio_util::sync::CancellationToken;

	use super::*;
	use crate::executor::Executor;
	use crate::registry::{ParamKind, ParamSpec};

	/// Host stand-in: one resource holding an ordered list of entity names.
	#[derive(Default)]
	struct Model {
		entities: Vec<String>,
	}

	const RES: &str = "sketch-1";

	fn params(value: serde_json::Value) -> Params {
		value.as_object().unwrap().clone()
	}

	fn call(method: &str, value: serde_json::Value) -> OpCall {
		OpCall {
			method: method.into(),
			params: params(value),
		}
	}

	fn test_registry() -> Registry<Model> {
		let mut registry = Registry::<Model>::new();

		// Mutating op with a proper inverse.
		registry.register(
			"ent.add",
			vec![ParamSpec::required("name", ParamKind::String)],
			|ctx, p| {
				let name = p["name"].as_str().unwrap_or_default().to_string();
				ctx.host.entities.push(name.clone());
				Ok(Applied::mutation(json!({"added": name.clone()}), ResourceId::new(RES))
					.with_undo("ent.remove", params(json!({"name": name}))))
			},
		);
		registry.register(
			"ent.remove",
			vec![ParamSpec::required("name", ParamKind::String)],
			|ctx, p| {
				let name = p["name"].as_str().unwrap_or_default();
				match ctx.host.entities.iter().rposition(|e| e == name) {
					Some(pos) => {
						ctx.host.entities.remove(pos);
						Ok(Applied::mutation(json!({"removed": name}), ResourceId::new(RES)))
					}
					None => Err(format!("entity not found: {name}")),
				}
			},
		);
		// Mutating op slow enough to outlive a short completion ceiling.
		registry.register(
			"ent.add_slow",
			vec![ParamSpec::required("name", ParamKind::String)],
			|ctx, p| {
				std::thread::sleep(Duration::from_millis(150));
				let name = p["name"].as_str().unwrap_or_default().to_string();
				ctx.host.entities.push(name.clone());
				Ok(Applied::mutation(json!(null), ResourceId::new(RES))
					.with_undo("ent.remove", params(json!({"name": name}))))
			},
		);
		// Mutating op whose inverse always fails.
		registry.register(
			"ent.add_sticky",
			vec![ParamSpec::required("name", ParamKind::String)],
			|ctx, p| {
				let name = p["name"].as_str().unwrap_or_default().to_string();
				ctx.host.entities.push(name);
				Ok(Applied::mutation(json!(null), ResourceId::new(RES))
					.with_undo("ent.remove", params(json!({"name": "no-such-entity"}))))
			},
		);
		// Mutating op that declares no inverse at all.
		registry.register("ent.add_permanent", vec![], |ctx, _p| {
			ctx.host.entities.push("permanent".into());
			Ok(Applied::mutation(json!(null), ResourceId::new(RES)))
		});
		registry.register("ent.count", vec![], |ctx, _p| Ok(Applied::value(json!(ctx.host.entities.len()))));
		registry.register("ent.fail", vec![], |_ctx, _p| Err("solver diverged".to_string()));
		registry
	}

	struct Fixture {
		registry: Registry<Model>,
		executor: ExecutorHandle<Model>,
		revisions: RevisionTracker,
		config: EngineConfig,
		resource: ResourceId,
	}

	fn fixture_with(config: EngineConfig) -> Fixture {
		let revisions = RevisionTracker::new();
		let resource = ResourceId::new(RES);
		revisions.register(&resource);
		let executor = Executor::spawn(Model::default(), revisions.clone(), &config, CancellationToken::new());
		Fixture {
			registry: test_registry(),
			executor,
			revisions,
			config,
			resource,
		}
	}

	fn fixture() -> Fixture {
		fixture_with(EngineConfig::default())
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn full_success_reports_both_revisions() {
		let fx = fixture();
		let steps = vec![
			call("ent.add", json!({"name": "base"})),
			call("ent.add", json!({"name": "hole"})),
			call("ent.count", json!({})),
		];

		let outcome = run(&fx.registry, &fx.executor, &fx.revisions, &fx.config, &fx.resource, &steps)
			.await
			.unwrap();

		assert_eq!(outcome.value, json!(2));
		assert_eq!(outcome.revision_before, Revision(0));
		assert_eq!(outcome.revision_after, Revision(2));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn failed_step_rolls_back_in_reverse_and_restores_revision() {
		let fx = fixture();
		let steps = vec![
			call("ent.add", json!({"name": "base"})),
			call("ent.add", json!({"name": "hole"})),
			call("ent.fail", json!({})),
		];

		let err = run(&fx.registry, &fx.executor, &fx.revisions, &fx.config, &fx.resource, &steps)
			.await
			.unwrap_err();

		let EngineError::Transaction(txn) = err else {
			panic!("expected transaction error");
		};
		assert_eq!(txn.failed_step, 2);
		assert!(matches!(txn.cause.as_ref(), EngineError::Handler(msg) if msg.contains("solver diverged")));
		assert!(txn.rollback.is_complete());
		// Revision is back exactly where it started.
		assert_eq!(fx.revisions.current(&fx.resource), Some(Revision(0)));

		// Host state is empty again: a fresh count sees zero entities.
		let count = execute_call(
			&fx.registry,
			&fx.executor,
			&call("ent.count", json!({})),
			fx.config.step_timeout,
			fx.config.progress_interval,
		)
		.await
		.unwrap();
		assert_eq!(count.value, json!(0));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn failing_compensation_is_reported_not_hidden() {
		let fx = fixture();
		let steps = vec![
			call("ent.add_sticky", json!({"name": "stuck"})),
			call("ent.fail", json!({})),
		];

		let err = run(&fx.registry, &fx.executor, &fx.revisions, &fx.config, &fx.resource, &steps)
			.await
			.unwrap_err();

		let EngineError::Transaction(txn) = &err else {
			panic!("expected transaction error");
		};
		assert_eq!(txn.failed_step, 1);
		let Rollback::Incomplete { failures, .. } = &txn.rollback else {
			panic!("expected incomplete rollback");
		};
		assert_eq!(failures.len(), 1);
		assert_eq!(failures[0].step, 0);
		assert!(failures[0].reason.contains("entity not found"));

		// The wire code must be the loud one.
		assert_eq!(err.to_wire().code, armature_proto::ErrorCode::CompensationIncomplete);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn mutation_without_inverse_flags_incomplete_rollback() {
		let fx = fixture();
		let steps = vec![call("ent.add_permanent", json!({})), call("ent.fail", json!({}))];

		let err = run(&fx.registry, &fx.executor, &fx.revisions, &fx.config, &fx.resource, &steps)
			.await
			.unwrap_err();

		let EngineError::Transaction(txn) = err else {
			panic!("expected transaction error");
		};
		let Rollback::Incomplete {
			missing_inverse,
			observed,
			expected,
			..
		} = txn.rollback
		else {
			panic!("expected incomplete rollback");
		};
		assert_eq!(missing_inverse, vec![0]);
		assert_eq!(expected, Revision(0));
		// The un-undoable mutation is still visible in the counter.
		assert_eq!(observed, Revision(1));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn timed_out_step_is_never_reported_as_rolled_back() {
		let fx = fixture_with(EngineConfig {
			step_timeout: Duration::from_millis(40),
			..EngineConfig::default()
		});
		let steps = vec![
			call("ent.add", json!({"name": "base"})),
			call("ent.add_slow", json!({"name": "ghost"})),
		];

		let err = run(&fx.registry, &fx.executor, &fx.revisions, &fx.config, &fx.resource, &steps)
			.await
			.unwrap_err();

		let EngineError::Transaction(txn) = err else {
			panic!("expected transaction error");
		};
		assert_eq!(txn.failed_step, 1);
		assert!(matches!(txn.cause.as_ref(), EngineError::TimedOut { .. }));
		let Rollback::Incomplete { missing_inverse, .. } = &txn.rollback else {
			panic!("a timed-out step must not report a clean rollback");
		};
		assert!(missing_inverse.contains(&1));

		// The abandoned step still runs to completion, then the compensation
		// for the first step drains behind it in FIFO order: the late
		// mutation survives and the revision stays off its starting value.
		tokio::time::sleep(Duration::from_millis(400)).await;
		assert_ne!(fx.revisions.current(&fx.resource), Some(Revision(0)));
		let count = execute_call(
			&fx.registry,
			&fx.executor,
			&call("ent.count", json!({})),
			Duration::from_secs(1),
			Duration::from_millis(100),
		)
		.await
		.unwrap();
		assert_eq!(count.value, json!(1));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn unknown_step_method_fails_before_touching_the_resource() {
		let fx = fixture();
		let steps = vec![call("ent.extrude", json!({}))];

		let err = run(&fx.registry, &fx.executor, &fx.revisions, &fx.config, &fx.resource, &steps)
			.await
			.unwrap_err();

		let EngineError::Transaction(txn) = err else {
			panic!("expected transaction error");
		};
		assert!(matches!(txn.cause.as_ref(), EngineError::MethodNotFound(m) if m == "ent.extrude"));
		assert!(txn.rollback.is_complete());
		assert_eq!(fx.executor.stats().failed(), 0);
	}
}
