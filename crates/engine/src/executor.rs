//! The single serialized execution context.
//!
//! The host API is documented as unsafe to call concurrently or from a
//! non-designated thread, so exactly one loop task owns the host state and
//! runs work items strictly in submission order, each to completion. This is
//! a design invariant enforced by construction: the host value moves into the
//! loop task and never leaves it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use armature_proto::{OpCall, Params, ResourceId, Revision};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::queue::{self, QueueError, QueueSender};
use crate::revision::RevisionTracker;

/// Execution context handed to every handler.
///
/// Only ever constructed inside the executor loop, which is what makes
/// mutating calls on `host` safe without locking.
pub struct ExecCtx<'a, H> {
	/// The host's object graph (exclusively owned by the executor).
	pub host: &'a mut H,
	/// Revision tracker. Handlers read it; stamping is done by the executor
	/// after the handler reports a mutation.
	pub revisions: &'a RevisionTracker,
}

/// What a handler reports back after running.
#[derive(Debug, Clone)]
pub struct Applied {
	/// Result value returned to the caller.
	pub value: Value,
	/// Resource this call mutated, if any. Drives revision stamping.
	pub mutated: Option<ResourceId>,
	/// Inverse call that undoes this step, used for transaction compensation.
	pub undo: Option<OpCall>,
}

impl Applied {
	/// A read-only result: no mutation, no inverse.
	#[must_use]
	pub fn value(value: Value) -> Self {
		Self {
			value,
			mutated: None,
			undo: None,
		}
	}

	/// A committed mutation of `resource`.
	#[must_use]
	pub fn mutation(value: Value, resource: ResourceId) -> Self {
		Self {
			value,
			mutated: Some(resource),
			undo: None,
		}
	}

	/// Attaches the inverse call for compensation.
	#[must_use]
	pub fn with_undo(mut self, method: impl Into<String>, params: Params) -> Self {
		self.undo = Some(OpCall {
			method: method.into(),
			params,
		});
		self
	}
}

/// A finished work item as delivered to the waiting caller.
#[derive(Debug, Clone)]
pub struct CompletedWork {
	/// Handler result value.
	pub value: Value,
	/// Revision stamped for the mutated resource, if the item mutated one.
	pub revision: Option<Revision>,
	/// Inverse call reported by the handler, if any.
	pub undo: Option<OpCall>,
}

/// Lifecycle of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
	/// Accepted, not yet started.
	Queued,
	/// Currently executing on the executor loop.
	Running,
	/// Finished successfully.
	Done,
	/// Handler reported an error (or panicked).
	Failed,
	/// The caller's completion ceiling elapsed; the item is abandoned.
	TimedOut,
}

impl WorkState {
	/// Short name for log fields.
	#[must_use]
	pub fn name(self) -> &'static str {
		match self {
			Self::Queued => "queued",
			Self::Running => "running",
			Self::Done => "done",
			Self::Failed => "failed",
			Self::TimedOut => "timed_out",
		}
	}
}

/// State shared between the executor loop and the waiting caller.
pub(crate) struct WorkShared {
	pub(crate) label: String,
	state: Mutex<WorkState>,
	abandoned: AtomicBool,
	pub(crate) submitted_at: Instant,
}

impl WorkShared {
	fn new(label: String) -> Self {
		Self {
			label,
			state: Mutex::new(WorkState::Queued),
			abandoned: AtomicBool::new(false),
			submitted_at: Instant::now(),
		}
	}

	pub(crate) fn state(&self) -> WorkState {
		*self.state.lock().unwrap()
	}

	/// Transitions state. A `TimedOut` mark is caller-visible and permanent;
	/// the executor's later transitions must not overwrite it.
	fn set_state(&self, next: WorkState) {
		let mut state = self.state.lock().unwrap();
		if *state != WorkState::TimedOut {
			*state = next;
		}
	}

	/// Marks the item abandoned by its caller.
	pub(crate) fn abandon(&self) {
		self.abandoned.store(true, Ordering::Release);
		let mut state = self.state.lock().unwrap();
		if matches!(*state, WorkState::Queued | WorkState::Running) {
			*state = WorkState::TimedOut;
		}
	}

	pub(crate) fn is_abandoned(&self) -> bool {
		self.abandoned.load(Ordering::Acquire)
	}
}

/// Executor throughput counters, readable from any context.
#[derive(Debug, Default)]
pub struct ExecutorStats {
	accepted: AtomicU64,
	executed: AtomicU64,
	failed: AtomicU64,
	discarded: AtomicU64,
}

impl ExecutorStats {
	/// Items accepted into the queue.
	pub fn accepted(&self) -> u64 {
		self.accepted.load(Ordering::Relaxed)
	}

	/// Items run to completion (successes and failures both).
	pub fn executed(&self) -> u64 {
		self.executed.load(Ordering::Relaxed)
	}

	/// Items whose handler reported an error or panicked.
	pub fn failed(&self) -> u64 {
		self.failed.load(Ordering::Relaxed)
	}

	/// Results discarded because the caller had abandoned or disconnected.
	pub fn discarded(&self) -> u64 {
		self.discarded.load(Ordering::Relaxed)
	}
}

type Job<H> = Box<dyn FnOnce(&mut ExecCtx<'_, H>) -> std::result::Result<Applied, String> + Send>;

struct WorkItem<H> {
	shared: Arc<WorkShared>,
	job: Job<H>,
	done_tx: oneshot::Sender<Result<CompletedWork>>,
}

/// Opaque handle to a submitted work item.
///
/// The executor owns the item itself; the submitting context only observes
/// state and awaits completion through this handle.
pub struct WorkHandle {
	pub(crate) shared: Arc<WorkShared>,
	pub(crate) done_rx: oneshot::Receiver<Result<CompletedWork>>,
}

impl WorkHandle {
	/// Current lifecycle state.
	#[must_use]
	pub fn state(&self) -> WorkState {
		self.shared.state()
	}
}

/// The single-consumer execution loop.
pub struct Executor;

/// Cloneable submission handle to the executor.
pub struct ExecutorHandle<H> {
	tx: QueueSender<WorkItem<H>>,
	depth: usize,
	stats: Arc<ExecutorStats>,
}

impl<H> Clone for ExecutorHandle<H> {
	fn clone(&self) -> Self {
		Self {
			tx: self.tx.clone(),
			depth: self.depth,
			stats: Arc::clone(&self.stats),
		}
	}
}

impl Executor {
	/// Spawns the executor loop owning `host`.
	///
	/// Cancelling `shutdown` closes the queue; items already accepted still
	/// run to completion (the host's state must stay consistent) before the
	/// loop exits.
	pub fn spawn<H>(
		mut host: H,
		revisions: RevisionTracker,
		config: &EngineConfig,
		shutdown: CancellationToken,
	) -> ExecutorHandle<H>
	where
		H: Send + 'static,
	{
		let (tx, rx) = queue::bounded::<WorkItem<H>>(config.queue_depth);
		let stats = Arc::new(ExecutorStats::default());

		let loop_tx = tx.clone();
		let loop_stats = Arc::clone(&stats);
		tokio::spawn(async move {
			loop {
				let item = tokio::select! {
					biased;
					_ = shutdown.cancelled() => break,
					maybe_item = rx.recv() => {
						let Some(item) = maybe_item else { break };
						item
					}
				};
				run_item(&mut host, &revisions, &loop_stats, item);
			}

			// Shutdown: stop accepting, then drain what was already queued.
			loop_tx.close();
			while let Some(item) = rx.recv().await {
				run_item(&mut host, &revisions, &loop_stats, item);
			}
			tracing::info!("executor drained and stopped");
		});

		ExecutorHandle {
			tx,
			depth: config.queue_depth,
			stats,
		}
	}
}

impl<H> ExecutorHandle<H> {
	/// Submits a job for serialized execution.
	///
	/// Fails with `Busy` when the queue is at its configured depth and with
	/// `Shutdown` once the executor no longer accepts work. Never blocks.
	pub fn submit<F>(&self, label: impl Into<String>, job: F) -> Result<WorkHandle>
	where
		F: FnOnce(&mut ExecCtx<'_, H>) -> std::result::Result<Applied, String> + Send + 'static,
	{
		let (done_tx, done_rx) = oneshot::channel();
		let shared = Arc::new(WorkShared::new(label.into()));
		let item = WorkItem {
			shared: Arc::clone(&shared),
			job: Box::new(job),
			done_tx,
		};
		self.tx.try_send(item).map_err(|err| match err {
			QueueError::Full => EngineError::Busy { depth: self.depth },
			QueueError::Closed => EngineError::Shutdown,
		})?;
		self.stats.accepted.fetch_add(1, Ordering::Relaxed);
		Ok(WorkHandle { shared, done_rx })
	}

	/// Executor throughput counters.
	#[must_use]
	pub fn stats(&self) -> &ExecutorStats {
		&self.stats
	}

	/// Current submission queue length.
	#[must_use]
	pub fn queue_len(&self) -> usize {
		self.tx.len()
	}

	/// Configured queue depth.
	#[must_use]
	pub fn depth(&self) -> usize {
		self.depth
	}
}

/// Runs one item to completion and delivers (or discards) its result.
fn run_item<H>(host: &mut H, revisions: &RevisionTracker, stats: &ExecutorStats, item: WorkItem<H>) {
	item.shared.set_state(WorkState::Running);
	tracing::debug!(label = %item.shared.label, "work item running");

	let mut ctx = ExecCtx { host, revisions };
	let job = item.job;
	let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| job(&mut ctx)));
	stats.executed.fetch_add(1, Ordering::Relaxed);

	let result = match outcome {
		Ok(Ok(applied)) => {
			// Stamping happens here, inside the serialized context, so no
			// concurrent increment is ever possible.
			let revision = applied.mutated.as_ref().map(|res| revisions.stamp(res));
			item.shared.set_state(WorkState::Done);
			Ok(CompletedWork {
				value: applied.value,
				revision,
				undo: applied.undo,
			})
		}
		Ok(Err(message)) => {
			item.shared.set_state(WorkState::Failed);
			stats.failed.fetch_add(1, Ordering::Relaxed);
			Err(EngineError::Handler(message))
		}
		Err(_) => {
			item.shared.set_state(WorkState::Failed);
			stats.failed.fetch_add(1, Ordering::Relaxed);
			tracing::error!(label = %item.shared.label, "handler panicked");
			Err(EngineError::Handler("handler panicked".into()))
		}
	};

	if item.shared.is_abandoned() {
		stats.discarded.fetch_add(1, Ordering::Relaxed);
		tracing::warn!(
			label = %item.shared.label,
			elapsed_ms = item.shared.submitted_at.elapsed().as_millis() as u64,
			ok = result.is_ok(),
			"work item completed after caller abandoned it; result discarded"
		);
	} else if item.done_tx.send(result).is_err() {
		stats.discarded.fetch_add(1, Ordering::Relaxed);
		tracing::debug!(label = %item.shared.label, "caller disconnected; result discarded");
	}
}
