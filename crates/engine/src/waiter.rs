//! Completion waiting with bounded time and progress visibility.
//!
//! Waiting happens on the caller's own task, never on the executor loop, so
//! any number of clients can wait concurrently without blocking each other.
//! A caller that gives up abandons the item: the executor still runs it to
//! completion (host consistency) but discards the result.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{EngineError, Result};
use crate::executor::{CompletedWork, WorkHandle};

impl WorkHandle {
	/// Waits for the work item with a completion ceiling.
	///
	/// While waiting, a progress notice with the elapsed time and the item's
	/// current state is logged every `progress_every`. On timeout the item is
	/// marked abandoned and `TimedOut` is returned; if the executor later
	/// finishes the item anyway, its result is discarded and the discrepancy
	/// logged, so the caller never sees a second answer.
	pub async fn wait(mut self, timeout: Duration, progress_every: Duration) -> Result<CompletedWork> {
		let deadline = Instant::now() + timeout;
		let mut progress = tokio::time::interval_at(Instant::now() + progress_every, progress_every);

		loop {
			tokio::select! {
				result = &mut self.done_rx => {
					return match result {
						Ok(outcome) => outcome,
						// The executor dropped the item without answering:
						// it is shutting down.
						Err(_) => Err(EngineError::Shutdown),
					};
				}
				_ = progress.tick() => {
					tracing::info!(
						label = %self.shared.label,
						state = self.shared.state().name(),
						elapsed_ms = self.shared.submitted_at.elapsed().as_millis() as u64,
						"still waiting on work item"
					);
				}
				_ = tokio::time::sleep_until(deadline) => {
					self.shared.abandon();
					let elapsed_ms = self.shared.submitted_at.elapsed().as_millis() as u64;
					tracing::warn!(
						label = %self.shared.label,
						elapsed_ms,
						"completion ceiling elapsed; abandoning work item"
					);
					return Err(EngineError::TimedOut { elapsed_ms });
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tokio_util::sync::CancellationToken;

	use super::*;
	use crate::config::EngineConfig;
	use crate::executor::{Applied, Executor, ExecutorHandle, WorkState};
	use crate::revision::RevisionTracker;

	fn spawn_executor() -> ExecutorHandle<()> {
		Executor::spawn(
			(),
			RevisionTracker::new(),
			&EngineConfig::default(),
			CancellationToken::new(),
		)
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn completes_before_ceiling() {
		let exec = spawn_executor();
		let handle = exec.submit("test.fast", |_ctx| Ok(Applied::value(json!(7)))).unwrap();

		let done = handle
			.wait(Duration::from_secs(1), Duration::from_millis(100))
			.await
			.unwrap();
		assert_eq!(done.value, json!(7));
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn times_out_at_ceiling_and_discards_the_late_result() {
		let exec = spawn_executor();
		let handle = exec
			.submit("test.slow", |_ctx| {
				std::thread::sleep(Duration::from_millis(150));
				Ok(Applied::value(json!("late")))
			})
			.unwrap();
		let shared = std::sync::Arc::clone(&handle.shared);

		let err = handle
			.wait(Duration::from_millis(40), Duration::from_millis(10))
			.await
			.unwrap_err();
		assert!(matches!(err, EngineError::TimedOut { .. }));
		assert_eq!(shared.state(), WorkState::TimedOut);

		// Let the handler actually finish: the executor must discard the
		// result rather than answer a caller that already got a timeout.
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert_eq!(exec.stats().executed(), 1);
		assert_eq!(exec.stats().discarded(), 1);
		// The timeout mark stays; the late completion does not rewrite it.
		assert_eq!(shared.state(), WorkState::TimedOut);
	}

	/// Counts info-level events emitted by whatever future it is attached to.
	struct NoticeCounter(std::sync::Arc<std::sync::atomic::AtomicUsize>);

	impl tracing::Subscriber for NoticeCounter {
		fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
			true
		}

		fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
			tracing::span::Id::from_u64(1)
		}

		fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

		fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

		fn event(&self, event: &tracing::Event<'_>) {
			if *event.metadata().level() == tracing::Level::INFO {
				self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			}
		}

		fn enter(&self, _: &tracing::span::Id) {}

		fn exit(&self, _: &tracing::span::Id) {}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn progress_notices_fire_while_waiting() {
		use tracing::instrument::WithSubscriber;

		let exec = spawn_executor();
		let handle = exec
			.submit("test.slow", |_ctx| {
				std::thread::sleep(Duration::from_millis(120));
				Ok(Applied::value(json!(null)))
			})
			.unwrap();

		let notices = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
		let done = handle
			.wait(Duration::from_secs(2), Duration::from_millis(15))
			.with_subscriber(NoticeCounter(std::sync::Arc::clone(&notices)))
			.await
			.unwrap();

		assert_eq!(done.value, json!(null));
		assert!(
			notices.load(std::sync::atomic::Ordering::SeqCst) >= 2,
			"expected periodic notices during a 120ms wait with a 15ms interval"
		);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn timeout_of_one_caller_leaves_others_unaffected() {
		let exec = spawn_executor();

		let slow = exec
			.submit("test.slow", |_ctx| {
				std::thread::sleep(Duration::from_millis(100));
				Ok(Applied::value(json!(null)))
			})
			.unwrap();
		let fast = exec.submit("test.fast", |_ctx| Ok(Applied::value(json!("b")))).unwrap();

		let (slow_res, fast_res) = tokio::join!(
			slow.wait(Duration::from_millis(30), Duration::from_millis(10)),
			fast.wait(Duration::from_secs(2), Duration::from_millis(100)),
		);

		assert!(matches!(slow_res, Err(EngineError::TimedOut { .. })));
		// B still gets its answer after normal FIFO queueing behind A.
		assert_eq!(fast_res.unwrap().value, json!("b"));
	}
}
