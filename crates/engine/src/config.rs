//! Engine tunables.

use std::time::Duration;

/// Policy values for the executor, waiter and transaction manager.
///
/// These are policy, not architecture: the queue depth bounds memory under
/// load, and the timeouts bound how long a caller is left without an answer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Maximum number of queued work items before submissions are rejected
	/// with `Busy`.
	pub queue_depth: usize,
	/// Completion ceiling for a single operation.
	pub wait_timeout: Duration,
	/// Completion ceiling for each step of a multi-step transaction.
	pub step_timeout: Duration,
	/// Interval between progress notices while a caller is waiting.
	pub progress_interval: Duration,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			queue_depth: 64,
			wait_timeout: Duration::from_secs(30),
			step_timeout: Duration::from_secs(30),
			progress_interval: Duration::from_secs(5),
		}
	}
}
