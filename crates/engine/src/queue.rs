//! Bounded FIFO work queue: many producers, one consumer.
//!
//! This is the fan-in point of the whole system. Producers enqueue from any
//! task and are rejected (never blocked, never silently dropped) once the
//! configured depth is reached; the single consumer drains in strict arrival
//! order. Closing the queue stops new submissions while letting the consumer
//! drain what was already accepted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Enqueue failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
	/// Queue is at capacity.
	Full,
	/// Queue has been closed.
	Closed,
}

struct QueueState<T> {
	items: VecDeque<T>,
	closed: bool,
}

struct QueueInner<T> {
	capacity: usize,
	state: Mutex<QueueState<T>>,
	notify: Notify,
}

/// Multi-producer enqueue handle.
pub struct QueueSender<T> {
	inner: Arc<QueueInner<T>>,
}

/// Single-consumer dequeue handle.
pub struct QueueReceiver<T> {
	inner: Arc<QueueInner<T>>,
}

impl<T> Clone for QueueSender<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

/// Creates a bounded FIFO queue with the given capacity.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
	assert!(capacity > 0, "queue capacity must be > 0");
	let inner = Arc::new(QueueInner {
		capacity,
		state: Mutex::new(QueueState {
			items: VecDeque::with_capacity(capacity),
			closed: false,
		}),
		notify: Notify::new(),
	});
	(
		QueueSender {
			inner: Arc::clone(&inner),
		},
		QueueReceiver { inner },
	)
}

impl<T> QueueSender<T> {
	/// Non-blocking enqueue. Fails with `Full` at capacity, `Closed` after close.
	pub fn try_send(&self, item: T) -> Result<(), QueueError> {
		let mut state = self.inner.state.lock().unwrap();
		if state.closed {
			return Err(QueueError::Closed);
		}
		if state.items.len() >= self.inner.capacity {
			return Err(QueueError::Full);
		}
		state.items.push_back(item);
		drop(state);
		self.inner.notify.notify_one();
		Ok(())
	}

	/// Closes the queue. The receiver drains remaining items then gets `None`.
	pub fn close(&self) {
		let mut state = self.inner.state.lock().unwrap();
		state.closed = true;
		drop(state);
		self.inner.notify.notify_waiters();
	}

	/// Returns the current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().unwrap().items.len()
	}

	/// Returns true when no items are queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns the configured capacity.
	pub fn capacity(&self) -> usize {
		self.inner.capacity
	}
}

impl<T> QueueReceiver<T> {
	/// Receives the next item in arrival order.
	///
	/// Returns `None` once the queue is closed and drained.
	pub async fn recv(&self) -> Option<T> {
		loop {
			// Register the notification future before checking state to avoid
			// a lost wakeup between unlock and await.
			let notified = self.inner.notify.notified();
			{
				let mut state = self.inner.state.lock().unwrap();
				if let Some(item) = state.items.pop_front() {
					return Some(item);
				}
				if state.closed {
					return None;
				}
			}
			notified.await;
		}
	}
}
