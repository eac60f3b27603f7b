//! Per-resource monotonic revision counters.
//!
//! The tracker holds no resource state, only counters: the host's object
//! graph stays the single owner of the data. Stamping is only ever performed
//! from inside the executor loop, so increments cannot race by construction;
//! readers may call from any context and get a snapshot that can be
//! immediately stale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use armature_proto::{ResourceId, Revision};

/// Shared revision table keyed by opaque resource token.
#[derive(Debug, Clone, Default)]
pub struct RevisionTracker {
	inner: Arc<Mutex<HashMap<ResourceId, Revision>>>,
}

impl RevisionTracker {
	/// Creates an empty tracker.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a resource at the baseline revision 0.
	///
	/// Registering an already-known resource is a no-op and returns its
	/// current revision.
	pub fn register(&self, resource: &ResourceId) -> Revision {
		let mut table = self.inner.lock().unwrap();
		*table.entry(resource.clone()).or_insert(Revision(0))
	}

	/// Records one committed mutation and returns the new revision.
	///
	/// Must only be called from the executor's context. An unknown resource
	/// is implicitly registered first, so a creating work item stamps its new
	/// resource from 0 to 1.
	pub fn stamp(&self, resource: &ResourceId) -> Revision {
		let mut table = self.inner.lock().unwrap();
		let entry = table.entry(resource.clone()).or_insert(Revision(0));
		*entry = entry.next();
		*entry
	}

	/// Snapshot of the resource's current revision.
	#[must_use]
	pub fn current(&self, resource: &ResourceId) -> Option<Revision> {
		self.inner.lock().unwrap().get(resource).copied()
	}

	/// Has the resource changed since `seen`?
	///
	/// Unknown resources report `false`.
	#[must_use]
	pub fn changed_since(&self, resource: &ResourceId, seen: Revision) -> bool {
		self.current(resource).is_some_and(|rev| rev > seen)
	}

	/// Puts the counter back to a prior value after a verified rollback.
	///
	/// This is the one sanctioned non-monotonic write: a fully compensated
	/// transaction must leave the revision exactly as it found it. Like
	/// `stamp`, only called from the executor's context.
	pub fn restore(&self, resource: &ResourceId, revision: Revision) {
		self.inner.lock().unwrap().insert(resource.clone(), revision);
	}

	/// Drops the counter for a destroyed resource.
	pub fn forget(&self, resource: &ResourceId) {
		self.inner.lock().unwrap().remove(resource);
	}
}
