//! Thread metadata registry
//!
//! This module provides the authoritative mapping from live thread handles
//! to their metadata records. The mapping and the capture policy share a
//! single mutex; every creation, rename, capture, finalize and dump step
//! runs with it held, so only one lock exists and no lock ordering hazard
//! can arise between registry operations.

use crate::core::metadata::{ThreadHandle, ThreadMetadata, ThreadName};
use crate::core::policy::CapturePolicy;
use crate::hook::{HookError, Result};
use libc::pid_t;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::debug;

/// Outcome of a registration
#[derive(Debug)]
pub enum Registration<'a> {
	/// A new record was created
	Created(&'a mut ThreadMetadata),
	/// A record already existed and was left untouched
	Existing(&'a mut ThreadMetadata),
}

impl<'a> Registration<'a> {
	#[must_use]
	pub const fn is_new(&self) -> bool {
		matches!(self, Self::Created(_))
	}

	#[must_use]
	pub fn into_record(self) -> &'a mut ThreadMetadata {
		match self {
			Self::Created(record) | Self::Existing(record) => record,
		}
	}
}

/// Map of live thread handles to their records
#[derive(Debug, Default)]
pub struct ThreadTable {
	threads: HashMap<ThreadHandle, ThreadMetadata>,
}

impl ThreadTable {
	/// Register a thread
	///
	/// A duplicate registration returns the live record unchanged.
	pub fn register(&mut self, handle: ThreadHandle, os_tid: pid_t, creation_name: ThreadName) -> Registration<'_> {
		use std::collections::hash_map::Entry;

		match self.threads.entry(handle) {
			Entry::Occupied(entry) => {
				debug!("thread {} already registered", handle);
				Registration::Existing(entry.into_mut())
			},
			Entry::Vacant(entry) => {
				debug!(
					"registered thread {} (tid: {}, parent name: {})",
					handle, os_tid, creation_name
				);
				Registration::Created(entry.insert(ThreadMetadata::new(handle, os_tid, creation_name)))
			},
		}
	}

	/// Replace a thread's current name
	///
	/// Fails with `ThreadNotFound` when the creation hook was lost or has
	/// not run yet for `handle`.
	pub fn rename(&mut self, handle: ThreadHandle, name: ThreadName) -> Result<&mut ThreadMetadata> {
		let record = self.threads.get_mut(&handle).ok_or(HookError::ThreadNotFound(handle))?;
		debug!("rename thread {}: {} -> {}", handle, record.current_name(), name);
		record.set_current_name(name);
		Ok(record)
	}

	/// Remove a thread's record, releasing everything it owns
	///
	/// Absent handles are ignored, so a second finalize is a no-op.
	pub fn finalize(&mut self, handle: ThreadHandle) -> Option<ThreadMetadata> {
		let removed = self.threads.remove(&handle);
		if let Some(record) = &removed {
			debug!(
				"removing thread {{{}, {}, {}, {}}}",
				handle,
				record.current_name(),
				record.creation_name(),
				record.os_tid()
			);
		}
		removed
	}

	/// Record the kernel thread id once it becomes known
	pub fn bind_os_tid(&mut self, handle: ThreadHandle, os_tid: pid_t) -> bool {
		match self.threads.get_mut(&handle) {
			Some(record) => {
				record.set_os_tid(os_tid);
				true
			},
			None => false,
		}
	}

	#[must_use]
	pub fn get(&self, handle: ThreadHandle) -> Option<&ThreadMetadata> {
		self.threads.get(&handle)
	}

	#[must_use]
	pub fn contains(&self, handle: ThreadHandle) -> bool {
		self.threads.contains_key(&handle)
	}

	/// Iterate over live records in no particular order
	pub fn records(&self) -> impl Iterator<Item = &ThreadMetadata> {
		self.threads.values()
	}

	/// Copy of every live record
	#[must_use]
	pub fn snapshot(&self) -> Vec<ThreadMetadata> {
		self.threads.values().cloned().collect()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.threads.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.threads.is_empty()
	}
}

/// Everything guarded by the registry lock
#[derive(Debug, Default)]
pub struct RegistryState {
	/// Live thread records
	pub table: ThreadTable,
	/// Capture policy consulted at creation and rename
	pub policy: CapturePolicy,
}

/// The registry: thread records and capture policy behind one mutex
#[derive(Debug, Default)]
pub struct ThreadRegistry {
	state: Mutex<RegistryState>,
}

impl ThreadRegistry {
	/// Create a registry with the given capture policy
	#[must_use]
	pub fn new(policy: CapturePolicy) -> Self {
		Self {
			state: Mutex::new(RegistryState {
				table: ThreadTable::default(),
				policy,
			}),
		}
	}

	/// Acquire the registry lock
	///
	/// A panic on another thread while holding the lock does not disable
	/// the registry; the state is taken over as is.
	pub fn lock(&self) -> MutexGuard<'_, RegistryState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Acquire the registry lock if it is free
	pub fn try_lock(&self) -> Option<MutexGuard<'_, RegistryState>> {
		match self.state.try_lock() {
			Ok(guard) => Some(guard),
			Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
			Err(TryLockError::WouldBlock) => None,
		}
	}

	/// Remove a thread's record; returns whether one was present
	pub fn finalize(&self, handle: ThreadHandle) -> bool {
		self.lock().table.finalize(handle).is_some()
	}

	/// Copy of every live record, taken under the lock
	#[must_use]
	pub fn snapshot(&self) -> Vec<ThreadMetadata> {
		self.lock().table.snapshot()
	}

	/// Copy of one record
	#[must_use]
	pub fn get(&self, handle: ThreadHandle) -> Option<ThreadMetadata> {
		self.lock().table.get(handle).cloned()
	}

	#[must_use]
	pub fn contains(&self, handle: ThreadHandle) -> bool {
		self.lock().table.contains(handle)
	}

	/// Get the number of registered threads
	#[must_use]
	pub fn thread_count(&self) -> usize {
		self.lock().table.len()
	}

	/// Register a capture pattern; invalid patterns are logged and dropped
	pub fn add_pattern(&self, pattern: &str) -> bool {
		self.lock().policy.add_pattern(pattern)
	}
}
