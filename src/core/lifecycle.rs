//! Thread lifecycle ownership
//!
//! Every thread created through the hook starts in [`routine_wrapper`]
//! instead of the caller's routine. The wrapper arms a thread-specific
//! slot whose destructor runs once when the thread exits, and that
//! destructor removes the thread's record from the registry.
//!
//! Threads cancelled externally or torn down with the process may never
//! run the destructor; their records stay registered.

use crate::core::metadata::ThreadHandle;
use crate::core::platform;
use crate::core::registry::ThreadRegistry;
use libc::{pid_t, pthread_key_t};
use once_cell::sync::OnceCell;
use std::ffi::c_void;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Entry point signature accepted by `pthread_create`
pub type StartRoutine = extern "C" fn(*mut c_void) -> *mut c_void;

/// Process-wide key whose destructor finalizes exiting threads
static EXIT_KEY: OnceCell<pthread_key_t> = OnceCell::new();

/// State shared between a creating thread and the thread it launched
///
/// Both sides only touch it with the registry lock held, so whichever
/// runs second sees what the first one recorded.
#[derive(Debug, Default)]
pub struct ThreadLaunch {
	os_tid: AtomicI32,
	exited: AtomicBool,
}

impl ThreadLaunch {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Kernel thread id reported by the launched thread, if it ran yet
	#[must_use]
	pub fn os_tid(&self) -> Option<pid_t> {
		match self.os_tid.load(Ordering::Acquire) {
			0 => None,
			tid => Some(tid),
		}
	}

	/// Whether the launched thread has already run its exit destructor
	#[must_use]
	pub fn has_exited(&self) -> bool {
		self.exited.load(Ordering::Acquire)
	}

	fn record_os_tid(&self, tid: pid_t) {
		self.os_tid.store(tid, Ordering::Release);
	}

	fn mark_exited(&self) {
		self.exited.store(true, Ordering::Release);
	}
}

/// Bookkeeping handed to a new thread in place of the caller's argument
pub struct RoutineWrapper {
	start: StartRoutine,
	arg: *mut c_void,
	registry: Weak<ThreadRegistry>,
	launch: Arc<ThreadLaunch>,
}

// SAFETY: the raw argument is only handed through to the routine it was
// created for, on the thread that routine runs on.
unsafe impl Send for RoutineWrapper {}

impl RoutineWrapper {
	#[must_use]
	pub fn new(start: StartRoutine, arg: *mut c_void, registry: &Arc<ThreadRegistry>) -> Box<Self> {
		Box::new(Self {
			start,
			arg,
			registry: Arc::downgrade(registry),
			launch: Arc::new(ThreadLaunch::new()),
		})
	}

	/// The launch state shared with the new thread
	#[must_use]
	pub fn launch(&self) -> Arc<ThreadLaunch> {
		Arc::clone(&self.launch)
	}
}

/// Value stored in the exit slot of each wrapped thread
struct ExitSentinel {
	registry: Weak<ThreadRegistry>,
	launch: Arc<ThreadLaunch>,
}

/// The exit key, created exactly once even when many threads start together
fn exit_key() -> Option<pthread_key_t> {
	EXIT_KEY
		.get_or_try_init(|| {
			let mut key: pthread_key_t = 0;
			let rc = unsafe { libc::pthread_key_create(&mut key, Some(on_thread_exit)) };
			if rc == 0 {
				debug!("created thread exit key {}", key);
				Ok(key)
			} else {
				Err(io::Error::from_raw_os_error(rc))
			}
		})
		.map(|key| *key)
		.map_err(|e| error!("failed to create thread exit key: {}", e))
		.ok()
}

/// Runs on the exiting thread once its routine has returned
unsafe extern "C" fn on_thread_exit(value: *mut c_void) {
	if value.is_null() {
		return;
	}

	let sentinel = unsafe { Box::from_raw(value.cast::<ExitSentinel>()) };
	let handle = ThreadHandle::current();
	debug!("on_pthread_destroy {}", handle);

	if let Some(registry) = sentinel.registry.upgrade() {
		let mut state = registry.lock();
		sentinel.launch.mark_exited();
		state.table.finalize(handle);
	}
}

fn arm_exit_slot(registry: Weak<ThreadRegistry>, launch: Arc<ThreadLaunch>) {
	let Some(key) = exit_key() else {
		return;
	};

	let sentinel = Box::into_raw(Box::new(ExitSentinel { registry, launch }));
	let rc = unsafe { libc::pthread_setspecific(key, sentinel.cast::<c_void>()) };
	if rc != 0 {
		error!("pthread_setspecific failed: {}", io::Error::from_raw_os_error(rc));
		drop(unsafe { Box::from_raw(sentinel) });
	}
}

/// Entry point substituted for every thread created through the hook
///
/// `arg` must come from `Box::into_raw` on a [`RoutineWrapper`]; the
/// wrapper takes ownership of it.
pub extern "C" fn routine_wrapper(arg: *mut c_void) -> *mut c_void {
	let (start, start_arg) = {
		let wrapper = unsafe { Box::from_raw(arg.cast::<RoutineWrapper>()) };
		let RoutineWrapper {
			start,
			arg,
			registry,
			launch,
		} = *wrapper;

		let tid = platform::current_os_tid();
		if let Some(strong) = registry.upgrade() {
			let mut state = strong.lock();
			launch.record_os_tid(tid);
			state.table.bind_os_tid(ThreadHandle::current(), tid);
		}

		arm_exit_slot(registry, launch);
		(start, arg)
	};

	// Nothing with a destructor is live across the call, so a forced
	// unwind from pthread_exit passes through this frame cleanly.
	start(start_arg)
}
