//! Interception shim
//!
//! Glue between intercepted native calls and the registry: thread creation
//! registers the new thread and runs the birth capture trigger, a rename
//! updates the record and may run the late capture trigger, and a library
//! load refreshes the stack walker's module map.

use crate::core::capture::DiagnosticsCapture;
use crate::core::lifecycle::{RoutineWrapper, StartRoutine, ThreadLaunch, routine_wrapper};
use crate::core::metadata::{ThreadHandle, ThreadName};
use crate::core::platform;
use crate::core::registry::{Registration, RegistryState, ThreadRegistry};
use libc::{c_char, c_int, pid_t, pthread_attr_t, pthread_t};
use std::ffi::{CStr, c_void};
use std::sync::Arc;
use tracing::{debug, error};

/// Signature of the real `pthread_create`
pub type PthreadCreateFn =
	unsafe extern "C" fn(*mut pthread_t, *const pthread_attr_t, StartRoutine, *mut c_void) -> c_int;

/// Signature of the real `pthread_setname_np`
pub type PthreadSetnameFn = unsafe extern "C" fn(pthread_t, *const c_char) -> c_int;

/// Translates hooked calls into registry operations
#[derive(Debug)]
pub struct InterceptionShim {
	registry: Arc<ThreadRegistry>,
	capture: DiagnosticsCapture,
}

impl InterceptionShim {
	#[must_use]
	pub fn new(registry: Arc<ThreadRegistry>, capture: DiagnosticsCapture) -> Self {
		Self { registry, capture }
	}

	#[must_use]
	pub const fn registry(&self) -> &Arc<ThreadRegistry> {
		&self.registry
	}

	/// Create a thread through `original`, wrapping its entry point
	///
	/// # Safety
	///
	/// The arguments must be valid for `original`, which must behave like
	/// `pthread_create`.
	pub unsafe fn create_thread(
		&self,
		original: PthreadCreateFn,
		thread: *mut pthread_t,
		attr: *const pthread_attr_t,
		start: StartRoutine,
		arg: *mut c_void,
	) -> c_int {
		let wrapper = RoutineWrapper::new(start, arg, &self.registry);
		let launch = wrapper.launch();
		let raw = Box::into_raw(wrapper);

		let ret = unsafe { original(thread, attr, routine_wrapper, raw.cast::<c_void>()) };
		if ret != 0 {
			// The thread never started, so the wrapper is still ours
			drop(unsafe { Box::from_raw(raw) });
			return ret;
		}

		if !thread.is_null() {
			let handle = ThreadHandle::from_raw(unsafe { *thread });
			self.on_thread_created(handle, &launch);
		}
		ret
	}

	/// Creation hook: runs on the creating thread once the new thread exists
	pub fn on_thread_created(&self, handle: ThreadHandle, launch: &ThreadLaunch) {
		debug!("on_pthread_create {}", handle);

		let os_tid = launch.os_tid().or_else(|| platform::os_thread_id(handle));
		let name = platform::thread_name(handle, os_tid).unwrap_or_else(ThreadName::placeholder);

		let mut state = self.registry.lock();
		if launch.has_exited() {
			debug!("thread {} exited before it was registered", handle);
			return;
		}

		// The launched thread may have reported its tid since the query above
		let os_tid = launch.os_tid().or(os_tid).unwrap_or(0);
		self.register_locked(&mut state, handle, os_tid, name);
	}

	/// Register a thread whose name and kernel id are already known
	///
	/// Returns `false` for a duplicate registration, which leaves the live
	/// record untouched.
	pub fn record_creation(&self, handle: ThreadHandle, os_tid: pid_t, creation_name: ThreadName) -> bool {
		let mut state = self.registry.lock();
		self.register_locked(&mut state, handle, os_tid, creation_name)
	}

	fn register_locked(
		&self,
		state: &mut RegistryState,
		handle: ThreadHandle,
		os_tid: pid_t,
		creation_name: ThreadName,
	) -> bool {
		let record = match state.table.register(handle, os_tid, creation_name) {
			Registration::Created(record) => record,
			Registration::Existing(_) => return false,
		};

		if let Some(pattern) = state.policy.first_match(record.creation_name()) {
			debug!("{} matches regex {}", record.creation_name(), pattern.source());
			self.capture.attempt(record);
		}
		true
	}

	/// Rename a thread through `original`, then run the rename hook
	///
	/// # Safety
	///
	/// `name` must be null or point to a NUL-terminated string, and
	/// `original` must behave like `pthread_setname_np`.
	pub unsafe fn set_thread_name(&self, original: PthreadSetnameFn, thread: pthread_t, name: *const c_char) -> c_int {
		let ret = unsafe { original(thread, name) };

		if name.is_null() {
			error!("setting name null");
			return ret;
		}

		let name = unsafe { CStr::from_ptr(name) };
		self.on_thread_renamed(ThreadHandle::from_raw(thread), name.to_bytes());
		ret
	}

	/// Rename hook: runs on whichever thread invoked the rename
	pub fn on_thread_renamed(&self, handle: ThreadHandle, name: &[u8]) {
		let name = match ThreadName::new(name) {
			Ok(name) => name,
			Err(e) => {
				error!("pthread name is illegal, just ignore: {}", e);
				return;
			},
		};

		let mut guard = self.registry.lock();
		let state = &mut *guard;

		let record = match state.table.rename(handle, name) {
			Ok(record) => record,
			Err(e) => {
				error!("pthread hook lost: {}", e);
				return;
			},
		};

		if record.os_tid() == 0 && handle == ThreadHandle::current() {
			record.set_os_tid(platform::current_os_tid());
		}

		if record.wants_late_capture() {
			if let Some(pattern) = state.policy.first_match(record.current_name()) {
				debug!("{} matches regex {} after rename", record.current_name(), pattern.source());
				self.capture.attempt(record);
			}
		}
	}

	/// Library load hook: refresh the module map before the next capture
	pub fn on_library_loaded(&self, path: Option<&CStr>) {
		debug!("pthread_hook_on_dlopen {:?}", path);
		let _state = self.registry.lock();
		self.capture.refresh_module_map();
	}
}
