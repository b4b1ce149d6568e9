//! Preload library for pthread-hook
//!
//! Injected with `LD_PRELOAD`, this library exports `pthread_create`,
//! `pthread_setname_np` and `dlopen` so every call the host makes is routed
//! through the retained thread hook. A constructor builds the hook from the
//! environment and installs it before the host's `main` runs:
//!
//! - `PTHREAD_HOOK_PATTERNS`: `;`-separated thread name patterns to capture
//! - `PTHREAD_HOOK_DUMP_PATH`: where `pthread_hook_dump(NULL)` writes the report
//! - `PTHREAD_HOOK_DEBUG`: enable debug logging

use libc::{c_char, c_int, pthread_attr_t, pthread_t};
use pthread_hook_rs::ffi;
use pthread_hook_rs::{NextSymbolEngine, PthreadHook};
use std::ffi::{CStr, c_void};
use std::sync::OnceLock;

// Keeps the installed hook alive for the life of the process
static HOOK: OnceLock<PthreadHook> = OnceLock::new();

#[unsafe(link_section = ".init_array")]
#[used]
static CONSTRUCTOR: extern "C" fn() = load_hook;

extern "C" fn load_hook() {
	pthread_hook_rs::util::init_logging();

	match pthread_hook_rs::new()
		.from_env()
		.build()
		.and_then(|hook| hook.install(&NextSymbolEngine))
	{
		Ok(hook) => {
			if HOOK.set(hook).is_err() {
				tracing::warn!("pthread hook constructor ran twice");
			}
		},
		Err(e) => tracing::error!("failed to install pthread hook: {}", e),
	}
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_create(
	thread: *mut pthread_t,
	attr: *const pthread_attr_t,
	start: extern "C" fn(*mut c_void) -> *mut c_void,
	arg: *mut c_void,
) -> c_int {
	unsafe { ffi::pthread_create_hook(thread, attr, start, arg) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_setname_np(thread: pthread_t, name: *const c_char) -> c_int {
	unsafe { ffi::pthread_setname_np_hook(thread, name) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn dlopen(filename: *const c_char, flags: c_int) -> *mut c_void {
	unsafe { ffi::dlopen_hook(filename, flags) }
}

/// Register a capture pattern at runtime
///
/// Returns 0 when the pattern was accepted, -1 otherwise.
///
/// # Safety
///
/// `pattern` must be null or point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_hook_add_pattern(pattern: *const c_char) -> c_int {
	let Some(hook) = HOOK.get() else {
		return -1;
	};
	if pattern.is_null() {
		return -1;
	}

	let pattern = unsafe { CStr::from_ptr(pattern) };
	match pattern.to_str() {
		Ok(pattern) if hook.add_capture_pattern(pattern) => 0,
		Ok(_) => -1,
		Err(e) => {
			tracing::error!("capture pattern is not UTF-8: {}", e);
			-1
		},
	}
}

/// Write the retained thread report
///
/// A null `path` writes to `PTHREAD_HOOK_DUMP_PATH`. Returns the number of
/// threads reported, or -1 on failure.
///
/// # Safety
///
/// `path` must be null or point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pthread_hook_dump(path: *const c_char) -> c_int {
	let Some(hook) = HOOK.get() else {
		return -1;
	};

	let result = if path.is_null() {
		hook.dump_default()
	} else {
		let path = unsafe { CStr::from_ptr(path) };
		match path.to_str() {
			Ok(path) => hook.dump_report(path),
			Err(e) => {
				tracing::error!("dump path is not UTF-8: {}", e);
				return -1;
			},
		}
	};

	match result {
		Ok(threads) => c_int::try_from(threads).unwrap_or(c_int::MAX),
		Err(e) => {
			tracing::error!("pthread dump failed: {}", e);
			-1
		},
	}
}
