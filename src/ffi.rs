//! C entry points for hooked calls
//!
//! The functions here have the exact signatures of the native functions they
//! stand in for. A hook engine (or a preloaded library exporting them under
//! the native names) routes calls into them; each one calls the original and
//! then notifies the active hook, if any. With no active hook they are pure
//! call-through.

use crate::core::lifecycle::StartRoutine;
use crate::hook::{HookEngine, HookError, NextSymbolEngine, PthreadCreateFn, PthreadSetnameFn, Result, active_hook};
use libc::{c_char, c_int, pthread_attr_t, pthread_t};
use once_cell::sync::OnceCell;
use std::ffi::{CStr, c_void};
use tracing::{debug, error};

/// Signature of the real `dlopen`
pub type DlopenFn = unsafe extern "C" fn(*const c_char, c_int) -> *mut c_void;

/// Call-through pointers to the original implementations
#[derive(Debug, Clone, Copy)]
pub struct Originals {
	pub pthread_create: PthreadCreateFn,
	pub pthread_setname_np: PthreadSetnameFn,
	pub dlopen: DlopenFn,
}

static ORIGINALS: OnceCell<Originals> = OnceCell::new();

impl Originals {
	/// Intercept every hooked symbol through `engine`
	pub fn resolve(engine: &dyn HookEngine) -> Result<Self> {
		unsafe {
			let pthread_create = engine.intercept(c"pthread_create", pthread_create_hook as *const c_void)?;
			let pthread_setname_np = engine.intercept(c"pthread_setname_np", pthread_setname_np_hook as *const c_void)?;
			let dlopen = engine.intercept(c"dlopen", dlopen_hook as *const c_void)?;

			Ok(Self {
				pthread_create: std::mem::transmute::<*const c_void, PthreadCreateFn>(pthread_create),
				pthread_setname_np: std::mem::transmute::<*const c_void, PthreadSetnameFn>(pthread_setname_np),
				dlopen: std::mem::transmute::<*const c_void, DlopenFn>(dlopen),
			})
		}
	}
}

/// Resolve the originals once for the process
///
/// Later calls return the first resolution, whatever engine they pass.
pub(crate) fn install_originals(engine: &dyn HookEngine) -> Result<&'static Originals> {
	ORIGINALS.get_or_try_init(|| Originals::resolve(engine))
}

/// The originals, resolving them through `RTLD_NEXT` on first use
pub fn originals() -> Option<&'static Originals> {
	install_originals(&NextSymbolEngine)
		.map_err(|e: HookError| error!("failed to resolve original functions: {}", e))
		.ok()
}

/// Stand-in for `pthread_create`
///
/// # Safety
///
/// Same contract as `pthread_create`.
pub unsafe extern "C" fn pthread_create_hook(
	thread: *mut pthread_t,
	attr: *const pthread_attr_t,
	start: StartRoutine,
	arg: *mut c_void,
) -> c_int {
	let Some(originals) = originals() else {
		return libc::EAGAIN;
	};

	match active_hook() {
		Some(hook) => unsafe { hook.shim().create_thread(originals.pthread_create, thread, attr, start, arg) },
		None => unsafe { (originals.pthread_create)(thread, attr, start, arg) },
	}
}

/// Stand-in for `pthread_setname_np`
///
/// # Safety
///
/// Same contract as `pthread_setname_np`.
pub unsafe extern "C" fn pthread_setname_np_hook(thread: pthread_t, name: *const c_char) -> c_int {
	let Some(originals) = originals() else {
		return libc::ENOSYS;
	};

	match active_hook() {
		Some(hook) => unsafe { hook.shim().set_thread_name(originals.pthread_setname_np, thread, name) },
		None => unsafe { (originals.pthread_setname_np)(thread, name) },
	}
}

/// Stand-in for `dlopen`
///
/// # Safety
///
/// Same contract as `dlopen`.
pub unsafe extern "C" fn dlopen_hook(filename: *const c_char, flags: c_int) -> *mut c_void {
	let Some(originals) = originals() else {
		return std::ptr::null_mut();
	};

	let handle = unsafe { (originals.dlopen)(filename, flags) };

	if !handle.is_null() {
		if let Some(hook) = active_hook() {
			let path = (!filename.is_null()).then(|| unsafe { CStr::from_ptr(filename) });
			hook.notify_library_loaded(path);
		}
	} else {
		debug!("dlopen failed, module map left as is");
	}

	handle
}
