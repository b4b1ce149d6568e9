//! Hook engines
//!
//! A hook engine makes a wrapper run in place of a named native function
//! and hands back a pointer through which the original can still be called.

use crate::hook::{HookError, Result};
use std::ffi::{CStr, c_void};
use tracing::debug;

/// Trait for mechanisms that redirect calls to a native symbol
pub trait HookEngine: Send + Sync {
	/// Route calls to `symbol` through `wrapper`
	///
	/// Returns the call-through pointer to the original implementation.
	///
	/// # Safety
	///
	/// `wrapper` must point to a function with the same signature as
	/// `symbol`.
	unsafe fn intercept(&self, symbol: &CStr, wrapper: *const c_void) -> Result<*const c_void>;

	/// Get the name of the engine
	///
	/// This is used for debugging and logging purposes.
	fn name(&self) -> &'static str {
		std::any::type_name::<Self>()
	}
}

/// Engine for libraries injected with `LD_PRELOAD`
///
/// The preloaded library exports the wrappers under the intercepted
/// names, so symbol precedence already routes calls to them; the original
/// is the next definition in lookup order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextSymbolEngine;

impl NextSymbolEngine {
	#[must_use]
	pub const fn new() -> Self {
		Self
	}
}

impl HookEngine for NextSymbolEngine {
	unsafe fn intercept(&self, symbol: &CStr, wrapper: *const c_void) -> Result<*const c_void> {
		let original = unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr()) };
		if original.is_null() {
			return Err(HookError::SymbolNotFound(symbol.to_string_lossy().into_owned()));
		}

		if std::ptr::eq(original.cast_const(), wrapper) {
			return Err(HookError::Other(format!(
				"next definition of {} is the wrapper itself",
				symbol.to_string_lossy()
			)));
		}

		debug!("resolved {:?} -> {:p} (wrapper {:p})", symbol, original, wrapper);
		Ok(original.cast_const())
	}

	fn name(&self) -> &'static str {
		"NextSymbolEngine"
	}
}
