//! pthread-hook-rs - A retained thread detector
//!
//! This crate intercepts native thread creation and renaming, keeps a
//! registry of every live thread created through the hook, captures the
//! creating call stack for threads whose name matches a configured
//! pattern, and writes a report of all threads still alive on demand.
//! Threads that show up in that report long after they should have exited
//! are candidates for leaks.
//!
//! # Getting Started
//!
//! ```rust,no_run
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Capture creation stacks for binder and render workers
//!     let hook = pthread_hook_rs::new()
//!         .pattern("^Binder.*")
//!         .pattern("^Render.*")
//!         .build()?
//!         .install(&pthread_hook_rs::NextSymbolEngine)?;
//!
//!     // Your application code here
//!
//!     hook.dump_report("/tmp/retained-threads.txt")?;
//!     Ok(())
//! }
//! ```
//!
//! Inside a process where the `pthread-hook-preload` library is injected
//! with `LD_PRELOAD`, the hook is configured from the environment and
//! installed before `main` runs.

pub mod core;
pub mod ffi;
pub mod hook;
pub mod util;

pub use crate::core::capture::{
	DiagnosticsCapture, ManagedStackSource, NativeStackWalker, ResolvedSymbol, SymbolResolver,
};
pub use crate::core::metadata::{NativeFrame, THREAD_NAME_LEN, ThreadHandle, ThreadMetadata, ThreadName};
pub use crate::core::modules::{Module, ModuleMap};
pub use crate::core::policy::{CapturePolicy, CompiledPattern};
pub use crate::core::registry::ThreadRegistry;
pub use crate::core::unwind::{BacktraceWalker, DladdrResolver, NoManagedStack};
pub use hook::{
	HookConfig, HookEngine, HookError, InterceptionShim, NextSymbolEngine, PthreadHook, PthreadHookBuilder,
	ReportGenerator, Result,
};

/// Create a new hook builder
#[must_use]
pub fn new() -> PthreadHookBuilder {
	PthreadHookBuilder::new()
}

/// Build a hook from the environment and install it through `RTLD_NEXT`
///
/// This is equivalent to `new().from_env().build()?.install(&NextSymbolEngine)`
pub fn init() -> Result<PthreadHook> {
	new().from_env().build()?.install(&NextSymbolEngine)
}
