//! Thread hook
//!
//! This module contains the user-facing hook: its builder, the shim that
//! hooked calls are routed into, the report generator, and the process
//! wide slot through which the C entry points find the active hook.

mod builder;
mod engine;
mod error;
mod report;
mod shim;

pub use builder::{DUMP_PATH_ENV, HookConfig, PATTERNS_ENV, PthreadHookBuilder};
pub use engine::{HookEngine, NextSymbolEngine};
pub use error::{HookError, Result};
pub use report::{ReportGenerator, UNRESOLVED};
pub use shim::{InterceptionShim, PthreadCreateFn, PthreadSetnameFn};

use crate::core::capture::SymbolResolver;
use crate::core::registry::ThreadRegistry;
use std::ffi::CStr;
use std::path::Path;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

// Global slot for the installed hook
static ACTIVE_HOOK: LazyLock<RwLock<Option<Arc<HookContext>>>> = LazyLock::new(|| RwLock::new(None));

/// Shared state of a hook
///
/// Holds the configuration, the interception shim (and through it the
/// registry) and the resolver used for reports.
pub struct HookContext {
	/// The configuration for the hook
	config: HookConfig,
	shim: InterceptionShim,
	resolver: Box<dyn SymbolResolver>,
}

impl std::fmt::Debug for HookContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HookContext")
			.field("config", &self.config)
			.field("shim", &self.shim)
			.field("threads", &self.shim.registry().thread_count())
			.finish()
	}
}

impl HookContext {
	pub(crate) fn new(config: HookConfig, shim: InterceptionShim, resolver: Box<dyn SymbolResolver>) -> Self {
		Self { config, shim, resolver }
	}

	#[must_use]
	pub const fn config(&self) -> &HookConfig {
		&self.config
	}

	#[must_use]
	pub const fn shim(&self) -> &InterceptionShim {
		&self.shim
	}

	#[must_use]
	pub fn registry(&self) -> &Arc<ThreadRegistry> {
		self.shim.registry()
	}

	/// Register a capture pattern; invalid patterns are logged and dropped
	pub fn add_capture_pattern(&self, pattern: &str) -> bool {
		self.registry().add_pattern(pattern)
	}

	/// Report generator over this hook's registry
	#[must_use]
	pub fn report(&self) -> ReportGenerator<'_> {
		ReportGenerator::new(self.registry(), &*self.resolver)
	}

	/// Write the retained thread report to `path`
	pub fn dump_report(&self, path: &Path) -> Result<usize> {
		self.report().dump_to_path(path)
	}

	/// Write the retained thread report to the configured dump path
	pub fn dump_default(&self) -> Result<usize> {
		match &self.config.dump_path {
			Some(path) => self.dump_report(path),
			None => Err(HookError::Other(format!("no dump path configured (set {DUMP_PATH_ENV})"))),
		}
	}

	/// Tell the stack walker that a library was loaded
	pub fn notify_library_loaded(&self, path: Option<&CStr>) {
		self.shim.on_library_loaded(path);
	}
}

/// Main hook struct
///
/// Created by `PthreadHookBuilder`. Until it is installed it can be driven
/// directly through its shim; once installed, calls intercepted by the
/// C entry points in [`crate::ffi`] are routed to it.
#[derive(Debug)]
pub struct PthreadHook {
	context: Arc<HookContext>,
	installed: bool,
}

impl PthreadHook {
	pub(crate) fn new(context: HookContext) -> Self {
		Self {
			context: Arc::new(context),
			installed: false,
		}
	}

	/// Resolve the originals through `engine` and make this the active hook
	pub fn install(mut self, engine: &dyn HookEngine) -> Result<Self> {
		if self.installed {
			return Err(HookError::AlreadyInstalled);
		}

		crate::util::init_logging();
		tracing::info!("Installing pthread hook using {}...", engine.name());

		crate::ffi::install_originals(engine)?;

		{
			let mut active = ACTIVE_HOOK.write().unwrap_or_else(PoisonError::into_inner);
			if active.is_some() {
				return Err(HookError::AlreadyInstalled);
			}
			*active = Some(Arc::clone(&self.context));
		}

		self.installed = true;
		tracing::info!("pthread hook installed");
		Ok(self)
	}

	/// Stop routing hooked calls to this hook
	///
	/// Threads already wrapped still finalize their records on exit.
	pub fn uninstall(&mut self) -> Result<()> {
		if !self.installed {
			return Err(HookError::NotInstalled);
		}
		clear_active_hook(&self.context);
		self.installed = false;
		tracing::info!("pthread hook uninstalled");
		Ok(())
	}

	/// Check if the hook is installed
	#[must_use]
	pub const fn is_installed(&self) -> bool {
		self.installed
	}

	/// Get the hook context
	#[must_use]
	pub fn context(&self) -> &Arc<HookContext> {
		&self.context
	}

	#[must_use]
	pub fn registry(&self) -> &Arc<ThreadRegistry> {
		self.context.registry()
	}

	#[must_use]
	pub fn shim(&self) -> &InterceptionShim {
		self.context.shim()
	}

	/// Register a capture pattern; invalid patterns are logged and dropped
	pub fn add_capture_pattern(&self, pattern: &str) -> bool {
		self.context.add_capture_pattern(pattern)
	}

	/// Write the retained thread report to `path`
	pub fn dump_report(&self, path: impl AsRef<Path>) -> Result<usize> {
		self.context.dump_report(path.as_ref())
	}

	/// Write the retained thread report to the configured dump path
	pub fn dump_default(&self) -> Result<usize> {
		self.context.dump_default()
	}

	/// Tell the stack walker that a library was loaded
	pub fn notify_library_loaded(&self, path: Option<&CStr>) {
		self.context.notify_library_loaded(path);
	}
}

impl Drop for PthreadHook {
	fn drop(&mut self) {
		if self.installed {
			clear_active_hook(&self.context);
		}
	}
}

/// Get the active hook context
pub fn active_hook() -> Option<Arc<HookContext>> {
	ACTIVE_HOOK.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Clear the active slot if it still holds `context`
fn clear_active_hook(context: &Arc<HookContext>) {
	let mut active = ACTIVE_HOOK.write().unwrap_or_else(PoisonError::into_inner);
	if active.as_ref().is_some_and(|current| Arc::ptr_eq(current, context)) {
		*active = None;
	}
}
