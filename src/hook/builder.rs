//! Builder for creating thread hooks
//!
//! This module contains the `PthreadHookBuilder` struct and related
//! functionality for configuring and building hooks.

use crate::core::capture::{
	DEFAULT_MANAGED_STACK_CAPACITY, DiagnosticsCapture, ManagedStackSource, NativeStackWalker, SymbolResolver,
};
use crate::core::policy::CapturePolicy;
use crate::core::registry::ThreadRegistry;
use crate::core::unwind::{BacktraceWalker, DladdrResolver, NoManagedStack};
use crate::hook::shim::InterceptionShim;
use crate::hook::{HookContext, HookError, PthreadHook, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable holding `;`-separated capture patterns
pub const PATTERNS_ENV: &str = "PTHREAD_HOOK_PATTERNS";

/// Environment variable holding the default dump path
pub const DUMP_PATH_ENV: &str = "PTHREAD_HOOK_DUMP_PATH";

/// Configuration for a hook
#[derive(Debug, Clone)]
pub struct HookConfig {
	/// Thread name patterns that trigger a capture
	pub patterns: Vec<String>,
	/// Largest managed stack text kept per thread, in bytes
	pub managed_stack_capacity: usize,
	/// Where `dump_default` writes the report
	pub dump_path: Option<PathBuf>,
}

impl Default for HookConfig {
	fn default() -> Self {
		Self {
			patterns: Vec::new(),
			managed_stack_capacity: DEFAULT_MANAGED_STACK_CAPACITY,
			dump_path: None,
		}
	}
}

/// Builder for creating thread hooks
pub struct PthreadHookBuilder {
	/// The configuration for the hook
	config: HookConfig,
	walker: Option<Box<dyn NativeStackWalker>>,
	resolver: Option<Box<dyn SymbolResolver>>,
	managed: Option<Box<dyn ManagedStackSource>>,
}

impl Default for PthreadHookBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for PthreadHookBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PthreadHookBuilder")
			.field("config", &self.config)
			.field("walker", &self.walker.as_ref().map(|w| w.name()))
			.field("resolver", &if self.resolver.is_some() { "Some(resolver)" } else { "None" })
			.field("managed", &if self.managed.is_some() { "Some(source)" } else { "None" })
			.finish()
	}
}

impl PthreadHookBuilder {
	/// Create a new hook builder with default settings
	#[must_use]
	pub fn new() -> Self {
		Self {
			config: HookConfig::default(),
			walker: None,
			resolver: None,
			managed: None,
		}
	}

	/// Add a capture pattern
	#[must_use]
	pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
		self.config.patterns.push(pattern.into());
		self
	}

	/// Add several capture patterns
	#[must_use]
	pub fn patterns<I, S>(mut self, patterns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.config.patterns.extend(patterns.into_iter().map(Into::into));
		self
	}

	/// Set the largest managed stack text kept per thread
	#[must_use]
	pub const fn managed_stack_capacity(mut self, capacity: usize) -> Self {
		self.config.managed_stack_capacity = capacity;
		self
	}

	/// Set the default dump path
	#[must_use]
	pub fn dump_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.config.dump_path = Some(path.into());
		self
	}

	/// Read patterns and dump path from the environment
	#[must_use]
	pub fn from_env(mut self) -> Self {
		if let Ok(patterns) = std::env::var(PATTERNS_ENV) {
			self.config.patterns.extend(
				patterns
					.split(';')
					.map(str::trim)
					.filter(|p| !p.is_empty())
					.map(String::from),
			);
		}
		if let Some(path) = std::env::var_os(DUMP_PATH_ENV) {
			self.config.dump_path = Some(PathBuf::from(path));
		}
		self
	}

	/// Set the native stack walker
	#[must_use]
	pub fn stack_walker<W: NativeStackWalker + 'static>(mut self, walker: W) -> Self {
		self.walker = Some(Box::new(walker));
		self
	}

	/// Set the symbol resolver used by reports
	#[must_use]
	pub fn symbol_resolver<R: SymbolResolver + 'static>(mut self, resolver: R) -> Self {
		self.resolver = Some(Box::new(resolver));
		self
	}

	/// Set the managed stack source
	#[must_use]
	pub fn managed_stack_source<M: ManagedStackSource + 'static>(mut self, source: M) -> Self {
		self.managed = Some(Box::new(source));
		self
	}

	/// Build the hook
	///
	/// Patterns that fail to compile are logged and skipped.
	pub fn build(self) -> Result<PthreadHook> {
		if self.config.managed_stack_capacity == 0 {
			return Err(HookError::Other("managed stack capacity must be non-zero".to_string()));
		}

		let policy = CapturePolicy::with_patterns(&self.config.patterns);
		let registry = Arc::new(ThreadRegistry::new(policy));

		let walker = self.walker.unwrap_or_else(|| Box::new(BacktraceWalker::new()));
		let managed = self.managed.unwrap_or_else(|| Box::new(NoManagedStack::new()));
		let capture = DiagnosticsCapture::new(walker, managed, self.config.managed_stack_capacity);

		let resolver = self.resolver.unwrap_or_else(|| Box::new(DladdrResolver::new()));
		let shim = InterceptionShim::new(registry, capture);

		Ok(PthreadHook::new(HookContext::new(self.config, shim, resolver)))
	}
}
