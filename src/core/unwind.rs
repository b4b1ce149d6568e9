//! Default capture collaborators
//!
//! Native unwinding through the `backtrace` crate with module-relative
//! offsets taken from a [`ModuleMap`] snapshot, symbol lookup through
//! `dladdr`, and a managed stack source for processes without a VM.
//!
//! The walker never calls into the dynamic loader while unwinding: the
//! registry lock is held during a capture, and a thread inside `dlopen`
//! may be waiting for that lock while holding the loader's own.

use crate::core::capture::{ManagedStackSource, NativeStackWalker, ResolvedSymbol, SymbolResolver};
use crate::core::metadata::NativeFrame;
use crate::core::modules::ModuleMap;
use backtrace::SymbolName;
use std::ffi::{CStr, c_void};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Frame limit for one unwind
pub const DEFAULT_MAX_FRAMES: usize = 64;

/// Replaceable module map snapshot
#[derive(Debug)]
struct ModuleSnapshot(RwLock<Arc<ModuleMap>>);

impl ModuleSnapshot {
	fn load() -> Self {
		Self(RwLock::new(Arc::new(ModuleMap::load())))
	}

	fn current(&self) -> Arc<ModuleMap> {
		Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
	}

	fn reload(&self) -> Arc<ModuleMap> {
		let map = Arc::new(ModuleMap::load());
		*self.0.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&map);
		map
	}
}

/// Stack walker built on `backtrace::trace`
#[derive(Debug)]
pub struct BacktraceWalker {
	modules: ModuleSnapshot,
}

impl Default for BacktraceWalker {
	fn default() -> Self {
		Self::new()
	}
}

impl BacktraceWalker {
	/// Create a walker with a module map of everything loaded right now
	#[must_use]
	pub fn new() -> Self {
		Self {
			modules: ModuleSnapshot::load(),
		}
	}

	/// The module map frames are currently resolved against
	#[must_use]
	pub fn module_map(&self) -> Arc<ModuleMap> {
		self.modules.current()
	}
}

impl NativeStackWalker for BacktraceWalker {
	fn unwind_current_thread(&self) -> Vec<NativeFrame> {
		let modules = self.modules.current();
		let mut frames = Vec::with_capacity(DEFAULT_MAX_FRAMES);

		backtrace::trace(|frame| {
			let pc = frame.ip() as usize;
			if pc != 0 {
				frames.push(NativeFrame {
					pc,
					rel_pc: modules.relative_pc(pc).unwrap_or(pc),
				});
			}
			frames.len() < DEFAULT_MAX_FRAMES
		});

		frames
	}

	fn refresh_module_map(&self) {
		let map = self.modules.reload();
		debug!("reloaded module map ({} objects)", map.len());
	}

	fn name(&self) -> &'static str {
		"BacktraceWalker"
	}
}

/// Symbol resolver: module from a module map, symbol name from `dladdr`
///
/// Addresses outside the cached map trigger one reload, so objects loaded
/// after the resolver was created are still found.
#[derive(Debug)]
pub struct DladdrResolver {
	modules: ModuleSnapshot,
}

impl Default for DladdrResolver {
	fn default() -> Self {
		Self::new()
	}
}

impl DladdrResolver {
	#[must_use]
	pub fn new() -> Self {
		Self {
			modules: ModuleSnapshot::load(),
		}
	}
}

impl SymbolResolver for DladdrResolver {
	fn resolve(&self, pc: usize) -> ResolvedSymbol {
		let mut modules = self.modules.current();
		if modules.lookup(pc).is_none() {
			modules = self.modules.reload();
		}
		let Some(module) = modules.lookup(pc) else {
			return ResolvedSymbol::default();
		};

		ResolvedSymbol {
			module: Some(module.path.clone()),
			symbol: symbol_name(pc),
		}
	}
}

/// Demangled name of the dynamic symbol containing `pc`
fn symbol_name(pc: usize) -> Option<String> {
	let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
	if unsafe { libc::dladdr(pc as *const c_void, &mut info) } == 0 || info.dli_sname.is_null() {
		return None;
	}
	// Valid while the object stays loaded
	let raw = unsafe { CStr::from_ptr(info.dli_sname) };
	Some(SymbolName::new(raw.to_bytes()).to_string())
}

/// Managed stack source for processes without a managed runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct NoManagedStack;

impl NoManagedStack {
	#[must_use]
	pub const fn new() -> Self {
		Self
	}
}

impl ManagedStackSource for NoManagedStack {
	fn capture_current_stack(&self, _capacity: usize) -> Option<String> {
		None
	}
}
