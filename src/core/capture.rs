//! Diagnostics capture
//!
//! Collaborator traits for native unwinding, symbol resolution and
//! managed-language stack retrieval, plus the capture step that stores
//! their results into a thread record at most once.

use crate::core::metadata::{NativeFrame, ThreadMetadata};
use tracing::debug;

/// Unwinds the calling thread's native stack
pub trait NativeStackWalker: Send + Sync {
	/// Frames of the calling thread, innermost first
	fn unwind_current_thread(&self) -> Vec<NativeFrame>;

	/// Re-read the module map after a library was loaded or unloaded
	fn refresh_module_map(&self);

	/// Get the name of the walker
	///
	/// This is used for debugging and logging purposes.
	fn name(&self) -> &'static str {
		std::any::type_name::<Self>()
	}
}

/// What a program counter resolves to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSymbol {
	/// Path of the containing module
	pub module: Option<String>,
	/// Demangled symbol name
	pub symbol: Option<String>,
}

/// Maps program counters to module and symbol names
pub trait SymbolResolver: Send + Sync {
	fn resolve(&self, pc: usize) -> ResolvedSymbol;
}

/// Source of the managed-language (e.g. Java) stack of the calling thread
pub trait ManagedStackSource: Send + Sync {
	/// The current managed stack as text, or `None` if it is unavailable
	///
	/// `capacity` is the largest text, in bytes, the caller will keep.
	fn capture_current_stack(&self, capacity: usize) -> Option<String>;
}

/// Default capacity for managed stack text, in bytes
pub const DEFAULT_MANAGED_STACK_CAPACITY: usize = 1024;

/// Runs capture attempts against a thread record
pub struct DiagnosticsCapture {
	walker: Box<dyn NativeStackWalker>,
	managed: Box<dyn ManagedStackSource>,
	managed_capacity: usize,
}

impl std::fmt::Debug for DiagnosticsCapture {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DiagnosticsCapture")
			.field("walker", &self.walker.name())
			.field("managed_capacity", &self.managed_capacity)
			.finish()
	}
}

impl DiagnosticsCapture {
	#[must_use]
	pub fn new(
		walker: Box<dyn NativeStackWalker>,
		managed: Box<dyn ManagedStackSource>,
		managed_capacity: usize,
	) -> Self {
		Self {
			walker,
			managed,
			managed_capacity,
		}
	}

	/// Capture diagnostics for `record` unless it already holds some
	///
	/// Must only be called once the policy has matched the record's name,
	/// with the registry lock held. Returns `true` if this attempt stored
	/// diagnostics.
	pub fn attempt(&self, record: &mut ThreadMetadata) -> bool {
		if record.is_captured() {
			return false;
		}

		let frames = self.walker.unwind_current_thread();
		let managed = self
			.managed
			.capture_current_stack(self.managed_capacity)
			.map(|text| truncate_to(text, self.managed_capacity));

		debug!(
			"captured {} native frames, managed stack: {}",
			frames.len(),
			managed.is_some()
		);

		record.commit_capture(frames, managed)
	}

	/// Forward a module map refresh to the stack walker
	pub fn refresh_module_map(&self) {
		self.walker.refresh_module_map();
	}

	#[must_use]
	pub const fn managed_capacity(&self) -> usize {
		self.managed_capacity
	}
}

fn truncate_to(mut text: String, capacity: usize) -> String {
	if text.len() > capacity {
		let mut end = capacity;
		while !text.is_char_boundary(end) {
			end -= 1;
		}
		text.truncate(end);
	}
	text
}
