//! Capture trigger policy: at birth, and again at the first differing rename

mod common;

use common::{FixedManagedStack, ScriptedWalker, fake_handle, frames};
use pthread_hook_rs::{NativeFrame, NativeStackWalker, PthreadHook, ThreadName, ThreadRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

fn name(s: &str) -> ThreadName {
	ThreadName::new(s.as_bytes()).unwrap()
}

fn hook_with(walker: ScriptedWalker, patterns: &[&str]) -> PthreadHook {
	pthread_hook_rs::new()
		.patterns(patterns.iter().copied())
		.stack_walker(walker)
		.build()
		.unwrap()
}

#[test]
fn matching_creation_name_captures_at_birth() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &["^Binder.*"]);
	let handle = fake_handle(1);

	assert!(hook.shim().record_creation(handle, 123, name("Binder:123")));

	let record = hook.registry().get(handle).unwrap();
	assert!(record.is_captured());
	assert_eq!(record.native_frames().unwrap(), frames().as_slice());
	assert_eq!(walker.calls(), 1);
}

#[test]
fn non_matching_creation_name_skips_capture() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &["^Binder.*"]);
	let handle = fake_handle(2);

	hook.shim().record_creation(handle, 0, name("main"));

	let record = hook.registry().get(handle).unwrap();
	assert!(!record.is_captured());
	assert!(record.native_frames().is_none());
	assert_eq!(walker.calls(), 0);
}

#[test]
fn rename_to_matching_name_captures_late() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &["^Render.*"]);
	let handle = fake_handle(3);

	hook.shim().record_creation(handle, 0, name("pool-1"));
	assert_eq!(walker.calls(), 0);

	hook.shim().on_thread_renamed(handle, b"Render-2");

	let record = hook.registry().get(handle).unwrap();
	assert!(record.is_captured());
	assert_eq!(record.current_name(), &name("Render-2"));
	assert_eq!(walker.calls(), 1);
}

#[test]
fn capture_happens_at_most_once() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &["^Render.*", "^pool.*"]);
	let handle = fake_handle(4);

	hook.shim().record_creation(handle, 0, name("pool-1"));
	assert_eq!(walker.calls(), 1);

	for next in ["Render-2", "Render-3", "pool-9", "pool-1"] {
		hook.shim().on_thread_renamed(handle, next.as_bytes());
	}

	let record = hook.registry().get(handle).unwrap();
	assert!(record.is_captured());
	assert_eq!(record.native_frames().unwrap(), frames().as_slice());
	assert_eq!(walker.calls(), 1);
}

#[test]
fn rename_to_creation_name_does_not_retry() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &["^Render.*"]);
	let handle = fake_handle(5);

	hook.shim().record_creation(handle, 0, name("pool-1"));
	hook.registry().add_pattern("^pool.*");
	hook.shim().on_thread_renamed(handle, b"pool-1");

	assert!(!hook.registry().get(handle).unwrap().is_captured());
	assert_eq!(walker.calls(), 0);
}

#[test]
fn empty_unwind_leaves_retry_possible() {
	let walker = ScriptedWalker::scripted(vec![Vec::new()], frames());
	let hook = hook_with(walker.clone(), &["^Render.*"]);
	let handle = fake_handle(6);

	hook.shim().record_creation(handle, 0, name("Render-1"));
	let record = hook.registry().get(handle).unwrap();
	assert!(!record.is_captured());
	assert!(record.native_frames().is_none());

	hook.shim().on_thread_renamed(handle, b"Render-2");
	let record = hook.registry().get(handle).unwrap();
	assert!(record.is_captured());
	assert_eq!(walker.calls(), 2);
}

#[test]
fn managed_stack_alone_counts_as_captured() {
	let hook = pthread_hook_rs::new()
		.pattern("^Binder.*")
		.stack_walker(ScriptedWalker::empty())
		.managed_stack_source(FixedManagedStack("at com.example.Worker.run(Worker.java:42)".to_string()))
		.build()
		.unwrap();
	let handle = fake_handle(7);

	hook.shim().record_creation(handle, 0, name("Binder:1"));

	let record = hook.registry().get(handle).unwrap();
	assert!(record.is_captured());
	assert!(record.native_frames().is_none());
	assert_eq!(record.managed_stack(), Some("at com.example.Worker.run(Worker.java:42)"));
}

#[test]
fn managed_stack_is_truncated_to_capacity() {
	let hook = pthread_hook_rs::new()
		.pattern("^Binder.*")
		.managed_stack_capacity(8)
		.stack_walker(ScriptedWalker::new())
		.managed_stack_source(FixedManagedStack("abcdéfghijkl".to_string()))
		.build()
		.unwrap();
	let handle = fake_handle(8);

	hook.shim().record_creation(handle, 0, name("Binder:2"));

	let managed = hook.registry().get(handle).unwrap().managed_stack().unwrap().to_string();
	assert!(managed.len() <= 8);
	assert_eq!(managed, "abcdéfg");
}

#[test]
fn illegal_rename_leaves_metadata_untouched() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &[".*"]);
	let handle = fake_handle(9);

	hook.shim().record_creation(handle, 0, name("pool-1"));
	hook.shim().on_thread_renamed(handle, b"0123456789abcdef");
	hook.shim().on_thread_renamed(handle, b"");

	let record = hook.registry().get(handle).unwrap();
	assert_eq!(record.current_name(), &name("pool-1"));
	assert_eq!(walker.calls(), 1);
}

#[test]
fn rename_of_unregistered_thread_is_dropped() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &["^Render.*"]);

	hook.shim().on_thread_renamed(fake_handle(10), b"Render-1");

	assert_eq!(hook.registry().thread_count(), 0);
	assert_eq!(walker.calls(), 0);
}

#[test]
fn duplicate_creation_does_not_capture_again() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &["^Binder.*"]);
	let handle = fake_handle(11);

	assert!(hook.shim().record_creation(handle, 1, name("Binder:1")));
	assert!(!hook.shim().record_creation(handle, 2, name("Binder:2")));

	let record = hook.registry().get(handle).unwrap();
	assert_eq!(record.creation_name(), &name("Binder:1"));
	assert_eq!(record.os_tid(), 1);
	assert_eq!(walker.calls(), 1);
}

#[test]
fn library_load_refreshes_module_map() {
	let walker = ScriptedWalker::new();
	let hook = hook_with(walker.clone(), &[]);

	hook.notify_library_loaded(Some(c"libfoo.so"));
	hook.notify_library_loaded(None);

	assert_eq!(walker.refreshes.load(Ordering::SeqCst), 2);
}

/// Records whether the registry lock was held while it unwound
struct LockProbe {
	registry: Arc<OnceLock<Weak<ThreadRegistry>>>,
	lock_was_held: Arc<AtomicBool>,
}

impl NativeStackWalker for LockProbe {
	fn unwind_current_thread(&self) -> Vec<NativeFrame> {
		if let Some(registry) = self.registry.get().and_then(Weak::upgrade) {
			self.lock_was_held.store(registry.try_lock().is_none(), Ordering::SeqCst);
		}
		frames()
	}

	fn refresh_module_map(&self) {}
}

#[test]
fn capture_runs_with_registry_lock_held() {
	let cell = Arc::new(OnceLock::new());
	let held = Arc::new(AtomicBool::new(false));
	let hook = pthread_hook_rs::new()
		.pattern("^Binder.*")
		.stack_walker(LockProbe {
			registry: Arc::clone(&cell),
			lock_was_held: Arc::clone(&held),
		})
		.build()
		.unwrap();
	cell.set(Arc::downgrade(hook.registry())).unwrap();

	hook.shim().record_creation(fake_handle(12), 0, name("Binder:3"));

	assert!(held.load(Ordering::SeqCst));
}
