//! Installing the hook and routing calls through the C entry points

mod common;

use common::ScriptedWalker;
use pthread_hook_rs::hook::active_hook;
use pthread_hook_rs::{HookEngine, HookError, Result, ffi};
use std::ffi::{CStr, c_void};
use std::ptr;
use std::sync::Mutex;

/// Engine that hands out the libc definitions and remembers what it was asked for
#[derive(Default)]
struct LibcEngine {
	requested: Mutex<Vec<String>>,
}

impl HookEngine for LibcEngine {
	unsafe fn intercept(&self, symbol: &CStr, _wrapper: *const c_void) -> Result<*const c_void> {
		self.requested.lock().unwrap().push(symbol.to_string_lossy().into_owned());
		let original = match symbol.to_bytes() {
			b"pthread_create" => libc::pthread_create as *const c_void,
			b"pthread_setname_np" => libc::pthread_setname_np as *const c_void,
			b"dlopen" => libc::dlopen as *const c_void,
			_ => return Err(HookError::SymbolNotFound(symbol.to_string_lossy().into_owned())),
		};
		Ok(original)
	}

	fn name(&self) -> &'static str {
		"LibcEngine"
	}
}

extern "C" fn quick(_arg: *mut c_void) -> *mut c_void {
	ptr::null_mut()
}

// The active slot is process wide, so everything touching it lives in one test
#[test]
fn install_route_and_uninstall() {
	assert!(active_hook().is_none());

	let engine = LibcEngine::default();
	let mut hook = pthread_hook_rs::new()
		.pattern("^never-matches$")
		.stack_walker(ScriptedWalker::new())
		.build()
		.unwrap()
		.install(&engine)
		.unwrap();

	assert!(hook.is_installed());
	assert_eq!(
		*engine.requested.lock().unwrap(),
		["pthread_create", "pthread_setname_np", "dlopen"]
	);
	let active = active_hook().unwrap();
	assert!(std::sync::Arc::ptr_eq(&active, hook.context()));
	drop(active);

	// Creation through the entry point is recorded, and the exit finalizes it
	let mut thread: libc::pthread_t = unsafe { std::mem::zeroed() };
	let rc = unsafe { ffi::pthread_create_hook(&mut thread, ptr::null(), quick, ptr::null_mut()) };
	assert_eq!(rc, 0);
	assert_eq!(unsafe { libc::pthread_join(thread, ptr::null_mut()) }, 0);
	assert_eq!(hook.registry().thread_count(), 0);

	// A second hook cannot take the slot
	let second = pthread_hook_rs::new().stack_walker(ScriptedWalker::new()).build().unwrap();
	assert!(matches!(second.install(&engine), Err(HookError::AlreadyInstalled)));
	assert!(active_hook().is_some());

	hook.uninstall().unwrap();
	assert!(!hook.is_installed());
	assert!(active_hook().is_none());
	assert!(matches!(hook.uninstall(), Err(HookError::NotInstalled)));

	// With nothing installed the entry points are plain call-through
	let mut thread: libc::pthread_t = unsafe { std::mem::zeroed() };
	let rc = unsafe { ffi::pthread_create_hook(&mut thread, ptr::null(), quick, ptr::null_mut()) };
	assert_eq!(rc, 0);
	assert_eq!(unsafe { libc::pthread_join(thread, ptr::null_mut()) }, 0);
	assert_eq!(hook.registry().thread_count(), 0);

	// Dropping an installed hook frees the slot
	let dropped = pthread_hook_rs::new()
		.stack_walker(ScriptedWalker::new())
		.build()
		.unwrap()
		.install(&engine)
		.unwrap();
	assert!(active_hook().is_some());
	drop(dropped);
	assert!(active_hook().is_none());
}

#[test]
fn zero_managed_capacity_is_rejected() {
	let result = pthread_hook_rs::new().managed_stack_capacity(0).build();
	assert!(matches!(result, Err(HookError::Other(_))));
}

#[test]
fn builder_reads_environment() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("env-dump.txt");

	unsafe {
		std::env::set_var(pthread_hook_rs::hook::PATTERNS_ENV, "^Binder.*; ;^Render.*;(broken");
		std::env::set_var(pthread_hook_rs::hook::DUMP_PATH_ENV, &path);
	}
	let builder = pthread_hook_rs::new().pattern("^io.*").from_env();
	unsafe {
		std::env::remove_var(pthread_hook_rs::hook::PATTERNS_ENV);
		std::env::remove_var(pthread_hook_rs::hook::DUMP_PATH_ENV);
	}

	let hook = builder.stack_walker(ScriptedWalker::new()).build().unwrap();
	let config = hook.context().config();
	assert_eq!(config.patterns, ["^io.*", "^Binder.*", "^Render.*", "(broken"]);
	assert_eq!(config.dump_path.as_deref(), Some(path.as_path()));

	// The broken pattern is dropped when compiled
	let sources: Vec<String> = hook.registry().lock().policy.sources().map(String::from).collect();
	assert_eq!(sources, ["^Binder.*", "^Render.*", "^io.*"]);
}

#[test]
fn logging_initializes_once() {
	pthread_hook_rs::util::init_logging();
	pthread_hook_rs::util::init_logging();

	let level = pthread_hook_rs::util::log_level();
	assert!(["trace", "debug", "info", "warn", "error", "off"].contains(&level));
}
