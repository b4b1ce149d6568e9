//! Shared fixtures for the integration tests
//!
//! Deterministic stand-ins for the native collaborators, and helpers that
//! start real pthreads through the interception shim.

#![allow(dead_code)]

use pthread_hook_rs::{
	InterceptionShim, ManagedStackSource, NativeFrame, NativeStackWalker, ResolvedSymbol, SymbolResolver,
	ThreadHandle,
};
use std::collections::{HashMap, VecDeque};
use std::ffi::{CString, c_int, c_void};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

pub fn frames() -> Vec<NativeFrame> {
	vec![
		NativeFrame { pc: 0x7f00_0010, rel_pc: 0x1 },
		NativeFrame { pc: 0x7f00_0020, rel_pc: 0x2a },
	]
}

/// Walker that replays scripted unwinds, then keeps returning `fallback`
#[derive(Clone)]
pub struct ScriptedWalker {
	script: Arc<Mutex<VecDeque<Vec<NativeFrame>>>>,
	fallback: Vec<NativeFrame>,
	pub calls: Arc<AtomicUsize>,
	pub refreshes: Arc<AtomicUsize>,
}

impl ScriptedWalker {
	/// Always returns the standard two frames
	pub fn new() -> Self {
		Self::scripted(Vec::new(), frames())
	}

	/// Never finds a frame
	pub fn empty() -> Self {
		Self::scripted(Vec::new(), Vec::new())
	}

	pub fn scripted(script: Vec<Vec<NativeFrame>>, fallback: Vec<NativeFrame>) -> Self {
		Self {
			script: Arc::new(Mutex::new(script.into())),
			fallback,
			calls: Arc::new(AtomicUsize::new(0)),
			refreshes: Arc::new(AtomicUsize::new(0)),
		}
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

impl NativeStackWalker for ScriptedWalker {
	fn unwind_current_thread(&self) -> Vec<NativeFrame> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.script
			.lock()
			.unwrap()
			.pop_front()
			.unwrap_or_else(|| self.fallback.clone())
	}

	fn refresh_module_map(&self) {
		self.refreshes.fetch_add(1, Ordering::SeqCst);
	}
}

/// Resolver backed by a fixed table
#[derive(Default)]
pub struct TableResolver {
	entries: HashMap<usize, ResolvedSymbol>,
}

impl TableResolver {
	pub fn new() -> Self {
		let mut entries = HashMap::new();
		entries.insert(
			0x7f00_0010,
			ResolvedSymbol {
				module: Some("/system/lib64/libapp.so".to_string()),
				symbol: Some("start_worker".to_string()),
			},
		);
		entries.insert(
			0x7f00_0020,
			ResolvedSymbol {
				module: Some("/system/lib64/libc.so".to_string()),
				symbol: None,
			},
		);
		Self { entries }
	}
}

impl SymbolResolver for TableResolver {
	fn resolve(&self, pc: usize) -> ResolvedSymbol {
		self.entries.get(&pc).cloned().unwrap_or_default()
	}
}

/// Managed source that always succeeds with the same text
pub struct FixedManagedStack(pub String);

impl ManagedStackSource for FixedManagedStack {
	fn capture_current_stack(&self, _capacity: usize) -> Option<String> {
		Some(self.0.clone())
	}
}

/// A fake handle that no real thread uses
pub fn fake_handle(n: usize) -> ThreadHandle {
	ThreadHandle::from_raw((0xdead_0000 + n) as libc::pthread_t)
}

struct Gates {
	started: Barrier,
	release: Barrier,
}

extern "C" fn parked(arg: *mut c_void) -> *mut c_void {
	let gates = unsafe { Arc::from_raw(arg.cast_const().cast::<Gates>()) };
	gates.started.wait();
	gates.release.wait();
	ptr::null_mut()
}

/// A real pthread created through the shim, parked until released
pub struct ParkedThread {
	thread: libc::pthread_t,
	gates: Arc<Gates>,
}

impl ParkedThread {
	/// Create the thread through the shim and wait until its routine runs
	pub fn spawn(shim: &InterceptionShim) -> Self {
		Self::start(|thread, arg| unsafe { shim.create_thread(libc::pthread_create, thread, ptr::null(), parked, arg) })
	}

	/// Create the thread with plain `pthread_create`, bypassing the wrapper
	pub fn spawn_unwrapped() -> Self {
		Self::start(|thread, arg| unsafe { libc::pthread_create(thread, ptr::null(), parked, arg) })
	}

	fn start(create: impl FnOnce(*mut libc::pthread_t, *mut c_void) -> c_int) -> Self {
		let gates = Arc::new(Gates {
			started: Barrier::new(2),
			release: Barrier::new(2),
		});
		let arg = Arc::into_raw(Arc::clone(&gates)).cast_mut().cast::<c_void>();

		let mut thread: libc::pthread_t = unsafe { std::mem::zeroed() };
		let rc = create(ptr::from_mut(&mut thread), arg);
		assert_eq!(rc, 0, "pthread_create failed");

		gates.started.wait();
		Self { thread, gates }
	}

	pub fn handle(&self) -> ThreadHandle {
		ThreadHandle::from_raw(self.thread)
	}

	pub fn raw(&self) -> libc::pthread_t {
		self.thread
	}

	/// Let the thread return and wait for it to exit
	pub fn release_and_join(self) {
		self.gates.release.wait();
		let rc = unsafe { libc::pthread_join(self.thread, ptr::null_mut()) };
		assert_eq!(rc, 0, "pthread_join failed");
	}
}

/// Run `f` on a std thread whose OS name is `name`
pub fn on_named_thread<T, F>(name: &str, f: F) -> T
where
	T: Send + 'static,
	F: FnOnce() -> T + Send + 'static,
{
	std::thread::Builder::new()
		.name(name.to_string())
		.spawn(f)
		.expect("spawn named thread")
		.join()
		.expect("named thread panicked")
}

/// Environment variable the fixture library's constructor reads a callback address from
pub const FIXTURE_CALLBACK_ENV: &str = "PTHREAD_HOOK_FIXTURE_CALLBACK";

const FIXTURE_SOURCE: &str = r#"
#include <stdint.h>
#include <stdlib.h>

typedef void (*callback_t)(void);

__attribute__((constructor)) static void fixture_init(void) {
	const char *addr = getenv("PTHREAD_HOOK_FIXTURE_CALLBACK");
	if (addr != NULL) {
		callback_t callback = (callback_t)(uintptr_t)strtoull(addr, NULL, 16);
		callback();
	}
}

int fixture_entry(int x) {
	return x + 1;
}
"#;

/// Compile the fixture shared library into `dir`
///
/// Returns `None` when no C compiler is available.
pub fn build_fixture_library(dir: &Path) -> Option<PathBuf> {
	let source = dir.join("fixture.c");
	let output = dir.join("libfixture.so");
	std::fs::write(&source, FIXTURE_SOURCE).ok()?;

	let compiler = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
	let status = Command::new(compiler)
		.args(["-shared", "-fPIC", "-o"])
		.arg(&output)
		.arg(&source)
		.status()
		.ok()?;
	status.success().then_some(output)
}

/// `dlopen` a library with `RTLD_NOW`
pub fn load_library(path: &Path) -> *mut c_void {
	let path = CString::new(path.to_string_lossy().into_owned()).unwrap();
	let handle = unsafe { libc::dlopen(path.as_ptr(), libc::RTLD_NOW) };
	assert!(!handle.is_null(), "dlopen failed");
	handle
}
