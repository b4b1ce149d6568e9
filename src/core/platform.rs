//! Platform thread queries
//!
//! Kernel thread ids and thread names for native thread handles.

use crate::core::metadata::{THREAD_NAME_LEN, ThreadHandle, ThreadName};
use libc::pid_t;
use std::ffi::CStr;
use tracing::debug;

/// Kernel thread id of the calling thread
#[must_use]
pub fn current_os_tid() -> pid_t {
	nix::unistd::gettid().as_raw()
}

/// Kernel thread id of `handle`, when the platform can tell
#[must_use]
pub fn os_thread_id(handle: ThreadHandle) -> Option<pid_t> {
	#[cfg(target_os = "android")]
	{
		let tid = unsafe { libc::pthread_gettid_np(handle.as_raw()) };
		if tid > 0 {
			return Some(tid);
		}
	}

	if handle == ThreadHandle::current() {
		Some(current_os_tid())
	} else {
		None
	}
}

/// Current name of `handle`
///
/// Falls back to `/proc/self/task/<tid>/stat` when `pthread_getname_np`
/// fails and the thread's kernel id is known.
#[must_use]
pub fn thread_name(handle: ThreadHandle, os_tid: Option<pid_t>) -> Option<ThreadName> {
	let mut buf = [0 as libc::c_char; THREAD_NAME_LEN];
	let rc = unsafe { libc::pthread_getname_np(handle.as_raw(), buf.as_mut_ptr(), buf.len()) };
	if rc == 0 {
		let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
		return Some(ThreadName::truncated(name.to_bytes()));
	}

	debug!("pthread_getname_np failed for {}: {}", handle, rc);
	os_tid.and_then(read_proc_thread_name)
}

/// Read a thread's name from procfs
#[must_use]
pub fn read_proc_thread_name(os_tid: pid_t) -> Option<ThreadName> {
	let path = format!("/proc/self/task/{os_tid}/stat");
	match std::fs::read(&path) {
		Ok(stat) => parse_stat_comm(&stat),
		Err(e) => {
			debug!("file not found: {} ({})", path, e);
			None
		},
	}
}

/// Extract the `comm` field from the contents of a `stat` file
///
/// The field is the text between the first `(` and the last `)`, which
/// keeps names that themselves contain parentheses intact.
#[must_use]
pub fn parse_stat_comm(stat: &[u8]) -> Option<ThreadName> {
	let open = stat.iter().position(|&b| b == b'(')?;
	let close = stat.iter().rposition(|&b| b == b')')?;
	(close > open).then(|| ThreadName::truncated(&stat[open + 1..close]))
}
