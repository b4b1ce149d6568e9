//! Per-thread metadata records
//!
//! This module defines the identity of a monitored thread, its bounded
//! name buffers, and the diagnostics captured for it. A record owns every
//! allocation it references; dropping the record releases all of them.

use crate::hook::{HookError, Result};
use libc::{pid_t, pthread_t};
use std::ffi::CStr;
use std::fmt;

/// Size of the kernel thread name buffer, including the terminator
pub const THREAD_NAME_LEN: usize = 16;

/// Name recorded when the platform cannot report a thread's name
pub const PLACEHOLDER_NAME: &[u8] = b"null";

/// Opaque identity of a native thread
///
/// Stable for the thread's lifetime and unique among live threads. The
/// platform may recycle it once the thread has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(pthread_t);

impl ThreadHandle {
	/// Wrap a raw `pthread_t`
	#[must_use]
	pub const fn from_raw(raw: pthread_t) -> Self {
		Self(raw)
	}

	/// The raw `pthread_t`
	#[must_use]
	pub const fn as_raw(self) -> pthread_t {
		self.0
	}

	/// Handle of the calling thread
	#[must_use]
	pub fn current() -> Self {
		Self(unsafe { libc::pthread_self() })
	}
}

impl fmt::Display for ThreadHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#x}", self.0 as usize)
	}
}

/// A thread name that fits the kernel's fixed-size name buffer
///
/// At most `THREAD_NAME_LEN - 1` bytes are stored; names are compared
/// byte-wise over that bounded length.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadName {
	buf: [u8; THREAD_NAME_LEN],
	len: u8,
}

impl ThreadName {
	/// Validate a requested name
	///
	/// Rejects empty names and names that would not leave room for the
	/// terminator in the kernel buffer.
	pub fn new(bytes: &[u8]) -> Result<Self> {
		if bytes.is_empty() || bytes.len() >= THREAD_NAME_LEN {
			return Err(HookError::InvalidThreadName { len: bytes.len() });
		}
		Ok(Self::truncated(bytes))
	}

	/// Validate a requested name given as a C string
	pub fn from_cstr(name: &CStr) -> Result<Self> {
		Self::new(name.to_bytes())
	}

	/// Build a name from bytes reported by the platform, cutting it to fit
	#[must_use]
	pub fn truncated(bytes: &[u8]) -> Self {
		let len = bytes.len().min(THREAD_NAME_LEN - 1);
		let mut buf = [0u8; THREAD_NAME_LEN];
		buf[..len].copy_from_slice(&bytes[..len]);
		Self { buf, len: len as u8 }
	}

	/// The `"null"` placeholder used when the platform query fails
	#[must_use]
	pub fn placeholder() -> Self {
		Self::truncated(PLACEHOLDER_NAME)
	}

	#[must_use]
	pub fn as_bytes(&self) -> &[u8] {
		&self.buf[..self.len as usize]
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.len as usize
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

impl fmt::Display for ThreadName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&String::from_utf8_lossy(self.as_bytes()))
	}
}

impl fmt::Debug for ThreadName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
	}
}

/// One frame of a captured native call stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFrame {
	/// Absolute program counter
	pub pc: usize,
	/// Program counter relative to the base of its containing module
	pub rel_pc: usize,
}

/// Metadata for one live, registered thread
#[derive(Debug, Clone)]
pub struct ThreadMetadata {
	handle: ThreadHandle,
	os_tid: pid_t,
	current_name: ThreadName,
	creation_name: ThreadName,
	native_frames: Option<Vec<NativeFrame>>,
	managed_stack: Option<String>,
	captured: bool,
}

impl ThreadMetadata {
	pub(crate) fn new(handle: ThreadHandle, os_tid: pid_t, creation_name: ThreadName) -> Self {
		Self {
			handle,
			os_tid,
			current_name: creation_name,
			creation_name,
			native_frames: None,
			managed_stack: None,
			captured: false,
		}
	}

	#[must_use]
	pub const fn handle(&self) -> ThreadHandle {
		self.handle
	}

	/// Kernel thread id, or 0 while it is not yet known
	#[must_use]
	pub const fn os_tid(&self) -> pid_t {
		self.os_tid
	}

	#[must_use]
	pub const fn current_name(&self) -> &ThreadName {
		&self.current_name
	}

	/// Name observed at birth, normally inherited from the creating thread
	#[must_use]
	pub const fn creation_name(&self) -> &ThreadName {
		&self.creation_name
	}

	/// Captured native frames; `None` until a capture found at least one
	#[must_use]
	pub fn native_frames(&self) -> Option<&[NativeFrame]> {
		self.native_frames.as_deref()
	}

	#[must_use]
	pub fn managed_stack(&self) -> Option<&str> {
		self.managed_stack.as_deref()
	}

	/// Whether diagnostics have been stored; never resets once set
	#[must_use]
	pub const fn is_captured(&self) -> bool {
		self.captured
	}

	/// Whether the rename-time trigger may still fire for this record
	#[must_use]
	pub fn wants_late_capture(&self) -> bool {
		!self.captured && self.current_name != self.creation_name
	}

	pub(crate) fn set_current_name(&mut self, name: ThreadName) {
		self.current_name = name;
	}

	pub(crate) fn set_os_tid(&mut self, tid: pid_t) {
		if tid != 0 {
			self.os_tid = tid;
		}
	}

	/// Store the results of one capture attempt
	///
	/// Empty frame lists are discarded so a later attempt stays possible.
	/// Returns `true` when this call flipped the record to captured.
	pub(crate) fn commit_capture(&mut self, frames: Vec<NativeFrame>, managed: Option<String>) -> bool {
		if self.captured {
			return false;
		}

		let has_frames = !frames.is_empty();
		if has_frames {
			self.native_frames = Some(frames);
		}

		let has_managed = managed.is_some();
		if has_managed {
			self.managed_stack = managed;
		}

		self.captured = has_frames || has_managed;
		self.captured
	}
}
