//! Error types for the thread hook
//!
//! This module contains error types and a result type for the hook.

use crate::core::metadata::ThreadHandle;
use std::io;
use thiserror::Error;

/// Result type for hook operations
pub type Result<T> = std::result::Result<T, HookError>;

/// Error type for hook operations
#[derive(Debug, Error)]
pub enum HookError {
	/// A capture pattern failed to compile
	#[error("Invalid capture pattern `{pattern}`: {source}")]
	InvalidPattern {
		pattern: String,
		#[source]
		source: regex::Error,
	},

	/// A thread name is empty or does not fit the kernel's name buffer
	#[error("Illegal thread name of length {len}")]
	InvalidThreadName { len: usize },

	/// No registry entry exists for the thread (the creation hook was lost or has not run yet)
	#[error("No metadata registered for thread {0}")]
	ThreadNotFound(ThreadHandle),

	/// The hook engine could not resolve a symbol
	#[error("Symbol not found: {0}")]
	SymbolNotFound(String),

	/// A hook is already installed in this process
	#[error("A thread hook is already installed")]
	AlreadyInstalled,

	/// The hook is not installed
	#[error("The thread hook is not installed")]
	NotInstalled,

	/// An I/O error occurred
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	/// Other error
	#[error("{0}")]
	Other(String),
}
