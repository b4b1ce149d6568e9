//! Logging utilities for pthread-hook
//!
//! This module provides logging functionality for pthread-hook.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable that raises the default log level to debug
pub const DEBUG_ENV: &str = "PTHREAD_HOOK_DEBUG";

// Initialize logging once
static INIT: Once = Once::new();

/// Initialize the tracing system
///
/// This function sets up tracing with an `EnvFilter` that:
/// - Honors the `RUST_LOG` environment variable if set
/// - Uses the `PTHREAD_HOOK_DEBUG` environment variable to control logging level
/// - Only logs warnings and errors by default
///
/// A subscriber installed earlier by the host is left in place.
pub fn init_logging() {
	INIT.call_once(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			if std::env::var_os(DEBUG_ENV).is_some() {
				EnvFilter::new("pthread_hook_rs=debug")
			} else {
				EnvFilter::new("pthread_hook_rs=warn")
			}
		});

		let _ = tracing_subscriber::registry()
			.with(fmt::layer().with_target(true).with_writer(std::io::stderr))
			.with(filter)
			.try_init();
	});
}

/// Most verbose level enabled for this crate, as a lowercase string
///
/// Returns `"off"` when nothing is enabled.
#[must_use]
pub fn log_level() -> &'static str {
	use tracing::Level;

	if tracing::enabled!(Level::TRACE) {
		"trace"
	} else if tracing::enabled!(Level::DEBUG) {
		"debug"
	} else if tracing::enabled!(Level::INFO) {
		"info"
	} else if tracing::enabled!(Level::WARN) {
		"warn"
	} else if tracing::enabled!(Level::ERROR) {
		"error"
	} else {
		"off"
	}
}
