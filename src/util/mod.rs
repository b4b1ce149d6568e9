//! Utility modules for pthread-hook
//!
//! This module contains utility functions and types used by pthread-hook.

pub mod logging;

pub use logging::{init_logging, log_level};
