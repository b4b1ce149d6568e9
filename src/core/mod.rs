//! Core functionality for pthread-hook
//!
//! This module contains the thread registry, the capture policy and
//! capture step, the lifecycle wrapper every hooked thread starts in,
//! and the platform queries they rely on.

pub mod capture;
pub mod lifecycle;
pub mod metadata;
pub mod modules;
pub mod platform;
pub mod policy;
pub mod registry;
pub mod unwind;
