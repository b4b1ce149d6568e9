//! Capture policy
//!
//! Decides, from a thread name, whether a stack capture should happen.
//! Patterns are kept in lexicographic order of their source text and the
//! first one that accepts the name wins.

use crate::core::metadata::ThreadName;
use crate::hook::{HookError, Result};
use regex::bytes::Regex;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// A name pattern together with its compiled matcher
#[derive(Debug, Clone)]
pub struct CompiledPattern {
	source: String,
	matcher: Regex,
}

impl CompiledPattern {
	/// Compile a pattern
	pub fn compile(source: &str) -> Result<Self> {
		let matcher = Regex::new(source).map_err(|e| HookError::InvalidPattern {
			pattern: source.to_string(),
			source: e,
		})?;
		Ok(Self {
			source: source.to_string(),
			matcher,
		})
	}

	/// The text the pattern was compiled from
	#[must_use]
	pub fn source(&self) -> &str {
		&self.source
	}

	/// Whether the pattern matches anywhere in `name`
	#[must_use]
	pub fn matches(&self, name: &ThreadName) -> bool {
		self.matcher.is_match(name.as_bytes())
	}
}

/// Ordered set of compiled name patterns
#[derive(Debug, Clone, Default)]
pub struct CapturePolicy {
	patterns: BTreeMap<String, CompiledPattern>,
}

impl CapturePolicy {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Build a policy from pattern texts, dropping the ones that fail to compile
	pub fn with_patterns<I, S>(patterns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut policy = Self::new();
		for pattern in patterns {
			policy.add_pattern(pattern.as_ref());
		}
		policy
	}

	/// Register a pattern
	///
	/// A pattern that fails to compile is logged and discarded; previously
	/// registered patterns are unaffected. Registering the same text twice
	/// keeps the first compilation.
	pub fn add_pattern(&mut self, source: &str) -> bool {
		match CompiledPattern::compile(source) {
			Ok(pattern) => {
				debug!("thread name regex: {}", source);
				self.patterns.entry(source.to_string()).or_insert(pattern);
				true
			},
			Err(e) => {
				error!("regex compile error: {}", e);
				false
			},
		}
	}

	/// First pattern, in source-text order, that accepts `name`
	#[must_use]
	pub fn first_match(&self, name: &ThreadName) -> Option<&CompiledPattern> {
		self.patterns.values().find(|pattern| pattern.matches(name))
	}

	/// Pattern sources in evaluation order
	pub fn sources(&self) -> impl Iterator<Item = &str> {
		self.patterns.keys().map(String::as_str)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.patterns.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}
}
