//! Retained thread report
//!
//! Writes one block per live registered thread:
//!
//! ```text
//! ========> RETAINED PTHREAD { name : <name>, parent: <creation name>, tid: <tid> }
//! native stacktrace:
//!   #pc <rel pc hex> <symbol or (null)> (<module>)
//! java stacktrace:
//! <managed stack text>
//! ```
//!
//! The native section appears only when frames were captured, the managed
//! section only when managed text was stored (its label is written even
//! if that text is empty).

use crate::core::capture::SymbolResolver;
use crate::core::metadata::ThreadMetadata;
use crate::core::registry::ThreadRegistry;
use crate::hook::Result;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, error};

/// Placeholder for frames without a resolvable symbol or module
pub const UNRESOLVED: &str = "(null)";

/// Formats the registry's live threads into a report
pub struct ReportGenerator<'a> {
	registry: &'a ThreadRegistry,
	resolver: &'a dyn SymbolResolver,
}

impl<'a> ReportGenerator<'a> {
	#[must_use]
	pub fn new(registry: &'a ThreadRegistry, resolver: &'a dyn SymbolResolver) -> Self {
		Self { registry, resolver }
	}

	/// Write the report for every live thread to `sink`
	///
	/// The records are copied under the registry lock; symbol resolution
	/// and output run after it is released. Returns the number of thread
	/// blocks written.
	pub fn dump<W: Write>(&self, sink: &mut W) -> io::Result<usize> {
		let snapshot = self.registry.snapshot();

		for record in &snapshot {
			self.write_block(sink, record)?;
		}
		sink.flush()?;
		Ok(snapshot.len())
	}

	/// Write the report to the file at `path`, truncating it
	///
	/// If the file cannot be opened nothing is written and the registry is
	/// left as it was.
	pub fn dump_to_path(&self, path: &Path) -> Result<usize> {
		debug!(">>>>>>>>>>>>>>>>>> pthread dump begin <<<<<<<<<<<<<<<<<<");
		debug!("pthread dump path = {}", path.display());

		let file = File::create(path).map_err(|e| {
			error!("open file failed: {}: {}", path.display(), e);
			e
		})?;

		let mut writer = BufWriter::new(file);
		let blocks = self.dump(&mut writer)?;

		debug!(">>>>>>>>>>>>>>>>>> pthread dump end ({} threads) <<<<<<<<<<<<<<<<<<", blocks);
		Ok(blocks)
	}

	fn write_block<W: Write>(&self, sink: &mut W, record: &ThreadMetadata) -> io::Result<()> {
		let header = format!(
			"========> RETAINED PTHREAD {{ name : {}, parent: {}, tid: {} }}",
			record.current_name(),
			record.creation_name(),
			record.os_tid()
		);
		debug!("{}", header);
		writeln!(sink, "{header}")?;

		if let Some(frames) = record.native_frames().filter(|frames| !frames.is_empty()) {
			writeln!(sink, "native stacktrace:")?;
			for frame in frames {
				let resolved = self.resolver.resolve(frame.pc);
				let line = format!(
					"  #pc {:x} {} ({})",
					frame.rel_pc,
					resolved.symbol.as_deref().unwrap_or(UNRESOLVED),
					resolved.module.as_deref().unwrap_or(UNRESOLVED)
				);
				debug!("{}", line);
				writeln!(sink, "{line}")?;
			}
		}

		if let Some(managed) = record.managed_stack() {
			debug!("java stacktrace:\n{}", managed);
			writeln!(sink, "java stacktrace:\n{managed}")?;
		}

		Ok(())
	}
}
