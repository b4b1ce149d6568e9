//! Loaded module map
//!
//! A snapshot of the address ranges of every loaded object, taken with
//! `dl_iterate_phdr`. Lookups are binary searches over the snapshot and
//! never enter the dynamic loader, so they can run with the registry lock
//! held while another thread sits inside `dlopen`.

use std::ffi::{CStr, c_int, c_void};
use std::ptr;
use tracing::debug;

#[cfg(target_pointer_width = "64")]
type ElfPhdr = libc::Elf64_Phdr;
#[cfg(target_pointer_width = "32")]
type ElfPhdr = libc::Elf32_Phdr;

/// A loaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
	/// Path of the object; the main executable is reported by its resolved path
	pub path: String,
	/// Address the object's first page is mapped at
	pub base: usize,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
	start: usize,
	end: usize,
	module: usize,
}

/// Address ranges of the loaded objects at the time of the snapshot
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
	modules: Vec<Module>,
	// Sorted by start address, non-overlapping
	segments: Vec<Segment>,
}

struct Collector {
	map: ModuleMap,
	page_size: usize,
	main_path: String,
}

impl ModuleMap {
	/// Snapshot the currently loaded objects
	#[must_use]
	pub fn load() -> Self {
		let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
			size if size > 0 => size as usize,
			_ => 4096,
		};
		let main_path = std::env::current_exe()
			.map(|path| path.to_string_lossy().into_owned())
			.unwrap_or_else(|_| "[main]".to_string());

		let mut collector = Collector {
			map: Self::default(),
			page_size,
			main_path,
		};
		unsafe {
			libc::dl_iterate_phdr(Some(collect_object), ptr::from_mut(&mut collector).cast::<c_void>());
		}

		let mut map = collector.map;
		map.segments.sort_unstable_by_key(|segment| segment.start);
		debug!(
			"module map: {} objects, {} segments",
			map.modules.len(),
			map.segments.len()
		);
		map
	}

	/// The object whose loaded segments contain `pc`
	#[must_use]
	pub fn lookup(&self, pc: usize) -> Option<&Module> {
		let after = self.segments.partition_point(|segment| segment.start <= pc);
		let segment = self.segments[..after].last()?;
		(pc < segment.end).then(|| &self.modules[segment.module])
	}

	/// `pc` relative to the base of its containing object
	#[must_use]
	pub fn relative_pc(&self, pc: usize) -> Option<usize> {
		self.lookup(pc).map(|module| pc - module.base)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.modules.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.modules.is_empty()
	}
}

unsafe extern "C" fn collect_object(info: *mut libc::dl_phdr_info, _size: libc::size_t, data: *mut c_void) -> c_int {
	let collector = unsafe { &mut *data.cast::<Collector>() };
	let info = unsafe { &*info };

	let headers: &[ElfPhdr] = if info.dlpi_phdr.is_null() {
		&[]
	} else {
		unsafe { std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) }
	};

	// Only PT_LOAD segments are mapped
	let loads = || headers.iter().filter(|header| header.p_type == libc::PT_LOAD);
	let Some(lowest) = loads().map(|header| header.p_vaddr as usize).min() else {
		return 0;
	};

	let bias = info.dlpi_addr as usize;
	let path = if info.dlpi_name.is_null() {
		None
	} else {
		Some(unsafe { CStr::from_ptr(info.dlpi_name) }.to_string_lossy().into_owned())
	};
	let path = path
		.filter(|path| !path.is_empty())
		.unwrap_or_else(|| collector.main_path.clone());

	let module = collector.map.modules.len();
	collector.map.modules.push(Module {
		path,
		base: bias.wrapping_add(lowest & !(collector.page_size - 1)),
	});

	for header in loads() {
		let start = bias.wrapping_add(header.p_vaddr as usize);
		collector.map.segments.push(Segment {
			start,
			end: start.wrapping_add(header.p_memsz as usize),
			module,
		});
	}

	0
}
