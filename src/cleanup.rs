//! Paths created while a line is being built (process substitution fifos and
//! their directories) that must disappear once the pipeline is done with them.

use std::fs;
use std::path::{Path,PathBuf};

use crate::config::TEMP_DIR_PREFIX;

#[derive(Debug, Default)]
pub struct CleanupRegistry {
	paths: Vec<PathBuf>,
}

fn is_temp_dir(path: &Path) -> bool {
	path.file_name()
		.and_then(|name| name.to_str())
		.map_or(false, |name| name.starts_with(TEMP_DIR_PREFIX))
}

impl CleanupRegistry {
	pub fn new() -> CleanupRegistry {
		CleanupRegistry { paths: vec![] }
	}

	pub fn register<P: Into<PathBuf>>(&mut self, path: P) {
		self.paths.push(path.into());
	}

	pub fn len(&self) -> usize {
		self.paths.len()
	}

	pub fn is_empty(&self) -> bool {
		self.paths.is_empty()
	}

	/// Best effort: every file is unlinked before any directory is removed, so
	/// registration order does not matter.
	pub fn drain_and_delete(&mut self) {
		if self.is_empty() {
			return;
		}
		log::debug!("removing {} temporary paths", self.len());
		for path in &self.paths {
			if let Err(e) = fs::remove_file(path) {
				log::debug!("unlink {}: {}", path.display(), e);
			}
		}
		for path in self.paths.iter().filter(|p| is_temp_dir(p)) {
			if let Err(e) = fs::remove_dir(path) {
				log::debug!("rmdir {}: {}", path.display(), e);
			}
		}
		self.paths.clear();
	}
}
