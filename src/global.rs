use std::fs;
use std::io::{BufRead,BufReader};
use std::path::Path;

use nix::sys::signal::{self,Signal};
use nix::unistd::Pid;

use crate::cleanup::CleanupRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::eval::{self,Flow};
use crate::history::History;
use crate::job::JobSet;
use crate::parser;
use crate::types::Pipeline;

/// Everything that outlives a single line.
pub struct Session {
	pub config: Config,
	pub pipeline: Pipeline,
	pub cleanup: CleanupRegistry,
	pub jobs: JobSet,
	pub producers: Vec<Pid>,
	pub history: History,
	pub last_status: i32,
	pub last_background_pid: Option<Pid>,
	pub last_arg: String,
	source_depth: usize,
}

impl Session {
	pub fn new(config: Config) -> Session {
		let history = History::new(config.history_capacity);
		Session {
			config: config,
			pipeline: Pipeline::new(),
			cleanup: CleanupRegistry::new(),
			jobs: JobSet::new(),
			producers: vec![],
			history: history,
			last_status: 0,
			last_background_pid: None,
			last_arg: String::new(),
			source_depth: 0,
		}
	}

	/// Substitution producers still around once their line is over are told to
	/// stop (they may be blocked opening a fifo nobody reads) and left for
	/// reaping.
	pub fn retire_producers(&mut self) {
		for pid in self.producers.drain(..) {
			let _ = signal::kill(pid, Signal::SIGTERM);
			self.jobs.push(pid);
		}
	}

	/// Throws away a line that was only partly built.
	pub fn abandon(&mut self) {
		self.pipeline.clear();
		self.retire_producers();
		self.cleanup.drain_and_delete();
	}

	/// Parses and executes one line. Recoverable failures are reported here;
	/// only fatal ones come back as errors.
	pub fn run_line(&mut self, line: &str) -> Result<Flow> {
		let r = match parser::parse(self, line) {
			Ok(()) => eval::execute(self),
			Err(e) => {
				self.abandon();
				Err(e)
			},
		};
		match r {
			Ok(Flow::Source(path)) => self.run_script(&path),
			Ok(flow) => Ok(flow),
			Err(e) => {
				if e.is_fatal() {
					return Err(e);
				}
				log::warn!("{}", e);
				eprintln!("myshell: {}", e);
				Ok(Flow::Continue)
			},
		}
	}

	/// Runs every line of a file, stopping early only for `exit`.
	pub fn run_script(&mut self, path: &Path) -> Result<Flow> {
		if self.source_depth >= self.config.max_source_depth {
			eprintln!("source: {}: nested too deeply", path.display());
			return Ok(Flow::Continue);
		}
		let file = match fs::File::open(path) {
			Ok(f) => f,
			Err(e) => {
				eprintln!("source: {}: {}", path.display(), e);
				return Ok(Flow::Continue);
			},
		};
		log::debug!("running {}", path.display());
		self.source_depth += 1;
		let r = self.run_lines(BufReader::new(file));
		self.source_depth -= 1;
		r
	}

	fn run_lines<R: BufRead>(&mut self, reader: R) -> Result<Flow> {
		for line in reader.lines() {
			let line = line?;
			let trimmed = line.trim();
			if trimmed.is_empty() || trimmed.starts_with('#') {
				continue;
			}
			match self.run_line(&line)? {
				Flow::Continue => {},
				flow => return Ok(flow),
			}
		}
		Ok(Flow::Continue)
	}
}
