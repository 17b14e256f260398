use std::mem;

use nix::errno::Errno;
use nix::sys::signal::{self,Signal};
use nix::sys::wait::{self,WaitPidFlag,WaitStatus};
use nix::unistd::Pid;

use crate::error::Result;

pub trait WaitStatusExt {
	fn is_terminated(self) -> bool;
	fn code(self) -> i32;
}

impl WaitStatusExt for WaitStatus {
	fn is_terminated(self) -> bool {
		match self {
			WaitStatus::Exited(..) | WaitStatus::Signaled(..) => true,
			_ => false,
		}
	}
	fn code(self) -> i32 {
		match self {
			WaitStatus::Exited(_, code) => code,
			WaitStatus::Signaled(_, sig, _) => 128 + sig as i32,
			_ => 0,
		}
	}
}

/// Blocks until `pid` terminates and returns its shell exit status.
pub fn wait_for(pid: Pid) -> Result<i32> {
	loop {
		match wait::waitpid(pid, None) {
			Ok(status) if status.is_terminated() => {
				log::debug!("foreground {} finished: {:?}", pid, status);
				return Ok(status.code());
			},
			Ok(_) => continue,
			Err(Errno::EINTR) => continue,
			Err(e) => return Err(e.into()),
		}
	}
}

/// Children nobody waits for synchronously: background pipelines, the
/// non-final stages of foreground pipelines and substitution producers.
/// Only pids recorded here are ever reaped.
#[derive(Debug, Default)]
pub struct JobSet {
	pids: Vec<Pid>,
	// substitution producers of a background line, keyed by its last stage
	producers: Vec<(Pid, Vec<Pid>)>,
}

impl JobSet {
	pub fn new() -> JobSet {
		JobSet { pids: vec![], producers: vec![] }
	}

	pub fn push(&mut self, pid: Pid) {
		self.pids.push(pid);
	}

	/// Tracks `producers` and ties them to `owner`: once `owner` is reaped,
	/// any of them still running is sent SIGTERM.
	pub fn attach(&mut self, owner: Pid, producers: &mut Vec<Pid>) {
		if producers.is_empty() {
			return;
		}
		self.pids.extend_from_slice(producers);
		self.producers.push((owner, mem::take(producers)));
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.pids.len()
	}

	#[cfg(test)]
	pub fn is_empty(&self) -> bool {
		self.pids.is_empty()
	}

	#[cfg(test)]
	pub fn contains(&self, pid: Pid) -> bool {
		self.pids.contains(&pid)
	}

	/// Collects every tracked child that has already terminated, without
	/// blocking. Returns how many were reaped.
	pub fn reap(&mut self) -> usize {
		let before = self.pids.len();
		let mut finished: Vec<Pid> = vec![];
		self.pids.retain(|&pid| {
			match wait::waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
				Ok(WaitStatus::StillAlive) => true,
				Ok(status) if status.is_terminated() => {
					log::debug!("reaped {}: {:?}", pid, status);
					finished.push(pid);
					false
				},
				Ok(_) => true,
				Err(Errno::EINTR) => true,
				Err(e) => {
					log::warn!("dropping {} from job set: {}", pid, e);
					finished.push(pid);
					false
				},
			}
		});
		if !finished.is_empty() {
			self.release_producers(&finished);
		}
		before - self.pids.len()
	}

	// A producer whose reader is gone may be blocked opening a fifo that no
	// longer exists.
	fn release_producers(&mut self, finished: &[Pid]) {
		let pids = &self.pids;
		self.producers.retain(|&(owner, ref producers)| {
			if !finished.contains(&owner) {
				return true;
			}
			for &pid in producers.iter().filter(|&pid| pids.contains(pid)) {
				log::debug!("stopping producer {} of {}", pid, owner);
				let _ = signal::kill(pid, Signal::SIGTERM);
			}
			false
		});
	}
}
