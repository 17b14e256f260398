use std::collections::VecDeque;

/// Accepted lines, oldest first, with a browsing cursor. A cursor equal to
/// `len()` means the user is not browsing.
#[derive(Debug)]
pub struct History {
	entries: VecDeque<String>,
	capacity: usize,
	index: usize,
}

impl History {
	pub fn new(capacity: usize) -> History {
		History { entries: VecDeque::with_capacity(capacity), capacity: capacity.max(1), index: 0 }
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	#[cfg(test)]
	pub fn get(&self, i: usize) -> Option<&str> {
		self.entries.get(i).map(|s| s.as_str())
	}

	#[cfg(test)]
	pub fn is_browsing(&self) -> bool {
		self.index < self.entries.len()
	}

	pub fn push(&mut self, line: &str) {
		if line.is_empty() {
			return;
		}
		if self.entries.len() == self.capacity {
			self.entries.pop_front();
		}
		self.entries.push_back(line.to_string());
		self.reset_cursor();
	}

	pub fn reset_cursor(&mut self) {
		self.index = self.entries.len();
	}

	/// Steps one entry back, stopping at the oldest one.
	pub fn older(&mut self) -> Option<&str> {
		if self.index > 0 {
			self.index -= 1;
		}
		self.entries.get(self.index).map(|s| s.as_str())
	}

	/// Steps one entry forward; stepping past the newest leaves browsing mode
	/// and yields nothing.
	pub fn newer(&mut self) -> Option<&str> {
		if self.index < self.entries.len() {
			self.index += 1;
		}
		self.entries.get(self.index).map(|s| s.as_str())
	}
}
