use std::os::fd::{BorrowedFd,RawFd};

use nix::sys::termios::{self,LocalFlags,SetArg,SpecialCharacterIndices,Termios};

use crate::error::Result;

/// Keeps a terminal in raw mode (no line buffering, no echo) until dropped.
/// Signal generation stays on so Ctrl-C still raises SIGINT.
pub struct RawMode {
	fd: RawFd,
	original: Termios,
}

impl RawMode {
	pub fn enter(fd: RawFd) -> Result<RawMode> {
		let tty = unsafe { BorrowedFd::borrow_raw(fd) };
		let original = termios::tcgetattr(tty)?;
		let mut raw = original.clone();
		raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
		raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
		raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
		termios::tcsetattr(tty, SetArg::TCSANOW, &raw)?;
		Ok(RawMode { fd: fd, original: original })
	}
}

impl Drop for RawMode {
	fn drop(&mut self) {
		let tty = unsafe { BorrowedFd::borrow_raw(self.fd) };
		if let Err(e) = termios::tcsetattr(tty, SetArg::TCSANOW, &self.original) {
			log::warn!("cannot restore terminal mode: {}", e);
		}
	}
}
