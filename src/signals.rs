//! SIGINT and SIGCHLD handling.
//!
//! The handlers never touch shell state directly: they raise a flag and write
//! one byte into a non-blocking self-pipe, so the line editor can wake up from
//! its blocking wait on the terminal. Everything else happens on the main loop.

use std::os::fd::{AsFd,AsRawFd,BorrowedFd,OwnedFd};
use std::sync::atomic::{AtomicBool,AtomicI32,Ordering};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{self,SaFlags,SigAction,SigHandler,SigSet,Signal};
use nix::unistd;

use crate::error::Result;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

fn notify() {
	let fd = WAKE_FD.load(Ordering::SeqCst);
	if fd < 0 {
		return;
	}
	let saved = Errno::last_raw();
	let byte: u8 = 0;
	// a full pipe already guarantees a wakeup
	unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
	Errno::set_raw(saved);
}

extern "C" fn on_interrupt(_: libc::c_int) {
	INTERRUPTED.store(true, Ordering::SeqCst);
	notify();
}

extern "C" fn on_child_exit(_: libc::c_int) {
	CHILD_EXITED.store(true, Ordering::SeqCst);
	notify();
}

#[derive(Debug)]
pub struct Signals {
	wake_read: OwnedFd,
	_wake_write: OwnedFd,
}

impl Signals {
	/// Installs both handlers with `SA_RESTART`, so reads and waits that get
	/// interrupted are resumed instead of failing with `EINTR`.
	pub fn install() -> Result<Signals> {
		let (wake_read, wake_write) = unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
		WAKE_FD.store(wake_write.as_raw_fd(), Ordering::SeqCst);

		let interrupt = SigAction::new(SigHandler::Handler(on_interrupt), SaFlags::SA_RESTART, SigSet::empty());
		let child = SigAction::new(SigHandler::Handler(on_child_exit),
		                           SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP, SigSet::empty());
		unsafe {
			signal::sigaction(Signal::SIGINT, &interrupt)?;
			signal::sigaction(Signal::SIGCHLD, &child)?;
		}
		log::debug!("signal handlers installed, wake fd {}", wake_read.as_raw_fd());
		Ok(Signals { wake_read: wake_read, _wake_write: wake_write })
	}

	pub fn wake_fd(&self) -> BorrowedFd {
		self.wake_read.as_fd()
	}

	/// Empties the self-pipe; the flags carry the actual information.
	pub fn drain_wakeups(&self) {
		let mut buf = [0u8; 64];
		let fd = self.wake_read.as_raw_fd();
		loop {
			match Errno::result(unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) }) {
				Ok(n) if n as usize == buf.len() => continue,
				Err(Errno::EINTR) => continue,
				_ => break,
			}
		}
	}

	pub fn take_interrupt(&self) -> bool {
		INTERRUPTED.swap(false, Ordering::SeqCst)
	}

	pub fn take_child_exit(&self) -> bool {
		CHILD_EXITED.swap(false, Ordering::SeqCst)
	}
}

impl Drop for Signals {
	fn drop(&mut self) {
		WAKE_FD.store(-1, Ordering::SeqCst);
	}
}
