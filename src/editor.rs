//! Raw-keystroke line editing with history recall.
//!
//! The terminal is driven with a fixed vocabulary: BS (8) moves left, `ESC [ C`
//! moves right, spaces overwrite. Nothing else is assumed about the terminal.

use std::io;
use std::io::Write;
use std::os::fd::{BorrowedFd,RawFd};

use nix::errno::Errno;
use nix::poll::{poll,PollFd,PollFlags,PollTimeout};

use crate::config::Config;
use crate::error::Result;
use crate::history::History;
use crate::job::JobSet;
use crate::signals::Signals;
use crate::term::RawMode;

const BACK: u8 = 8;
const CURSOR_RIGHT: &'static [u8] = b"\x1b[C";

const CTRL_A: u8 = 1;
const CTRL_D: u8 = 4;
const CTRL_E: u8 = 5;
const NEWLINE: u8 = 10;
const ESC: u8 = 27;
const USAGE: u8 = 31;
const DEL: u8 = 127;

const USAGE_TEXT: &'static [u8] = b"\n\
 ctrl-?       Print usage\n\
 Backspace    Deletes last character\n\
 ctrl-D       Deletes character under the cursor\n\
 ctrl-A       Moves to the beginning of the line\n\
 ctrl-E       Moves to the end of the line\n\
 left/right   Moves the cursor\n\
 up arrow     See last command in the history\n\
 down arrow   See next command in the history\n";

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Key {
	Byte(u8),
	Interrupted,
	Eof,
}

pub trait KeySource {
	fn next_key(&mut self) -> io::Result<Key>;
}

fn repeat<W: Write>(out: &mut W, bytes: &[u8], n: usize) -> io::Result<()> {
	for _ in 0 .. n {
		out.write_all(bytes)?;
	}
	Ok(())
}

/// The line being edited. Every operation echoes exactly the bytes needed to
/// keep the screen in sync with `buf` and `cursor`.
#[derive(Debug)]
pub struct EditBuffer {
	buf: Vec<u8>,
	cursor: usize,
	max_len: usize,
}

impl EditBuffer {
	pub fn new(max_len: usize) -> EditBuffer {
		EditBuffer { buf: Vec::with_capacity(max_len), cursor: 0, max_len: max_len }
	}

	#[cfg(test)]
	pub fn as_bytes(&self) -> &[u8] {
		&self.buf
	}

	#[cfg(test)]
	pub fn cursor(&self) -> usize {
		self.cursor
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}

	pub fn to_line(&self) -> String {
		String::from_utf8_lossy(&self.buf).into_owned()
	}

	pub fn reset(&mut self) {
		self.buf.clear();
		self.cursor = 0;
	}

	/// Bytes past the maximum length are dropped.
	pub fn insert<W: Write>(&mut self, ch: u8, out: &mut W) -> io::Result<()> {
		if self.buf.len() >= self.max_len {
			return Ok(());
		}
		if self.cursor == self.buf.len() {
			self.buf.push(ch);
			out.write_all(&[ch])?;
		} else {
			self.buf.insert(self.cursor, ch);
			out.write_all(&self.buf[self.cursor ..])?;
			repeat(out, &[BACK], self.buf.len() - self.cursor - 1)?;
		}
		self.cursor += 1;
		Ok(())
	}

	pub fn backspace<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
		if self.cursor == 0 {
			return Ok(());
		}
		self.cursor -= 1;
		self.buf.remove(self.cursor);
		out.write_all(&[BACK])?;
		self.redraw_tail(out)
	}

	pub fn delete<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
		if self.cursor >= self.buf.len() {
			return Ok(());
		}
		self.buf.remove(self.cursor);
		self.redraw_tail(out)
	}

	// tail, one blank over the stale last cell, back to the cursor
	fn redraw_tail<W: Write>(&self, out: &mut W) -> io::Result<()> {
		out.write_all(&self.buf[self.cursor ..])?;
		out.write_all(b" ")?;
		repeat(out, &[BACK], self.buf.len() - self.cursor + 1)
	}

	pub fn home<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
		repeat(out, &[BACK], self.cursor)?;
		self.cursor = 0;
		Ok(())
	}

	pub fn end<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
		repeat(out, CURSOR_RIGHT, self.buf.len() - self.cursor)?;
		self.cursor = self.buf.len();
		Ok(())
	}

	pub fn left<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
		if self.cursor > 0 {
			out.write_all(&[BACK])?;
			self.cursor -= 1;
		}
		Ok(())
	}

	pub fn right<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
		if self.cursor < self.buf.len() {
			out.write_all(CURSOR_RIGHT)?;
			self.cursor += 1;
		}
		Ok(())
	}

	/// Blanks the displayed line and leaves the terminal cursor at its start.
	/// The buffer itself is untouched.
	pub fn erase_line<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
		repeat(out, &[BACK], self.cursor)?;
		repeat(out, b" ", self.buf.len())?;
		repeat(out, &[BACK], self.buf.len())?;
		self.cursor = 0;
		Ok(())
	}

	pub fn load<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<()> {
		let bytes = line.as_bytes();
		let n = bytes.len().min(self.max_len);
		self.buf.clear();
		self.buf.extend_from_slice(&bytes[.. n]);
		self.cursor = n;
		out.write_all(&self.buf)
	}
}

pub struct Editor {
	buffer: EditBuffer,
	prompt: String,
}

impl Editor {
	pub fn new(config: &Config) -> Editor {
		Editor { buffer: EditBuffer::new(config.max_line_len), prompt: config.prompt.clone() }
	}

	/// Reads one line. `None` means the input ended before anything was typed.
	pub fn read_line<K: KeySource, W: Write>(&mut self, keys: &mut K, out: &mut W,
	                                         history: &mut History) -> io::Result<Option<String>> {
		self.buffer.reset();
		out.write_all(self.prompt.as_bytes())?;
		out.flush()?;
		loop {
			let mut key = keys.next_key()?;
			if key == Key::Byte(ESC) {
				match self.escape(keys, out, history)? {
					Some(k) => key = k,
					None => {
						out.flush()?;
						continue;
					},
				}
			}
			let ch = match key {
				Key::Byte(ch) => ch,
				Key::Interrupted => {
					self.buffer.reset();
					history.reset_cursor();
					out.write_all(b"\n")?;
					out.write_all(self.prompt.as_bytes())?;
					out.flush()?;
					continue;
				},
				Key::Eof => {
					if self.buffer.is_empty() {
						out.flush()?;
						return Ok(None);
					}
					out.write_all(b"\n")?;
					break;
				},
			};
			match ch {
				NEWLINE => {
					out.write_all(b"\n")?;
					break;
				},
				USAGE => {
					out.write_all(USAGE_TEXT)?;
					self.buffer.reset();
					break;
				},
				BACK | DEL => self.buffer.backspace(out)?,
				CTRL_D => self.buffer.delete(out)?,
				CTRL_A => self.buffer.home(out)?,
				CTRL_E => self.buffer.end(out)?,
				32 ..= 255 => self.buffer.insert(ch, out)?,
				_ => {},
			}
			out.flush()?;
		}
		out.flush()?;

		let line = self.buffer.to_line();
		history.push(&line);
		history.reset_cursor();
		Ok(Some(line))
	}

	/// Handles the rest of an `ESC [ x` sequence. An interrupt or end of input
	/// arriving in the middle is handed back to the caller.
	fn escape<K: KeySource, W: Write>(&mut self, keys: &mut K, out: &mut W,
	                                  history: &mut History) -> io::Result<Option<Key>> {
		let mut seq = [0u8; 2];
		for b in seq.iter_mut() {
			match keys.next_key()? {
				Key::Byte(c) => *b = c,
				other => return Ok(Some(other)),
			}
		}
		match seq {
			[b'[', b'A'] => {
				if history.is_empty() {
					return Ok(None);
				}
				self.buffer.erase_line(out)?;
				match history.older() {
					Some(line) => self.buffer.load(line, out)?,
					None => self.buffer.reset(),
				}
			},
			[b'[', b'B'] => {
				if history.is_empty() {
					return Ok(None);
				}
				self.buffer.erase_line(out)?;
				match history.newer() {
					Some(line) => self.buffer.load(line, out)?,
					None => self.buffer.reset(),
				}
			},
			[b'[', b'C'] => self.buffer.right(out)?,
			[b'[', b'D'] => self.buffer.left(out)?,
			_ => {},
		}
		Ok(None)
	}

	/// Interactive entry point: raw mode is held only while the line is being
	/// typed and is restored before the line is handed back.
	pub fn read_terminal_line(&mut self, signals: &Signals, jobs: &mut JobSet,
	                          history: &mut History) -> Result<Option<String>> {
		let _raw = RawMode::enter(libc::STDIN_FILENO)?;
		let mut keys = Terminal { fd: libc::STDIN_FILENO, signals: signals, jobs: jobs };
		let stdout = io::stdout();
		let mut out = stdout.lock();
		let line = self.read_line(&mut keys, &mut out, history)?;
		Ok(line)
	}
}

/// Keys from a terminal descriptor. Waits on the signal self-pipe as well, so
/// an interrupt is seen immediately and exited background children are reaped
/// while the user is typing.
struct Terminal<'a> {
	fd: RawFd,
	signals: &'a Signals,
	jobs: &'a mut JobSet,
}

impl<'a> KeySource for Terminal<'a> {
	fn next_key(&mut self) -> io::Result<Key> {
		loop {
			let (input_ready, woken) = {
				let input = unsafe { BorrowedFd::borrow_raw(self.fd) };
				let mut fds = [
					PollFd::new(input, PollFlags::POLLIN),
					PollFd::new(self.signals.wake_fd(), PollFlags::POLLIN),
				];
				match poll(&mut fds, PollTimeout::NONE) {
					Ok(_) | Err(Errno::EINTR) => {},
					Err(e) => return Err(e.into()),
				}
				let ready = |fd: &PollFd, flags: PollFlags| fd.revents().map_or(false, |r| r.intersects(flags));
				(ready(&fds[0], PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR),
				 ready(&fds[1], PollFlags::POLLIN))
			};
			if woken {
				self.signals.drain_wakeups();
			}
			if self.signals.take_child_exit() {
				self.jobs.reap();
			}
			if self.signals.take_interrupt() {
				return Ok(Key::Interrupted);
			}
			if input_ready {
				match read_byte(self.fd) {
					Ok(Some(b)) => return Ok(Key::Byte(b)),
					Ok(None) => return Ok(Key::Eof),
					Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
					Err(e) => return Err(e.into()),
				}
			}
		}
	}
}

fn read_byte(fd: RawFd) -> nix::Result<Option<u8>> {
	let mut byte: u8 = 0;
	let n = Errno::result(unsafe { libc::read(fd, &mut byte as *mut u8 as *mut libc::c_void, 1) })?;
	Ok(if n == 0 { None } else { Some(byte) })
}

/// Line input without editing, for scripts and pipes. Reads one byte at a
/// time so that whatever follows the line is left for the children.
pub fn read_plain_line(fd: RawFd) -> io::Result<Option<String>> {
	let mut line: Vec<u8> = vec![];
	loop {
		match read_byte(fd) {
			Ok(Some(b'\n')) => break,
			Ok(Some(b)) => line.push(b),
			Ok(None) => {
				if line.is_empty() {
					return Ok(None);
				}
				break;
			},
			Err(Errno::EINTR) => continue,
			Err(e) => return Err(e.into()),
		}
	}
	Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use nix::fcntl::OFlag;
	use nix::sys::signal::{self,Signal};
	use nix::unistd::{self,ForkResult};
	use serial_test::serial;
	use std::collections::VecDeque;
	use std::os::fd::AsRawFd;
	use std::thread::sleep;
	use std::time::Duration;

	struct Script(VecDeque<Key>);

	impl Script {
		fn new(bytes: &[u8]) -> Script {
			Script(bytes.iter().map(|&b| Key::Byte(b)).collect())
		}
	}

	impl KeySource for Script {
		fn next_key(&mut self) -> io::Result<Key> {
			Ok(self.0.pop_front().unwrap_or(Key::Eof))
		}
	}

	const UP: &'static [u8] = b"\x1b[A";
	const DOWN: &'static [u8] = b"\x1b[B";
	const LEFT: &'static [u8] = b"\x1b[D";

	fn editor() -> Editor {
		let mut config = Config::default();
		config.prompt = "> ".to_string();
		Editor::new(&config)
	}

	fn history_of(lines: &[&str]) -> History {
		let mut h = History::new(100);
		for l in lines {
			h.push(l);
		}
		h
	}

	fn type_line(keys: &[&[u8]], history: &mut History) -> (Option<String>, Vec<u8>) {
		let bytes: Vec<u8> = keys.concat();
		let mut out = vec![];
		let line = editor().read_line(&mut Script::new(&bytes), &mut out, history).unwrap();
		(line, out)
	}

	#[test]
	fn insert_at_end_and_in_the_middle() {
		let mut out = vec![];
		let mut b = EditBuffer::new(64);
		for &c in b"abc" {
			b.insert(c, &mut out).unwrap();
		}
		b.insert(b'd', &mut out).unwrap();
		assert_eq!(b.as_bytes(), b"abcd");
		assert_eq!(out, b"abcd");

		let mut b = EditBuffer::new(64);
		b.load("abc", &mut vec![]).unwrap();
		b.home(&mut vec![]).unwrap();
		b.right(&mut vec![]).unwrap();
		let mut out = vec![];
		b.insert(b'X', &mut out).unwrap();
		assert_eq!(b.as_bytes(), b"aXbc");
		assert_eq!(b.cursor(), 2);
		assert_eq!(out, b"Xbc\x08\x08");
	}

	#[test]
	fn backspace_in_the_middle() {
		let mut b = EditBuffer::new(64);
		b.load("aXbc", &mut vec![]).unwrap();
		b.left(&mut vec![]).unwrap();
		b.left(&mut vec![]).unwrap();
		assert_eq!(b.cursor(), 2);
		let mut out = vec![];
		b.backspace(&mut out).unwrap();
		assert_eq!(b.as_bytes(), b"abc");
		assert_eq!(b.cursor(), 1);
		assert_eq!(out, b"\x08bc \x08\x08\x08");
	}

	#[test]
	fn forward_delete_keeps_cursor() {
		let mut b = EditBuffer::new(64);
		b.load("abc", &mut vec![]).unwrap();
		b.home(&mut vec![]).unwrap();
		let mut out = vec![];
		b.delete(&mut out).unwrap();
		assert_eq!(b.as_bytes(), b"bc");
		assert_eq!(b.cursor(), 0);
		assert_eq!(out, b"bc \x08\x08\x08");

		b.end(&mut vec![]).unwrap();
		let mut out = vec![];
		b.delete(&mut out).unwrap();
		assert!(out.is_empty());
		assert_eq!(b.len(), 2);
	}

	#[test]
	fn home_and_end_emit_cursor_moves() {
		let mut b = EditBuffer::new(64);
		b.load("abc", &mut vec![]).unwrap();
		let mut out = vec![];
		b.home(&mut out).unwrap();
		assert_eq!(out, b"\x08\x08\x08");
		let mut out = vec![];
		b.end(&mut out).unwrap();
		assert_eq!(out, b"\x1b[C\x1b[C\x1b[C");
		assert_eq!(b.cursor(), 3);
	}

	#[test]
	fn typed_line_is_returned_and_remembered() {
		let mut h = History::new(10);
		let (line, out) = type_line(&[b"ls -l\n"], &mut h);
		assert_eq!(line.as_deref(), Some("ls -l"));
		assert_eq!(out, b"> ls -l\n");
		assert_eq!(h.get(0), Some("ls -l"));
	}

	#[test]
	fn empty_line_is_not_remembered() {
		let mut h = History::new(10);
		let (line, _) = type_line(&[b"\n"], &mut h);
		assert_eq!(line.as_deref(), Some(""));
		assert!(h.is_empty());
	}

	#[test]
	fn up_arrow_walks_back_through_history() {
		let lines = ["L1", "L2", "L3"];
		assert_eq!(type_line(&[UP, b"\n"], &mut history_of(&lines)).0.as_deref(), Some("L3"));
		assert_eq!(type_line(&[UP, UP, b"\n"], &mut history_of(&lines)).0.as_deref(), Some("L2"));
		assert_eq!(type_line(&[UP, UP, DOWN, b"\n"], &mut history_of(&lines)).0.as_deref(), Some("L3"));
		assert_eq!(type_line(&[DOWN, b"\n"], &mut history_of(&lines)).0.as_deref(), Some(""));
		assert_eq!(type_line(&[UP, DOWN, b"\n"], &mut history_of(&lines)).0.as_deref(), Some(""));
	}

	#[test]
	fn recall_erases_what_was_typed() {
		let mut h = history_of(&["ab"]);
		let (line, out) = type_line(&[b"xyz", LEFT, UP, b"\n"], &mut h);
		assert_eq!(line.as_deref(), Some("ab"));
		// prompt, echo, left, erase (2 back, 3 blanks, 3 back), recalled line
		assert_eq!(out, b"> xyz\x08\x08\x08   \x08\x08\x08ab\n".to_vec());
	}

	#[test]
	fn recalled_line_can_be_edited() {
		let mut h = history_of(&["echo"]);
		let (line, _) = type_line(&[UP, b" hi\n"], &mut h);
		assert_eq!(line.as_deref(), Some("echo hi"));
		assert_eq!(h.len(), 2);
	}

	#[test]
	fn usage_key_prints_help_and_returns_empty() {
		let mut h = History::new(10);
		let (line, out) = type_line(&[b"abc\x1f"], &mut h);
		assert_eq!(line.as_deref(), Some(""));
		assert!(String::from_utf8_lossy(&out).contains("Print usage"));
		assert!(h.is_empty());
	}

	#[test]
	fn overflow_is_dropped_until_newline() {
		let mut config = Config::default();
		config.max_line_len = 4;
		let mut ed = Editor::new(&config);
		let mut h = History::new(10);
		let line = ed.read_line(&mut Script::new(b"abcdef\n"), &mut vec![], &mut h).unwrap();
		assert_eq!(line.as_deref(), Some("abcd"));
	}

	#[test]
	fn control_bytes_are_ignored() {
		let mut h = History::new(10);
		let (line, _) = type_line(&[b"a\x02\x07b\n"], &mut h);
		assert_eq!(line.as_deref(), Some("ab"));
	}

	#[test]
	fn interrupt_discards_the_partial_line() {
		let mut keys = Script::new(b"abc");
		keys.0.push_back(Key::Interrupted);
		keys.0.extend(b"ok\n".iter().map(|&b| Key::Byte(b)));
		let mut out = vec![];
		let mut h = History::new(10);
		let line = editor().read_line(&mut keys, &mut out, &mut h).unwrap();
		assert_eq!(line.as_deref(), Some("ok"));
		assert_eq!(out, b"> abc\n> ok\n".to_vec());
	}

	#[test]
	fn end_of_input_on_empty_buffer_is_none() {
		let mut h = History::new(10);
		assert_eq!(type_line(&[], &mut h).0, None);
		assert_eq!(type_line(&[b"pwd"], &mut h).0.as_deref(), Some("pwd"));
	}

	#[test]
	fn plain_lines_are_read_one_at_a_time() {
		use std::io::{Seek,SeekFrom};
		let mut file = tempfile::tempfile().unwrap();
		file.write_all(b"first\nsecond").unwrap();
		file.seek(SeekFrom::Start(0)).unwrap();
		let fd = file.as_raw_fd();
		assert_eq!(read_plain_line(fd).unwrap().as_deref(), Some("first"));
		assert_eq!(read_plain_line(fd).unwrap().as_deref(), Some("second"));
		assert_eq!(read_plain_line(fd).unwrap(), None);
	}

	#[test]
	fn interrupt_inside_escape_sequence_still_resets() {
		let mut keys = Script::new(b"abc\x1b");
		keys.0.push_back(Key::Interrupted);
		keys.0.extend(b"x\n".iter().map(|&b| Key::Byte(b)));
		let mut out = vec![];
		let mut h = history_of(&["old"]);
		let line = editor().read_line(&mut keys, &mut out, &mut h).unwrap();
		assert_eq!(line.as_deref(), Some("x"));
		assert_eq!(out, b"> abc\n> x\n".to_vec());
	}

	#[test]
	fn end_of_input_inside_escape_sequence_ends_the_line() {
		let mut h = History::new(10);
		assert_eq!(type_line(&[b"ab\x1b["], &mut h).0.as_deref(), Some("ab"));
		assert_eq!(type_line(&[b"\x1b"], &mut h).0, None);
	}

	#[test]
	#[serial]
	fn terminal_keys_follow_input_and_signals() {
		let signals = Signals::install().unwrap();
		signals.take_interrupt();
		signals.take_child_exit();
		signals.drain_wakeups();

		let (read_end, write_end) = unistd::pipe2(OFlag::O_CLOEXEC).unwrap();
		let child = match unsafe { unistd::fork() }.unwrap() {
			ForkResult::Child => unsafe { libc::_exit(0) },
			ForkResult::Parent { child } => child,
		};
		let mut jobs = JobSet::new();
		jobs.push(child);
		{
			let mut keys = Terminal { fd: read_end.as_raw_fd(), signals: &signals, jobs: &mut jobs };

			signal::raise(Signal::SIGINT).unwrap();
			assert_eq!(keys.next_key().unwrap(), Key::Interrupted);

			// the child has exited by now; its SIGCHLD is handled on the way to the byte
			sleep(Duration::from_millis(500));
			unistd::write(&write_end, b"q").unwrap();
			assert_eq!(keys.next_key().unwrap(), Key::Byte(b'q'));

			drop(write_end);
			assert_eq!(keys.next_key().unwrap(), Key::Eof);
		}
		assert!(jobs.is_empty());
	}
}
