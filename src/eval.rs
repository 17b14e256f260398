use std::{env,fs,io,mem};
use std::ffi::CString;
use std::io::Write;
use std::os::fd::{AsRawFd,FromRawFd,OwnedFd,RawFd};
use std::os::unix::ffi::{OsStrExt,OsStringExt};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path,PathBuf};

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::{self,ForkResult,Pid};

use crate::builtin;
use crate::config::TEMP_DIR_PREFIX;
use crate::error::{Result,ShellError};
use crate::global::Session;
use crate::job;
use crate::types::{Pipeline,RedirectMode,SimpleCommand};

const STDIN: RawFd = libc::STDIN_FILENO;
const STDOUT: RawFd = libc::STDOUT_FILENO;
const STDERR: RawFd = libc::STDERR_FILENO;

const CREATE_MODE: u32 = 0o664;
const PRINTENV: &'static str = "printenv";

/// What the prompt loop should do once a line has been executed.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
	Continue,
	Exit(i32),
	Source(PathBuf),
}

/// Copies of the shell's own standard descriptors, put back in place when
/// dropped so that every return path restores them.
struct SavedStdio {
	fds: [OwnedFd; 3],
}

fn dup_owned(fd: RawFd) -> Result<OwnedFd> {
	let copy = unistd::dup(fd)?;
	Ok(unsafe { OwnedFd::from_raw_fd(copy) })
}

impl SavedStdio {
	fn capture() -> Result<SavedStdio> {
		Ok(SavedStdio { fds: [dup_owned(STDIN)?, dup_owned(STDOUT)?, dup_owned(STDERR)?] })
	}

	fn raw(&self) -> [RawFd; 3] {
		[self.fds[0].as_raw_fd(), self.fds[1].as_raw_fd(), self.fds[2].as_raw_fd()]
	}
}

impl Drop for SavedStdio {
	fn drop(&mut self) {
		for (target, saved) in self.fds.iter().enumerate() {
			if let Err(e) = unistd::dup2(saved.as_raw_fd(), target as RawFd) {
				log::error!("cannot restore descriptor {}: {}", target, e);
			}
		}
	}
}

fn bind(fd: OwnedFd, target: RawFd) -> Result<()> {
	unistd::dup2(fd.as_raw_fd(), target)?;
	Ok(())
}

fn open_redirect(path: &Path, mode: Option<RedirectMode>) -> Result<OwnedFd> {
	let mut oopt = fs::OpenOptions::new();
	let _ = match mode {
		None => oopt.read(true),
		Some(RedirectMode::Overwrite) => oopt.write(true).create(true).truncate(true).mode(CREATE_MODE),
		Some(RedirectMode::Append) => oopt.append(true).create(true).mode(CREATE_MODE),
	};
	match oopt.open(path) {
		Ok(file) => Ok(OwnedFd::from(file)),
		Err(e) => Err(ShellError::Redirect { path: path.display().to_string(), source: e }),
	}
}

/// A stage resolved before any fork, so that the child only has to exec or
/// write out bytes it already owns.
#[derive(Debug)]
enum Program {
	PrintEnv(Vec<u8>),
	Exec(Vec<CString>),
}

impl Program {
	fn resolve(command: &SimpleCommand) -> Result<Program> {
		if command.name() == PRINTENV {
			let mut dump: Vec<u8> = vec![];
			for (k, v) in env::vars_os() {
				dump.extend(k.into_vec());
				dump.push(b'=');
				dump.extend(v.into_vec());
				dump.push(b'\n');
			}
			return Ok(Program::PrintEnv(dump));
		}
		let argv: std::result::Result<Vec<CString>, _> = command.arguments().iter()
			.map(|s| CString::new(s.as_bytes()))
			.collect();
		Ok(Program::Exec(argv?))
	}
}

fn write_raw(fd: RawFd, mut buf: &[u8]) {
	while !buf.is_empty() {
		let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
		if n <= 0 {
			if n < 0 && nix::errno::Errno::last() == nix::errno::Errno::EINTR {
				continue;
			}
			return;
		}
		buf = &buf[n as usize ..];
	}
}

/// Entry point of every forked stage. Never returns to the caller's flow.
/// Everything it touches was resolved before the fork; the only allocation
/// left is the pointer array `execvp` builds, which is fine since the shell
/// is single-threaded.
fn run_stage(program: &Program, saved: &[RawFd]) -> ! {
	match *program {
		Program::PrintEnv(ref dump) => {
			write_raw(STDOUT, dump);
			unsafe { libc::_exit(0) }
		},
		Program::Exec(ref argv) => {
			for &fd in saved {
				let _ = unistd::close(fd);
			}
			let e = match unistd::execvp(&argv[0], argv.as_slice()) {
				Err(e) => e,
				Ok(never) => match never {},
			};
			write_raw(STDERR, argv[0].as_bytes());
			write_raw(STDERR, b": ");
			write_raw(STDERR, e.desc().as_bytes());
			write_raw(STDERR, b"\n");
			unsafe { libc::_exit(1) }
		},
	}
}

fn flush_stdio() {
	let _ = io::stdout().flush();
	let _ = io::stderr().flush();
}

fn spawn_stages(pipeline: &Pipeline, programs: &[Program], saved: &SavedStdio,
                pids: &mut Vec<Pid>) -> Result<()> {
	let mut next_input = Some(match pipeline.input() {
		Some(path) => open_redirect(path, None)?,
		None => dup_owned(saved.raw()[0])?,
	});
	let fderr = match pipeline.error() {
		Some(redirect) => open_redirect(&redirect.target, Some(redirect.mode))?,
		None => dup_owned(saved.raw()[2])?,
	};
	bind(fderr, STDERR)?;

	let last = programs.len() - 1;
	for (i, program) in programs.iter().enumerate() {
		if let Some(fdin) = next_input.take() {
			bind(fdin, STDIN)?;
		}
		let fdout = if i == last {
			match pipeline.output() {
				Some(redirect) => open_redirect(&redirect.target, Some(redirect.mode))?,
				None => dup_owned(saved.raw()[1])?,
			}
		} else {
			let (pipe_read, pipe_write) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(ShellError::Pipe)?;
			next_input = Some(pipe_read);
			pipe_write
		};
		bind(fdout, STDOUT)?;

		flush_stdio();
		match unsafe { unistd::fork() }.map_err(ShellError::Fork)? {
			ForkResult::Child => run_stage(program, &saved.raw()),
			ForkResult::Parent { child } => {
				log::debug!("stage {} started as {}: {:?}", i, child, pipeline.commands()[i].arguments());
				pids.push(child);
			},
		}
	}
	Ok(())
}

fn eval_pipeline(session: &mut Session, pipeline: &Pipeline) -> Result<Flow> {
	if pipeline.is_empty() {
		return Ok(Flow::Continue);
	}
	let commands = pipeline.commands();
	if let Some(func) = builtin::match_builtin(commands[0].name()) {
		return Ok(func(session, commands[0].arguments()));
	}

	let programs = commands.iter().map(Program::resolve).collect::<Result<Vec<Program>>>()?;
	if let Some(arg) = commands[commands.len() - 1].arguments().last() {
		session.last_arg = arg.clone();
	}

	let mut pids: Vec<Pid> = Vec::with_capacity(programs.len());
	let launched = {
		let saved = SavedStdio::capture()?;
		spawn_stages(pipeline, &programs, &saved, &mut pids)
	};
	if let Err(e) = launched {
		for pid in pids {
			session.jobs.push(pid);
		}
		return Err(e);
	}

	let last_pid = pids[pids.len() - 1];
	for &pid in &pids[.. pids.len() - 1] {
		session.jobs.push(pid);
	}
	if pipeline.is_background() {
		log::debug!("background pipeline, last stage {}", last_pid);
		session.jobs.push(last_pid);
		session.jobs.attach(last_pid, &mut session.producers);
		session.last_background_pid = Some(last_pid);
		session.last_status = 1;
	} else {
		session.last_status = job::wait_for(last_pid)?;
	}
	Ok(Flow::Continue)
}

/// Runs the pipeline under construction. Whatever happens, the pipeline is
/// cleared, leftover substitution producers are stopped and the cleanup
/// registry is drained before this returns.
pub fn execute(session: &mut Session) -> Result<Flow> {
	let pipeline = mem::take(&mut session.pipeline);
	let r = eval_pipeline(session, &pipeline);
	session.retire_producers();
	session.cleanup.drain_and_delete();
	r
}

/// `<(argv...)`: a fifo in a fresh temporary directory, fed by a forked
/// producer. Both paths go to the cleanup registry.
pub fn substitute(session: &mut Session, argv: Vec<String>) -> Result<PathBuf> {
	let command = match SimpleCommand::new(argv) {
		Some(c) => c,
		None => return Err(ShellError::Syntax("empty process substitution".to_string())),
	};
	let program = Program::resolve(&command)?;

	let template = env::temp_dir().join(format!("{}XXXXXX", TEMP_DIR_PREFIX));
	let dir = unistd::mkdtemp(&template)?;
	session.cleanup.register(&dir);
	let fifo = dir.join("fifo");
	unistd::mkfifo(&fifo, Mode::S_IRUSR | Mode::S_IWUSR)?;
	session.cleanup.register(&fifo);
	let fifo_c = CString::new(fifo.as_os_str().as_bytes())?;

	flush_stdio();
	match unsafe { unistd::fork() }.map_err(ShellError::Fork)? {
		ForkResult::Child => {
			let fd = unsafe { libc::open(fifo_c.as_ptr(), libc::O_WRONLY) };
			if fd < 0 || unistd::dup2(fd, STDOUT).is_err() {
				unsafe { libc::_exit(1) }
			}
			let _ = unistd::close(fd);
			run_stage(&program, &[])
		},
		ForkResult::Parent { child } => {
			log::debug!("substitution producer {} writes {}", child, fifo.display());
			session.producers.push(child);
		},
	}
	Ok(fifo)
}
