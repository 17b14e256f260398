mod builtin;
mod cleanup;
mod config;
mod editor;
mod error;
mod eval;
mod global;
mod history;
mod job;
mod parser;
mod signals;
mod term;
mod types;

use std::{env,fs,process};

use nix::unistd;

use config::Config;
use editor::Editor;
use error::Result;
use eval::Flow;
use global::Session;
use signals::Signals;

const SHELL_KEY: &'static str = "SHELL";

fn set_shell_path() {
	let exe = env::args_os().next()
		.and_then(|arg0| fs::canonicalize(arg0).ok())
		.or_else(|| env::current_exe().ok());
	if let Some(path) = exe {
		env::set_var(SHELL_KEY, path);
	}
}

/// Turns the outcome of a line into "keep going" or an exit status.
fn settle(r: Result<Flow>) -> Result<Option<i32>> {
	match r {
		Ok(Flow::Exit(code)) => Ok(Some(code)),
		Ok(_) => Ok(None),
		Err(e) if e.is_fatal() => Err(e),
		Err(e) => {
			eprintln!("myshell: {}", e);
			Ok(None)
		},
	}
}

fn run() -> Result<i32> {
	set_shell_path();
	let signals = Signals::install()?;
	let mut session = Session::new(Config::from_env());
	let interactive = unistd::isatty(libc::STDIN_FILENO).unwrap_or(false);
	log::debug!("starting, interactive: {}", interactive);

	let rc_file = session.config.rc_file.clone();
	if rc_file.is_file() {
		if let Some(code) = settle(session.run_script(&rc_file))? {
			return Ok(code);
		}
	}

	let mut editor = Editor::new(&session.config);
	loop {
		if signals.take_child_exit() {
			session.jobs.reap();
		}
		if signals.take_interrupt() {
			session.abandon();
			if interactive {
				println!();
			}
		}
		let line = if interactive {
			editor.read_terminal_line(&signals, &mut session.jobs, &mut session.history)?
		} else {
			editor::read_plain_line(libc::STDIN_FILENO)?
		};
		let line = match line {
			Some(l) => l,
			None => return Ok(0),
		};
		if let Some(code) = settle(session.run_line(&line))? {
			return Ok(code);
		}
	}
}

fn main() {
	env_logger::init();
	let status = match run() {
		Ok(code) => code,
		Err(e) => {
			log::error!("{}", e);
			eprintln!("myshell: {}", e);
			2
		},
	};
	process::exit(status);
}
