//! Commands that change the shell's own process state and therefore cannot
//! run in a forked child.

use std::env;
use std::path::PathBuf;

use crate::eval::Flow;
use crate::global::Session;

const HOME_KEY: &'static str = "HOME";
const HOME_PLACEHOLDERS: [&'static str; 2] = ["${HOME}", "~"];

pub type Builtin = fn(&mut Session, &[String]) -> Flow;

pub fn builtin_exit(_: &mut Session, _: &[String]) -> Flow {
	println!("Good bye!!");
	Flow::Exit(1)
}

pub fn builtin_cd(_: &mut Session, args: &[String]) -> Flow {
	let target = match args.get(1) {
		Some(dir) if !HOME_PLACEHOLDERS.contains(&dir.as_str()) => PathBuf::from(dir),
		_ => match env::var_os(HOME_KEY) {
			Some(home) => PathBuf::from(home),
			None => {
				eprintln!("cd: HOME not set");
				return Flow::Continue;
			},
		},
	};
	if let Err(e) = env::set_current_dir(&target) {
		log::debug!("chdir {}: {}", target.display(), e);
		eprintln!("cd: can't cd to {}", target.display());
	}
	Flow::Continue
}

fn is_valid_name(name: &str) -> bool {
	!name.is_empty() && !name.contains('=') && !name.contains('\0')
}

pub fn builtin_setenv(_: &mut Session, args: &[String]) -> Flow {
	if args.len() != 3 {
		eprintln!("setenv: usage: setenv NAME VALUE");
	} else if !is_valid_name(&args[1]) || args[2].contains('\0') {
		eprintln!("setenv: invalid variable '{}'", args[1]);
	} else {
		env::set_var(&args[1], &args[2]);
	}
	Flow::Continue
}

pub fn builtin_unsetenv(_: &mut Session, args: &[String]) -> Flow {
	if args.len() != 2 {
		eprintln!("unsetenv: usage: unsetenv NAME");
	} else if !is_valid_name(&args[1]) {
		eprintln!("unsetenv: invalid variable '{}'", args[1]);
	} else {
		env::remove_var(&args[1]);
	}
	Flow::Continue
}

pub fn builtin_source(_: &mut Session, args: &[String]) -> Flow {
	match args.get(1) {
		Some(path) if args.len() == 2 => Flow::Source(PathBuf::from(path)),
		_ => {
			eprintln!("source: usage: source FILE");
			Flow::Continue
		},
	}
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"exit" => Some(builtin_exit),
		"cd" => Some(builtin_cd),
		"setenv" => Some(builtin_setenv),
		"unsetenv" => Some(builtin_unsetenv),
		"source" => Some(builtin_source),
		_ => None,
	}
}
