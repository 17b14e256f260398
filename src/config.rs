use std::env;
use std::path::PathBuf;

const PROMPT: &'static str = "myshell>";
const MAX_LINE_LEN: usize = 2048;
const HISTORY_CAPACITY: usize = 100;
const RC_FILE: &'static str = ".shellrc";
const MAX_SOURCE_DEPTH: usize = 16;

/// Final path components starting with this are temporary directories owned by
/// the cleanup registry.
pub const TEMP_DIR_PREFIX: &'static str = "shell-";

const PROMPT_KEY: &'static str = "MYSHELL_PROMPT";
const HISTSIZE_KEY: &'static str = "MYSHELL_HISTSIZE";

#[derive(Debug, Clone)]
pub struct Config {
	pub prompt: String,
	pub max_line_len: usize,
	pub history_capacity: usize,
	pub rc_file: PathBuf,
	pub max_source_depth: usize,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			prompt: PROMPT.to_string(),
			max_line_len: MAX_LINE_LEN,
			history_capacity: HISTORY_CAPACITY,
			rc_file: PathBuf::from(RC_FILE),
			max_source_depth: MAX_SOURCE_DEPTH,
		}
	}
}

impl Config {
	pub fn from_env() -> Config {
		let mut config = Config::default();
		if let Ok(prompt) = env::var(PROMPT_KEY) {
			config.prompt = prompt;
		}
		if let Ok(size) = env::var(HISTSIZE_KEY) {
			match size.trim().parse::<usize>() {
				Ok(n) if n > 0 => config.history_capacity = n,
				_ => log::warn!("ignoring {}={:?}", HISTSIZE_KEY, size),
			}
		}
		config
	}
}
