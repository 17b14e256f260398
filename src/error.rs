use std::{ffi,io};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
	#[error("nix error: {0}")]
	Nix(#[from] nix::Error),
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("nul char error: {0}")]
	Nul(#[from] ffi::NulError),
	#[error("{path}: {source}")]
	Redirect {
		path: String,
		#[source]
		source: io::Error,
	},
	#[error("cannot create pipe: {0}")]
	Pipe(#[source] nix::Error),
	#[error("cannot fork: {0}")]
	Fork(#[source] nix::Error),
	#[error("syntax error: {0}")]
	Syntax(String),
}

impl ShellError {
	/// Pipe and fork failures leave the descriptor or process table in a state
	/// the shell cannot reason about any more.
	pub fn is_fatal(&self) -> bool {
		matches!(*self, ShellError::Pipe(_) | ShellError::Fork(_))
	}
}

pub type Result<T> = std::result::Result<T, ShellError>;
