use std::path::{Path,PathBuf};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum RedirectMode { #[default] Overwrite, Append }

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Redirect {
	pub target: PathBuf,
	pub mode: RedirectMode,
}

/// One stage: `arguments[0]` names the program.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SimpleCommand {
	arguments: Vec<String>,
}

impl SimpleCommand {
	pub fn new(arguments: Vec<String>) -> Option<SimpleCommand> {
		if arguments.is_empty() {
			None
		} else {
			Some(SimpleCommand { arguments: arguments })
		}
	}

	pub fn name(&self) -> &str {
		&self.arguments[0]
	}

	pub fn arguments(&self) -> &[String] {
		&self.arguments
	}
}

#[derive(Debug, Default)]
pub struct Pipeline {
	commands: Vec<SimpleCommand>,
	input: Option<PathBuf>,
	output: Option<Redirect>,
	error: Option<Redirect>,
	is_background: bool,
}

impl Pipeline {
	pub fn new() -> Pipeline {
		Pipeline::default()
	}

	pub fn append(&mut self, command: SimpleCommand) {
		self.commands.push(command);
	}

	pub fn set_input<P: Into<PathBuf>>(&mut self, path: P) {
		self.input = Some(path.into());
	}

	pub fn set_output<P: Into<PathBuf>>(&mut self, path: P, mode: RedirectMode) {
		self.output = Some(Redirect { target: path.into(), mode: mode });
	}

	pub fn set_error<P: Into<PathBuf>>(&mut self, path: P, mode: RedirectMode) {
		self.error = Some(Redirect { target: path.into(), mode: mode });
	}

	pub fn set_background(&mut self, is_background: bool) {
		self.is_background = is_background;
	}

	pub fn commands(&self) -> &[SimpleCommand] {
		&self.commands
	}

	pub fn input(&self) -> Option<&Path> {
		self.input.as_deref()
	}

	pub fn output(&self) -> Option<&Redirect> {
		self.output.as_ref()
	}

	pub fn error(&self) -> Option<&Redirect> {
		self.error.as_ref()
	}

	pub fn is_background(&self) -> bool {
		self.is_background
	}

	pub fn is_empty(&self) -> bool {
		self.commands.is_empty()
	}

	pub fn clear(&mut self) {
		*self = Pipeline::default();
	}
}
