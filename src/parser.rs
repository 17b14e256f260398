//! Splits a line into stages and redirections and feeds them to the session's
//! pipeline. Deliberately small: words, quotes, `${NAME}` references, `|`,
//! `&`, redirections and `<(...)`.

use std::{env,process};
use std::ffi::OsStr;
use std::os::unix::ffi::{OsStrExt,OsStringExt};

use crate::error::{Result,ShellError};
use crate::eval;
use crate::global::Session;
use crate::types::{RedirectMode,SimpleCommand};

type ParseResult<T> = Result<T>;

fn syntax<T>(msg: String) -> ParseResult<T> {
	Err(ShellError::Syntax(msg))
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RedirectType { Input, Output, Error, Both }

struct Parser<'a, 's> {
	line: &'a [u8],
	i: usize,
	session: &'s mut Session,
	in_substitution: bool,
	output_stage: Option<usize>,
}

impl<'a, 's> Parser<'a, 's> {
	fn peek(&self) -> Option<u8> {
		self.line.get(self.i).cloned()
	}

	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.line.get(self.i) {
			if !f(*c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		match c {
			b' ' | b'\t' | b'\n' | b'\r' => true,
			_ => false,
		}
	}

	fn is_digit(c: u8) -> bool {
		b'0' <= c && c <= b'9'
	}

	fn ends_word(&self, c: u8) -> bool {
		match c {
			b'>' | b'<' | b'&' | b'|' => true,
			b')' => self.in_substitution,
			_ => Parser::is_whitespace(c),
		}
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Parser::is_whitespace);
	}

	fn expand(&mut self, word: &mut Vec<u8>) -> ParseResult<()> {
		let start = self.i + 2;
		let end = match self.line[start ..].iter().position(|&c| c == b'}') {
			Some(n) => start + n,
			None => return syntax("unterminated ${".to_string()),
		};
		let name = &self.line[start .. end];
		self.i = end + 1;
		match name {
			b"?" => word.extend(self.session.last_status.to_string().into_bytes()),
			b"!" => if let Some(pid) = self.session.last_background_pid {
				word.extend(pid.to_string().into_bytes());
			},
			b"$" => word.extend(process::id().to_string().into_bytes()),
			b"_" => word.extend(self.session.last_arg.as_bytes()),
			b"" => return syntax("empty ${}".to_string()),
			_ => if let Some(value) = env::var_os(OsStr::from_bytes(name)) {
				word.extend(value.into_vec());
			},
		}
		Ok(())
	}

	fn read_quoted(&mut self, quote: u8, word: &mut Vec<u8>) -> ParseResult<()> {
		self.i += 1;
		loop {
			match self.peek() {
				None => return syntax(format!("unterminated {}", quote as char)),
				Some(c) if c == quote => {
					self.i += 1;
					return Ok(());
				},
				Some(b'\\') if quote == b'"' => {
					self.i += 1;
					match self.peek() {
						Some(c @ b'"') | Some(c @ b'\\') | Some(c @ b'$') => {
							word.push(c);
							self.i += 1;
						},
						_ => word.push(b'\\'),
					}
				},
				Some(b'$') if quote == b'"' && self.line.get(self.i + 1) == Some(&b'{') => self.expand(word)?,
				Some(c) => {
					word.push(c);
					self.i += 1;
				},
			}
		}
	}

	fn read_word(&mut self) -> ParseResult<Option<String>> {
		let mut word: Vec<u8> = vec![];
		let mut seen = false;
		while let Some(c) = self.peek() {
			if self.ends_word(c) {
				break;
			}
			seen = true;
			match c {
				b'\'' | b'"' => self.read_quoted(c, &mut word)?,
				b'\\' => {
					self.i += 1;
					if let Some(escaped) = self.peek() {
						word.push(escaped);
						self.i += 1;
					}
				},
				b'$' if self.line.get(self.i + 1) == Some(&b'{') => self.expand(&mut word)?,
				_ => {
					word.push(c);
					self.i += 1;
				},
			}
		}
		if seen {
			Ok(Some(String::from_utf8_lossy(&word).into_owned()))
		} else {
			Ok(None)
		}
	}

	fn read_number(&mut self) -> Option<u32> {
		let orig = self.i;
		self.proceed_while(Parser::is_digit);
		if orig == self.i {
			None
		} else {
			// at most a few ASCII digits; overflow turns into an unsupported fd
			Some(std::str::from_utf8(&self.line[orig .. self.i]).ok()
				.and_then(|s| s.parse().ok())
				.unwrap_or(u32::MAX))
		}
	}

	fn parse_redirect(&mut self) -> ParseResult<Option<(RedirectType, RedirectMode)>> {
		let orig = self.i;
		let num = self.read_number();

		let (typ, mode) = match self.peek() {
			Some(b'<') if self.line.get(self.i + 1) != Some(&b'(') => {
				self.i += 1;
				(RedirectType::Input, RedirectMode::Overwrite)
			},
			Some(b'>') => {
				let mode = if self.line.get(self.i + 1) == Some(&b'>') {
					self.i += 2;
					RedirectMode::Append
				} else {
					self.i += 1;
					RedirectMode::Overwrite
				};
				if num.is_none() && self.peek() == Some(b'&') {
					self.i += 1;
					(RedirectType::Both, mode)
				} else {
					(RedirectType::Output, mode)
				}
			},
			_ => {
				self.i = orig;
				return Ok(None);
			},
		};

		let typ = match (typ, num) {
			(t, None) => t,
			(RedirectType::Input, Some(0)) => RedirectType::Input,
			(RedirectType::Output, Some(1)) => RedirectType::Output,
			(RedirectType::Output, Some(2)) => RedirectType::Error,
			(_, Some(n)) => return syntax(format!("unsupported descriptor {}", n)),
		};
		Ok(Some((typ, mode)))
	}

	fn apply_redirect(&mut self, stage: usize, typ: RedirectType, mode: RedirectMode) -> ParseResult<()> {
		self.skip_whitespaces();
		let target = match self.read_word()? {
			Some(t) if !t.is_empty() => t,
			_ => return syntax("empty redirect".to_string()),
		};
		let pipeline = &mut self.session.pipeline;
		match typ {
			RedirectType::Input => {
				if stage != 0 {
					return syntax("only the first command may read from a file".to_string());
				}
				if pipeline.input().is_some() {
					return syntax("ambiguous input redirect".to_string());
				}
				pipeline.set_input(target);
			},
			RedirectType::Output | RedirectType::Both => {
				if pipeline.output().is_some() {
					return syntax("ambiguous output redirect".to_string());
				}
				self.output_stage = Some(stage);
				if typ == RedirectType::Both {
					pipeline.set_error(target.clone(), mode);
				}
				pipeline.set_output(target, mode);
			},
			RedirectType::Error => pipeline.set_error(target, mode),
		}
		Ok(())
	}

	fn parse_substitution(&mut self) -> ParseResult<String> {
		if self.in_substitution {
			return syntax("nested process substitution".to_string());
		}
		self.i += 2;
		self.in_substitution = true;
		let mut argv: Vec<String> = vec![];
		loop {
			self.skip_whitespaces();
			match self.peek() {
				Some(b')') => {
					self.i += 1;
					break;
				},
				None => return syntax("unterminated <(".to_string()),
				Some(c) => match self.read_word()? {
					Some(word) => argv.push(word),
					None => return syntax(format!("unexpected '{}' in <(...)", c as char)),
				},
			}
		}
		self.in_substitution = false;
		let fifo = eval::substitute(self.session, argv)?;
		Ok(fifo.to_string_lossy().into_owned())
	}

	fn parse_command(&mut self, stage: usize) -> ParseResult<SimpleCommand> {
		let mut arguments: Vec<String> = vec![];
		loop {
			self.skip_whitespaces();
			if let Some((typ, mode)) = self.parse_redirect()? {
				self.apply_redirect(stage, typ, mode)?;
				continue;
			}
			if self.peek() == Some(b'<') && self.line.get(self.i + 1) == Some(&b'(') {
				let fifo = self.parse_substitution()?;
				arguments.push(fifo);
				continue;
			}
			match self.read_word()? {
				Some(word) => arguments.push(word),
				None => break,
			}
		}
		match SimpleCommand::new(arguments) {
			Some(command) => Ok(command),
			None => syntax("empty command".to_string()),
		}
	}

	fn parse_pipeline(&mut self) -> ParseResult<()> {
		self.skip_whitespaces();
		if self.peek().is_none() {
			return Ok(());
		}
		let mut stage = 0;
		loop {
			let command = self.parse_command(stage)?;
			self.session.pipeline.append(command);
			match self.peek() {
				Some(b'|') => {
					self.i += 1;
					stage += 1;
				},
				Some(b'&') => {
					self.i += 1;
					self.session.pipeline.set_background(true);
					self.skip_whitespaces();
					if let Some(c) = self.peek() {
						return syntax(format!("character after '&': '{}'", c as char));
					}
					break;
				},
				Some(c) => return syntax(format!("unknown command separator: '{}'", c as char)),
				None => break,
			}
		}
		match self.output_stage {
			Some(s) if s != stage => syntax("only the last command may write to a file".to_string()),
			_ => Ok(()),
		}
	}
}

/// Builds the session's pipeline from `line`. On error the pipeline may be
/// partly built; the caller discards it.
pub fn parse(session: &mut Session, line: &str) -> ParseResult<()> {
	let mut parser = Parser {
		line: line.as_bytes(),
		i: 0,
		session: session,
		in_substitution: false,
		output_stage: None,
	};
	parser.parse_pipeline()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;
	use nix::unistd::Pid;
	use serial_test::serial;
	use std::path::Path;

	fn parsed(line: &str) -> Session {
		let mut s = Session::new(Config::default());
		parse(&mut s, line).unwrap();
		s
	}

	fn stages(s: &Session) -> Vec<Vec<String>> {
		s.pipeline.commands().iter().map(|c| c.arguments().to_vec()).collect()
	}

	fn fails(line: &str) {
		let mut s = Session::new(Config::default());
		match parse(&mut s, line) {
			Err(ShellError::Syntax(_)) => {},
			other => panic!("{:?} parsed as {:?}", line, other),
		}
	}

	#[test]
	fn blank_line_builds_nothing() {
		assert!(parsed("   \t").pipeline.is_empty());
		assert!(parsed("").pipeline.is_empty());
	}

	#[test]
	fn pipeline_with_redirects() {
		let s = parsed("cat < in.txt | grep -v x | wc -l >> out.txt 2> err.txt &");
		assert_eq!(stages(&s), vec![
			vec!["cat".to_string()],
			vec!["grep".to_string(), "-v".to_string(), "x".to_string()],
			vec!["wc".to_string(), "-l".to_string()],
		]);
		assert_eq!(s.pipeline.input(), Some(Path::new("in.txt")));
		let out = s.pipeline.output().unwrap();
		assert_eq!(out.target, Path::new("out.txt"));
		assert_eq!(out.mode, RedirectMode::Append);
		assert_eq!(s.pipeline.error().unwrap().mode, RedirectMode::Overwrite);
		assert!(s.pipeline.is_background());
	}

	#[test]
	fn output_and_error_together() {
		let s = parsed("make >& log");
		assert_eq!(s.pipeline.output().unwrap().target, Path::new("log"));
		assert_eq!(s.pipeline.error().unwrap().target, Path::new("log"));
		let s = parsed("make >>& log");
		assert_eq!(s.pipeline.error().unwrap().mode, RedirectMode::Append);
	}

	#[test]
	fn quotes_and_escapes() {
		let s = parsed(r#"echo "a b" 'c  d' e\ f "q\"x""#);
		assert_eq!(stages(&s)[0], vec!["echo", "a b", "c  d", "e f", "q\"x"]);
		let s = parsed("echo '' x");
		assert_eq!(stages(&s)[0], vec!["echo", "", "x"]);
	}

	#[test]
	fn digits_are_ordinary_words_unless_redirecting() {
		let s = parsed("echo 2 10");
		assert_eq!(stages(&s)[0], vec!["echo", "2", "10"]);
		assert!(s.pipeline.error().is_none());
	}

	#[test]
	#[serial]
	fn variable_references_expand() {
		env::set_var("MYSHELL_PARSE_V", "val");
		let mut s = Session::new(Config::default());
		s.last_status = 3;
		s.last_arg = "prev".to_string();
		s.last_background_pid = Some(Pid::from_raw(4242));
		parse(&mut s, "echo ${MYSHELL_PARSE_V} x${?}y ${!} ${_} \"${MYSHELL_PARSE_V} q\" '${?}' ${MYSHELL_PARSE_UNSET}").unwrap();
		env::remove_var("MYSHELL_PARSE_V");
		assert_eq!(stages(&s)[0], vec!["echo", "val", "x3y", "4242", "prev", "val q", "${?}", ""]);
	}

	#[test]
	fn malformed_lines() {
		fails("| wc");
		fails("ls |");
		fails("ls | | wc");
		fails("ls >");
		fails("ls & wc");
		fails("echo 'open");
		fails("echo ${HOME");
		fails("cat < a < b");
		fails("ls | wc < in");
		fails("ls > out | wc");
		fails("ls 3> x");
	}

	#[test]
	#[serial]
	fn process_substitution_registers_its_paths() {
		let mut s = Session::new(Config::default());
		parse(&mut s, "diff <(echo a) <(echo b)").unwrap();
		let args = stages(&s)[0].clone();
		assert_eq!(args.len(), 3);
		assert!(Path::new(&args[1]).exists());
		assert_eq!(s.cleanup.len(), 4);
		assert_eq!(s.producers.len(), 2);
		s.abandon();
		assert!(!Path::new(&args[1]).exists());
		assert!(!Path::new(&args[2]).exists());
		assert!(s.producers.is_empty());
	}
}
