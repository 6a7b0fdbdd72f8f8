//! Restricted shell run inside each terminal.
//!
//! A line-oriented loop that accepts a closed set of command shapes:
//!
//! - `python <script>.py [args..]` / `python3 <script>.py [args..]`
//! - `ls [args..]`
//! - `cat [args..]`
//! - `clear`
//! - `exit` / `quit`
//!
//! Lines are split on whitespace with no quoting, globbing or expansion, and
//! commands are launched from an argument vector, never through a system
//! shell. Arguments are additionally limited to a conservative character
//! set and to relative paths inside the working directory; anything else
//! rejects the whole line.
//!
//! Ctrl-C interrupts the running command or the line being typed, never the
//! shell itself.

use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process::Command as ProcessCommand;

use nix::libc::c_int;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

const RED: &str = "\x1b[91m";
const DIM: &str = "\x1b[90m";
const PURPLE: &str = "\x1b[95m";
const BOLD: &str = "\x1b[1m";
const END: &str = "\x1b[0m";

const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J\x1b[3J";

pub const DEFAULT_BANNER: &str = "AI Builder Scout — Web Terminal";
pub const PROMPT: &str = "scout ▸ ";

const INTERPRETERS: &[&str] = &["python", "python3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Reading,
    Executing,
    Terminated,
}

/// An accepted command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Python {
        interpreter: String,
        script: String,
        args: Vec<String>,
    },
    Clear,
    ListDirectory(Vec<String>),
    ShowFile(Vec<String>),
    Exit,
}

impl Command {
    /// Program and argument vector to launch, if the command needs a process.
    fn invocation(&self) -> Option<(&str, Vec<String>)> {
        match self {
            Command::Python {
                interpreter,
                script,
                args,
            } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(script.clone());
                argv.extend(args.iter().cloned());
                Some((interpreter.as_str(), argv))
            }
            Command::ListDirectory(args) => Some(("ls", args.clone())),
            Command::ShowFile(args) => Some(("cat", args.clone())),
            Command::Clear | Command::Exit => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("command not allowed: {0}")]
    UnknownCommand(String),
    #[error("argument not allowed: {0}")]
    UnsafeArgument(String),
    #[error("{0} needs a .py script as its first argument")]
    MissingScript(String),
    #[error("{0} takes no arguments")]
    UnexpectedArguments(String),
    #[error("path outside the working directory: {0}")]
    OutsideWorkdir(String),
}

/// Characters an argument may contain.
fn is_safe_argument(arg: &str) -> bool {
    !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/=:,+@%~".contains(c))
}

/// Absolute paths and `..` components would escape the working directory.
fn is_confined_path(arg: &str) -> bool {
    !arg.starts_with('/') && !arg.starts_with('~') && !arg.split('/').any(|part| part == "..")
}

/// Parse one input line. `Ok(None)` means the line was blank.
pub fn parse_line(line: &str) -> Result<Option<Command>, Rejection> {
    let mut tokens = line.split_whitespace();
    let Some(name) = tokens.next() else {
        return Ok(None);
    };
    let args: Vec<String> = tokens.map(str::to_string).collect();

    let bare = |command: Command| {
        if args.is_empty() {
            Ok(Some(command))
        } else {
            Err(Rejection::UnexpectedArguments(name.to_string()))
        }
    };

    match name {
        "exit" | "quit" => return bare(Command::Exit),
        "clear" => return bare(Command::Clear),
        "ls" | "cat" => {}
        _ if INTERPRETERS.contains(&name) => {}
        _ => return Err(Rejection::UnknownCommand(name.to_string())),
    }

    if let Some(bad) = args.iter().find(|arg| !is_safe_argument(arg)) {
        return Err(Rejection::UnsafeArgument(bad.clone()));
    }
    if let Some(outside) = args.iter().find(|arg| !is_confined_path(arg)) {
        return Err(Rejection::OutsideWorkdir(outside.clone()));
    }

    let command = match name {
        "ls" => Command::ListDirectory(args),
        "cat" => Command::ShowFile(args),
        interpreter => {
            let mut args = args.into_iter();
            let script = args
                .next()
                .filter(|script| script.ends_with(".py") && !script.starts_with('-'))
                .ok_or_else(|| Rejection::MissingScript(interpreter.to_string()))?;
            Command::Python {
                interpreter: interpreter.to_string(),
                script,
                args: args.collect(),
            }
        }
    };
    Ok(Some(command))
}

extern "C" fn on_interrupt(_: c_int) {}

/// Catch SIGINT and SIGQUIT so the terminal's Ctrl-C and Ctrl-\ only reach
/// the foreground command.
///
/// A caught signal is reset to its default in exec'd children, and a
/// blocked read returns `Interrupted` instead of being restarted.
pub fn install_interrupt_handler() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGQUIT] {
        // SAFETY: the handler is empty, so it is async-signal-safe.
        unsafe { sigaction(signal, &action) }?;
    }
    Ok(())
}

/// Error payload for a read cut short by a signal.
#[derive(Debug, thiserror::Error)]
#[error("input interrupted")]
pub struct InputInterrupted;

/// Surfaces interrupted reads to the shell instead of letting `read_line`
/// retry them.
pub struct InterruptibleInput<R> {
    inner: R,
}

impl<R> InterruptibleInput<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for InterruptibleInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::Interrupted {
                io::Error::other(InputInterrupted)
            } else {
                e
            }
        })
    }
}

fn is_input_interrupted(e: &io::Error) -> bool {
    e.get_ref()
        .is_some_and(|inner| inner.is::<InputInterrupted>())
}

/// Launches accepted commands.
pub trait CommandRunner {
    /// Run `program` to completion and return its exit code, or `None` if
    /// it was ended by a signal.
    fn run(&mut self, program: &str, args: &[String]) -> io::Result<Option<i32>>;
}

/// Runs commands as child processes sharing this terminal.
pub struct ProcessRunner {
    workdir: PathBuf,
}

impl ProcessRunner {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, program: &str, args: &[String]) -> io::Result<Option<i32>> {
        let status = ProcessCommand::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .status()?;
        Ok(status.code())
    }
}

/// What handling a line amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Blank,
    Executed(Option<i32>),
    Cleared,
    Rejected(Rejection),
    /// The command was allowed but could not be launched.
    Failed(String),
    Terminated,
}

pub struct RestrictedShell<R> {
    runner: R,
    state: ShellState,
}

impl<R: CommandRunner> RestrictedShell<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            state: ShellState::Reading,
        }
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Handle one line of input, writing any notices to `out`.
    pub fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<LineOutcome> {
        if self.state == ShellState::Terminated {
            return Ok(LineOutcome::Terminated);
        }

        let command = match parse_line(line) {
            Ok(None) => return Ok(LineOutcome::Blank),
            Ok(Some(command)) => command,
            Err(rejection) => {
                writeln!(out, "{RED}✗ {rejection}{END}")?;
                writeln!(
                    out,
                    "{DIM}  Allowed: python3 <script>.py [args], ls, cat, clear, exit{END}"
                )?;
                return Ok(LineOutcome::Rejected(rejection));
            }
        };

        match command {
            Command::Exit => {
                self.state = ShellState::Terminated;
                writeln!(out, "{DIM}Goodbye.{END}")?;
                Ok(LineOutcome::Terminated)
            }
            Command::Clear => {
                write!(out, "{CLEAR_SCREEN}")?;
                Ok(LineOutcome::Cleared)
            }
            command => {
                let Some((program, args)) = command.invocation() else {
                    return Ok(LineOutcome::Blank);
                };
                out.flush()?;
                self.state = ShellState::Executing;
                let result = self.runner.run(program, &args);
                self.state = ShellState::Reading;

                match result {
                    Ok(code) => {
                        match code {
                            Some(0) => {}
                            Some(code) => {
                                writeln!(out, "{DIM}[{program} exited with status {code}]{END}")?
                            }
                            None => writeln!(out, "\n{DIM}[{program} interrupted]{END}")?,
                        }
                        Ok(LineOutcome::Executed(code))
                    }
                    Err(e) => {
                        writeln!(out, "{RED}✗ Failed to run {program}: {e}{END}")?;
                        Ok(LineOutcome::Failed(e.to_string()))
                    }
                }
            }
        }
    }

    /// Read lines until `exit`/`quit` or end of input. An interrupted read
    /// discards the partial line and prompts again.
    pub fn run<I: BufRead, W: Write>(&mut self, mut input: I, out: &mut W) -> io::Result<()> {
        let mut line = String::new();
        while self.state != ShellState::Terminated {
            write!(out, "{PROMPT}")?;
            out.flush()?;

            line.clear();
            match input.read_line(&mut line) {
                Ok(0) => {
                    self.state = ShellState::Terminated;
                    writeln!(out)?;
                    break;
                }
                Ok(_) => {}
                Err(e) if is_input_interrupted(&e) => {
                    writeln!(out)?;
                    continue;
                }
                Err(e) => return Err(e),
            }
            self.handle_line(line.trim_end_matches(['\r', '\n']), out)?;
            out.flush()?;
        }
        Ok(())
    }
}

pub fn print_banner<W: Write>(out: &mut W, title: &str) -> io::Result<()> {
    let width = title.chars().count() + 6;
    writeln!(out, "{PURPLE}{BOLD}")?;
    writeln!(out, "  ╔{}╗", "═".repeat(width))?;
    writeln!(out, "  ║   {title}   ║")?;
    writeln!(out, "  ╚{}╝", "═".repeat(width))?;
    writeln!(out, "{END}")?;
    writeln!(
        out,
        "{DIM}  Commands: python3 <script>.py [args], ls, cat, clear, exit{END}"
    )?;
    out.flush()
}
