//! Line-oriented command shell over the debugger engine.

mod editor;

use crate::debugger::{Debugger, Error};
use crate::ui::console::editor::create_editor;
use rustyline::error::ReadlineError;

const WELCOME_TEXT: &str = "xdb attached, the domain is paused. Type `break file.c:<line>` to get going.";
const PROMPT: &str = "(xdb) ";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Break { file: String, line: u64 },
    BreakList,
    Remove { file: String, line: u64 },
    Step,
    Continue,
    Read { name: String },
    Dereference { name: String },
    Quit,
}

fn parse_location(argument: &str) -> Result<(String, u64), String> {
    let Some((file, line)) = argument.rsplit_once(':') else {
        return Err(format!(
            "`{argument}` is not a source location (expected file.c:<line no>)"
        ));
    };
    let line = line
        .parse::<u64>()
        .map_err(|_| format!("`{line}` is not a line number"))?;
    Ok((file.to_string(), line))
}

fn parse_command(input: &str) -> Result<Command, String> {
    let mut words = input.split_whitespace();
    let command = words.next().unwrap_or_default();
    let argument = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments for {command}"));
    }

    match (command, argument) {
        ("break", None) => Ok(Command::BreakList),
        ("break", Some(location)) => {
            let (file, line) = parse_location(location)?;
            Ok(Command::Break { file, line })
        }
        ("remove", Some(location)) => {
            let (file, line) = parse_location(location)?;
            Ok(Command::Remove { file, line })
        }
        ("remove", None) => Err("remove expects a source location".to_string()),
        ("step", None) => Ok(Command::Step),
        ("continue", None) => Ok(Command::Continue),
        ("read", Some(name)) => Ok(Command::Read {
            name: name.to_string(),
        }),
        ("read", None) => Err("read expects a variable name".to_string()),
        ("der", Some(name)) => Ok(Command::Dereference {
            name: name.to_string(),
        }),
        ("der", None) => Err("der expects a variable name".to_string()),
        ("quit", None) => Ok(Command::Quit),
        (unknown, _) => Err(format!("{unknown} is not a recognised command")),
    }
}

pub struct TerminalApplication {
    debugger: Debugger,
    vcpu: u32,
}

impl TerminalApplication {
    pub fn new(debugger: Debugger, vcpu: u32) -> Self {
        Self { debugger, vcpu }
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        let mut editor = create_editor()?;
        println!("{WELCOME_TEXT}");
        loop {
            match editor.readline(PROMPT) {
                Ok(input) => {
                    let input = input.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = editor.add_history_entry(input);
                    if !self.handle(input) {
                        return Ok(());
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Executes one shell command; returns false when the session ends.
    fn handle(&mut self, input: &str) -> bool {
        let command = match parse_command(input) {
            Ok(command) => command,
            Err(message) => {
                println!("Error: {message}");
                return true;
            }
        };

        match command {
            Command::Break { file, line } => {
                match self.debugger.set_breakpoint(&file, line) {
                    Ok(()) => println!("Breakpoint set at {file}:{line}"),
                    Err(e) => print_error(&e),
                }
            }
            Command::BreakList => match self.debugger.list_breakpoints() {
                Ok(listing) if listing.is_empty() => println!("no breakpoints set"),
                Ok(listing) => print!("{listing}"),
                Err(e) => print_error(&e),
            },
            Command::Remove { file, line } => {
                match self.debugger.remove_breakpoint(&file, line) {
                    Ok(()) => println!("Removed breakpoint at {file}:{line}"),
                    Err(e) => print_error(&e),
                }
            }
            Command::Step => match self.debugger.step(self.vcpu) {
                Ok(()) => println!("{}", self.debugger.stop_location()),
                Err(e) => print_error(&e),
            },
            Command::Continue => {
                if let Err(e) = self.debugger.continue_guest(self.vcpu) {
                    print_error(&e);
                }
            }
            Command::Read { name } => match self.debugger.get_variable(self.vcpu, &name) {
                Ok(value) => println!("{value}"),
                Err(e) => print_error(&e),
            },
            Command::Dereference { name } => {
                match self.debugger.dereference(self.vcpu, &name) {
                    Ok(value) => println!("{value}"),
                    Err(e) => print_error(&e),
                }
            }
            Command::Quit => return false,
        }
        true
    }
}

fn print_error(e: &Error) {
    println!("Error: {e}");
}
