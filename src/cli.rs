//! Interactive shell over a remote directory.
//!
//! Each line typed at the prompt is parsed into a [`Command`] and run against a
//! [`RemoteContext`] with [`execute`]:
//!
//! ```text
//! > bind greeting hello
//! > lookup greeting
//! "hello"
//! > bindings
//! greeting: text = "hello"
//! ```
//!
//! Values are written as `true`/`false`, integers, `@name` for a link or any
//! other text.
use std::io::{BufRead, Write};

use thiserror::Error;

use crate::{
    client::RemoteContext,
    directory::{Entry, Name, Object},
    error::Error,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("failed to read command: {0}")]
    Io(String),

    #[error("no command provided")]
    Empty,
}

/// A line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `.exit`
    Exit,
    Lookup(Name),
    /// Lookup without following a final link.
    Link(Name),
    Bind(Name, Object),
    Rebind(Name, Object),
    Unbind(Name),
    Rename(Name, Name),
    List(Name),
    Bindings(Name),
    CreateContext(Name),
    DestroyContext(Name),
}

const USAGE: &[(&str, &str)] = &[
    ("lookup", "lookup <name>"),
    ("link", "link <name>"),
    ("bind", "bind <name> <value>"),
    ("rebind", "rebind <name> <value>"),
    ("unbind", "unbind <name>"),
    ("rename", "rename <name> <new name>"),
    ("list", "list [name]"),
    ("bindings", "bindings [name]"),
    ("mkctx", "mkctx <name>"),
    ("rmctx", "rmctx <name>"),
];

fn invalid(command: &str) -> CommandError {
    let usage = USAGE
        .iter()
        .find(|(name, _)| *name == command)
        .map_or("", |(_, usage)| usage);
    CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: format!("usage: {usage}"),
    }
}

/// Parses a value typed at the prompt.
pub fn parse_object(value: &str) -> Object {
    match value {
        "true" => Object::Bool(true),
        "false" => Object::Bool(false),
        "null" => Object::Null,
        v => match (v.parse::<i64>(), v.strip_prefix('@')) {
            (Ok(i), _) => Object::Integer(i),
            (_, Some(target)) if !target.is_empty() => Object::Link(Name::from(target)),
            _ => Object::Text(v.to_string()),
        },
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(word, rest)| (word, rest.trim()));
        let args: Vec<&str> = rest.split_whitespace().collect();

        let name = |command: &str| match args.as_slice() {
            [name] => Ok(Name::from(*name)),
            _ => Err(invalid(command)),
        };
        let optional_name = || match args.as_slice() {
            [] => Ok(Name::root()),
            [name] => Ok(Name::from(*name)),
            _ => Err(invalid(word)),
        };
        // the value is the rest of the line so text may contain spaces
        let binding = |command: &str| match rest.split_once(char::is_whitespace) {
            Some((name, value)) if !value.trim().is_empty() => {
                Ok((Name::from(name), parse_object(value.trim())))
            }
            _ => Err(invalid(command)),
        };

        match word {
            "" => Err(CommandError::Empty),
            ".exit" => Ok(Command::Exit),
            "lookup" => name(word).map(Command::Lookup),
            "link" => name(word).map(Command::Link),
            "bind" => binding(word).map(|(n, o)| Command::Bind(n, o)),
            "rebind" => binding(word).map(|(n, o)| Command::Rebind(n, o)),
            "unbind" => name(word).map(Command::Unbind),
            "rename" => match args.as_slice() {
                [from, to] => Ok(Command::Rename(Name::from(*from), Name::from(*to))),
                _ => Err(invalid(word)),
            },
            "list" => optional_name().map(Command::List),
            "bindings" => optional_name().map(Command::Bindings),
            "mkctx" => name(word).map(Command::CreateContext),
            "rmctx" => name(word).map(Command::DestroyContext),
            other => Err(CommandError::UnrecognizedCommand(other.to_string())),
        }
    }
}

/// Prompts for and parses one command. End of input reads as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut line = String::default();
    write!(&mut writer, "> ").map_err(|e| CommandError::Io(e.to_string()))?;
    writer.flush().map_err(|e| CommandError::Io(e.to_string()))?;

    let read = reader
        .read_line(&mut line)
        .map_err(|e| CommandError::Io(e.to_string()))?;
    if read == 0 {
        return Ok(Command::Exit);
    }
    Command::try_from(line.as_str())
}

fn describe(entry: &Entry<RemoteContext>) -> String {
    match entry {
        Entry::Object(object) => object.to_string(),
        Entry::Context(context) => context.to_string(),
    }
}

/// Runs `command` against `context`, returning what to print, if anything.
pub fn execute(context: &RemoteContext, command: Command) -> Result<Option<String>, Error> {
    let output = match command {
        Command::Exit => None,
        Command::Lookup(name) => Some(describe(&context.lookup(name)?)),
        Command::Link(name) => Some(describe(&context.lookup_link(name)?)),
        Command::Bind(name, object) => {
            context.bind(name, object)?;
            None
        }
        Command::Rebind(name, object) => {
            context.rebind(name, object)?;
            None
        }
        Command::Unbind(name) => {
            context.unbind(name)?;
            None
        }
        Command::Rename(name, new_name) => {
            context.rename(name, new_name)?;
            None
        }
        Command::List(name) => Some(
            context
                .list(name)?
                .iter()
                .map(|pair| format!("{}: {}", pair.name, pair.class_name))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Command::Bindings(name) => Some(
            context
                .list_bindings(name)?
                .iter()
                .map(|b| format!("{}: {} = {}", b.name, b.class_name, describe(&b.value)))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Command::CreateContext(name) => {
            context.create_subcontext(name)?;
            None
        }
        Command::DestroyContext(name) => {
            context.destroy_subcontext(name)?;
            None
        }
    };
    Ok(output.filter(|s| !s.is_empty()))
}
