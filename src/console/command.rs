//! Console command parsing.

use crate::error::{Error, Result};

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Isolate(String),
    ShowAll,
    Kill(String),
    Quit,
    /// Blank input.
    Empty,
}

impl Command {
    /// Parse one line of input.
    ///
    /// The first token is matched case-insensitively; tokens are split on
    /// any whitespace. Extra arguments are ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::Usage`] when `isolate` or `kill` lacks a replica name
    /// - [`Error::UnknownCommand`] for anything else unrecognized
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let Some(head) = tokens.next() else {
            return Ok(Self::Empty);
        };
        let head = head.to_lowercase();
        let arg = tokens.next().map(str::to_string);

        match head.as_str() {
            "help" => Ok(Self::Help),
            "list" => Ok(Self::List),
            "isolate" => arg
                .map(Self::Isolate)
                .ok_or(Error::Usage("isolate <replica-name>")),
            "showall" => Ok(Self::ShowAll),
            "kill" => arg
                .map(Self::Kill)
                .ok_or(Error::Usage("kill <replica-name>")),
            "quit" | "exit" => Ok(Self::Quit),
            _ => Err(Error::UnknownCommand(head)),
        }
    }
}
