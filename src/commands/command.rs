//! Typed view of a decoded token sequence.
//!
//! A command is selected by its token count together with its name, matched
//! ASCII case-insensitively:
//!
//! | tokens | name   | shape                                | command          |
//! |--------|--------|--------------------------------------|------------------|
//! | 1      | `PING` |                                      | `Ping`           |
//! | 2      | `ECHO` |                                      | `Echo`           |
//! | 3      | `SET`  |                                      | `Set`, no TTL    |
//! | 5      | `SET`  | `PX <non-negative integer millis>`   | `Set` with TTL   |
//! | 2      | `GET`  |                                      | `Get`            |
//!
//! A five-token `SET` whose option is not `PX`, or whose TTL is not a
//! non-negative integer, is a syntax error. Every other shape is an unknown
//! command.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Why a token sequence did not map to a command.
///
/// The `Display` text is the error line sent to the client.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command")]
    Unknown,

    #[error("ERR syntax error")]
    Syntax,
}

/// A recognized client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(Bytes),
    Set {
        key: Bytes,
        value: Bytes,
        /// `None` when no `PX` option was given
        ttl: Option<Duration>,
    },
    Get(Bytes),
}

impl Command {
    /// Maps a decoded token sequence to a command.
    ///
    /// # Example
    ///
    /// ```
    /// use driftkv::commands::{Command, CommandError};
    /// use bytes::Bytes;
    /// use std::time::Duration;
    ///
    /// let tokens: Vec<Bytes> = ["set", "k", "v", "px", "250"].map(Bytes::from).to_vec();
    /// assert_eq!(
    ///     Command::from_tokens(&tokens),
    ///     Ok(Command::Set {
    ///         key: Bytes::from("k"),
    ///         value: Bytes::from("v"),
    ///         ttl: Some(Duration::from_millis(250)),
    ///     })
    /// );
    ///
    /// let tokens: Vec<Bytes> = ["FOO"].map(Bytes::from).to_vec();
    /// assert_eq!(Command::from_tokens(&tokens), Err(CommandError::Unknown));
    /// ```
    pub fn from_tokens(tokens: &[Bytes]) -> Result<Self, CommandError> {
        let Some(name) = tokens.first() else {
            return Err(CommandError::Unknown);
        };
        let name = name.to_ascii_uppercase();

        match (name.as_slice(), tokens) {
            (b"PING", [_]) => Ok(Command::Ping),
            (b"ECHO", [_, message]) => Ok(Command::Echo(message.clone())),
            (b"SET", [_, key, value]) => Ok(Command::Set {
                key: key.clone(),
                value: value.clone(),
                ttl: None,
            }),
            (b"SET", [_, key, value, option, millis]) => {
                if !option.eq_ignore_ascii_case(b"PX") {
                    return Err(CommandError::Syntax);
                }
                let millis = parse_millis(millis).ok_or(CommandError::Syntax)?;
                Ok(Command::Set {
                    key: key.clone(),
                    value: value.clone(),
                    ttl: Some(Duration::from_millis(millis)),
                })
            }
            (b"GET", [_, key]) => Ok(Command::Get(key.clone())),
            _ => Err(CommandError::Unknown),
        }
    }

    /// Upper-case command name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Echo(_) => "ECHO",
            Command::Set { .. } => "SET",
            Command::Get(_) => "GET",
        }
    }
}

/// Parses ASCII digits only: no sign, no whitespace.
fn parse_millis(raw: &[u8]) -> Option<u64> {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(raw).ok()?.parse().ok()
}
