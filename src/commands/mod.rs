//! Commands
//!
//! Turns a decoded token list into a reply. [`Command::from_tokens`] picks
//! the command from its name and token count, and [`CommandHandler`] runs
//! it against the shared [`StorageEngine`](crate::storage::StorageEngine).
//!
//! | Tokens                     | Reply                            |
//! |----------------------------|----------------------------------|
//! | `PING`                     | `+PONG`                          |
//! | `ECHO message`             | `+message`                       |
//! | `SET key value`            | `+OK`                            |
//! | `SET key value PX millis`  | `+OK`                            |
//! | `GET key`                  | `+value`, or `$-1` if absent     |
//! | anything else              | `-ERR unknown command`           |
//!
//! A five-token `SET` with an option other than `PX`, or a `PX` value that
//! is not a non-negative integer, gets `-ERR syntax error` instead.
//! Command names and the `PX` option are matched case-insensitively.

pub mod command;
pub mod handler;

pub use command::{Command, CommandError};
pub use handler::CommandHandler;
