//! Command Handler
//!
//! Takes a decoded token sequence, maps it to a [`Command`] and executes it
//! against the storage engine, producing exactly one reply frame.
//!
//! ## Replies
//!
//! | outcome                     | reply                   |
//! |-----------------------------|-------------------------|
//! | `PING`                      | `+PONG`                 |
//! | `ECHO msg`                  | `+msg`                  |
//! | `SET ...`                   | `+OK`                   |
//! | `GET` hit                   | `+value`                |
//! | `GET` miss or expired       | `$-1`                   |
//! | unrecognized shape          | `-ERR unknown command`  |
//! | bad `SET ... PX` option     | `-ERR syntax error`     |

use crate::commands::command::Command;
use crate::protocol::RespValue;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Executes commands against a shared storage engine.
///
/// Cloning is cheap; each connection gets its own clone.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Returns the storage engine this handler writes to.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Executes a decoded command and returns the reply.
    ///
    /// Never fails: an unrecognized or malformed command becomes an error
    /// reply and the connection carries on.
    pub fn execute(&self, tokens: &[Bytes]) -> RespValue {
        match Command::from_tokens(tokens) {
            Ok(command) => {
                trace!(command = command.name(), "Dispatching command");
                self.dispatch(command)
            }
            Err(e) => {
                let name = tokens
                    .first()
                    .map(|t| String::from_utf8_lossy(t))
                    .unwrap_or_default();
                debug!(
                    name = %name,
                    args = tokens.len().saturating_sub(1),
                    error = %e,
                    "Rejected command"
                );
                RespValue::error(e.to_string())
            }
        }
    }

    /// Runs a parsed command.
    pub fn dispatch(&self, command: Command) -> RespValue {
        match command {
            Command::Ping => self.cmd_ping(),
            Command::Echo(message) => self.cmd_echo(message),
            Command::Set { key, value, ttl } => self.cmd_set(key, value, ttl),
            Command::Get(key) => self.cmd_get(&key),
        }
    }

    /// PING
    fn cmd_ping(&self) -> RespValue {
        RespValue::pong()
    }

    /// ECHO message
    fn cmd_echo(&self, message: Bytes) -> RespValue {
        RespValue::simple_string(message)
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> RespValue {
        self.storage.set(key, value, ttl);
        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&self, key: &[u8]) -> RespValue {
        match self.storage.get(key) {
            Some(value) => RespValue::simple_string(value),
            None => RespValue::null(),
        }
    }
}
