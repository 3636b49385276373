//! # DriftKV
//!
//! A small in-memory key-value server that speaks a subset of RESP, so
//! `redis-cli` and most Redis client libraries can talk to it. It knows
//! four commands: `PING`, `ECHO`, `SET` (optionally with a `PX` expiry) and
//! `GET`.
//!
//! Expiry is *sliding*: each successful `GET` pushes a key's deadline out
//! by the TTL it was stored with, measured from that read. Expiry is also
//! *lazy*: an expired key reads as absent but stays in memory until it is
//! overwritten, unless the optional sweeper is running.
//!
//! ## Request path
//!
//! ```text
//! TcpListener ── accept ──> ConnectionHandler  (one Tokio task per client)
//!                              │  bytes
//!                              ▼
//!                           parse_command       (protocol)
//!                              │  tokens
//!                              ▼
//!                           CommandHandler      (commands)
//!                              │
//!                              ▼
//!                           StorageEngine       (storage, 64 RwLock shards)
//! ```
//!
//! ## Embedding
//!
//! ```ignore
//! use driftkv::{handle_connection, CommandHandler, ConnectionStats, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind(("127.0.0.1", driftkv::DEFAULT_PORT)).await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let handler = CommandHandler::new(Arc::clone(&storage));
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Replies
//!
//! - `PING` → `+PONG`
//! - `ECHO message` → `+message`
//! - `SET key value [PX milliseconds]` → `+OK`
//! - `GET key` → `+value`, or `$-1` when absent or expired
//!
//! Anything else is answered with `-ERR unknown command`. A `SET` whose
//! fourth token is not `PX`, or whose TTL is not a non-negative integer,
//! gets `-ERR syntax error`.
//!
//! ## Modules
//!
//! - [`protocol`]: RESP frames and the command frame decoder
//! - [`storage`]: the sharded store and the optional expiry sweeper
//! - [`commands`]: command selection and execution
//! - [`connection`]: per-client sessions

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use commands::{Command, CommandError, CommandHandler};
pub use connection::{handle_connection, ConnectionError, ConnectionStats};
pub use protocol::{decode_command, parse_command, ParseError, RespValue};
pub use storage::{ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port DriftKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host DriftKV binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of DriftKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
