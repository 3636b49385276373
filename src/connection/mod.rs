//! Client Sessions
//!
//! One [`ConnectionHandler`] runs per accepted client, on its own Tokio
//! task. It owns the client's read buffer, decodes as many complete frames
//! as have arrived, answers each in order and goes back to reading.
//! Sessions share nothing but the storage engine behind their
//! [`CommandHandler`](crate::commands::CommandHandler) and the
//! [`ConnectionStats`] counters.
//!
//! ```ignore
//! let storage = Arc::new(StorageEngine::new());
//! let stats = Arc::new(ConnectionStats::new());
//!
//! loop {
//!     let (stream, addr) = listener.accept().await?;
//!     let handler = CommandHandler::new(Arc::clone(&storage));
//!     tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//! }
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionSnapshot, ConnectionStats,
};
