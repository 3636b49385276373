//! Key-Value Storage
//!
//! [`StorageEngine`] is the one piece of state shared by every connection:
//! a map from key to [`Entry`], split over independently locked shards.
//! Every entry carries an absolute deadline. Keys stored without a TTL get
//! [`PERMANENT_HORIZON`], so "no expiry" is just a very distant deadline.
//!
//! Expiry is lazy. A lookup at or past the deadline reports the key as
//! absent and leaves the entry where it is. A successful `get` slides the
//! deadline forward by the TTL the key was stored with.
//!
//! [`ExpirySweeper`] is an optional background task that removes expired
//! entries to reclaim memory.
//!
//! ## Example
//!
//! ```
//! use driftkv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("name"), Bytes::from("Ariz"), None);
//! assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
//!
//! // Each successful read extends the key by another hour
//! engine.set(Bytes::from("session"), Bytes::from("t0k3n"), Some(Duration::from_secs(3600)));
//! assert!(engine.get(b"session").is_some());
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{Entry, StorageEngine, StorageStats, PERMANENT_HORIZON};
pub use expiry::{ExpiryConfig, ExpirySweeper};
