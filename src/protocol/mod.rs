//! RESP Protocol Implementation
//!
//! DriftKV speaks the subset of the Redis Serialization Protocol (RESP) that
//! its four commands need.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` frame enum and serialization
//! - `parser`: Decoder for incoming command frames
//!
//! ## Example
//!
//! ```
//! use driftkv::protocol::{decode_command, RespValue};
//!
//! // Decoding a command frame
//! let tokens = decode_command(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(tokens, vec!["GET", "name"]);
//!
//! // Creating responses
//! let response = RespValue::simple_string("Ariz");
//! assert_eq!(response.serialize(), b"+Ariz\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{decode_command, parse_command, ParseError, ParseResult};
pub use types::RespValue;
