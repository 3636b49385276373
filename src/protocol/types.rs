//! RESP Frame Types
//!
//! Only a slice of RESP is spoken here. Requests are arrays of bulk
//! strings; replies are a simple string, an error line, or the null bulk
//! string.
//!
//! ```text
//! +PONG\r\n                        simple string
//! -ERR unknown command\r\n         error
//! $-1\r\n                          null (key absent or expired)
//! *2\r\n$3\r\nGET\r\n$1\r\nk\r\n     command: array of bulk strings
//! ```

use bytes::{BufMut, Bytes};
use std::fmt;

/// Line terminator for every RESP header and payload.
pub const CRLF: &[u8] = b"\r\n";

/// First byte of each frame kind.
pub mod marker {
    pub const SIMPLE: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A RESP frame.
///
/// Replies use `SimpleString`, `Error` and `Null`. `BulkString` and
/// `Array` only appear in request frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<bytes>\r\n`. Echoes and stored values are written back verbatim,
    /// so the payload stays raw bytes.
    SimpleString(Bytes),

    /// `-<message>\r\n`
    Error(String),

    /// `$<len>\r\n<bytes>\r\n`
    BulkString(Bytes),

    /// `$-1\r\n`, the "not found" reply.
    Null,

    /// `*<count>\r\n` followed by each element.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// # Example
    /// ```
    /// use driftkv::protocol::RespValue;
    /// assert_eq!(RespValue::simple_string("hello").serialize(), b"+hello\r\n");
    /// ```
    pub fn simple_string(s: impl Into<Bytes>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// # Example
    /// ```
    /// use driftkv::protocol::RespValue;
    /// let reply = RespValue::error("ERR syntax error");
    /// assert_eq!(reply.serialize(), b"-ERR syntax error\r\n");
    /// ```
    pub fn error(message: impl Into<String>) -> Self {
        RespValue::Error(message.into())
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString(Bytes::from_static(b"OK"))
    }

    /// `+PONG`
    pub fn pong() -> Self {
        RespValue::SimpleString(Bytes::from_static(b"PONG"))
    }

    /// Builds the frame a client sends for a command.
    ///
    /// # Example
    /// ```
    /// use driftkv::protocol::RespValue;
    /// let frame = RespValue::command(["GET", "name"]);
    /// assert_eq!(frame.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    /// ```
    pub fn command<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let items = tokens
            .into_iter()
            .map(|token| RespValue::BulkString(token.into()))
            .collect();
        RespValue::Array(items)
    }

    /// Wire encoding of this frame.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }

    /// Appends the wire encoding to any `BufMut`.
    pub fn encode<B: BufMut>(&self, out: &mut B) {
        match self {
            RespValue::SimpleString(line) => put_line(out, marker::SIMPLE, line),
            RespValue::Error(message) => put_line(out, marker::ERROR, message.as_bytes()),
            RespValue::Null => put_line(out, marker::BULK, b"-1"),
            RespValue::BulkString(data) => {
                put_line(out, marker::BULK, data.len().to_string().as_bytes());
                out.put_slice(data);
                out.put_slice(CRLF);
            }
            RespValue::Array(items) => {
                put_line(out, marker::ARRAY, items.len().to_string().as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Exact number of bytes [`encode`](Self::encode) writes.
    pub fn encoded_len(&self) -> usize {
        let digits = |n: usize| n.checked_ilog10().unwrap_or(0) as usize + 1;
        match self {
            RespValue::SimpleString(line) => 1 + line.len() + 2,
            RespValue::Error(message) => 1 + message.len() + 2,
            RespValue::Null => 5,
            RespValue::BulkString(data) => 1 + digits(data.len()) + 2 + data.len() + 2,
            RespValue::Array(items) => {
                1 + digits(items.len()) + 2 + items.iter().map(Self::encoded_len).sum::<usize>()
            }
        }
    }
}

#[inline]
fn put_line<B: BufMut>(out: &mut B, kind: u8, body: &[u8]) {
    out.put_u8(kind);
    out.put_slice(body);
    out.put_slice(CRLF);
}

/// One-line rendering for logs: `+PONG`, `-ERR ...`, `nil`, `["GET", "k"]`.
impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(line) => write!(f, "+{}", line.escape_ascii()),
            RespValue::Error(message) => write!(f, "-{}", message),
            RespValue::Null => f.write_str("nil"),
            RespValue::BulkString(data) => write!(f, "\"{}\"", data.escape_ascii()),
            RespValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_replies() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
        assert_eq!(
            RespValue::error("ERR unknown command").serialize(),
            b"-ERR unknown command\r\n"
        );
    }

    #[test]
    fn test_simple_string_keeps_raw_bytes() {
        let value = RespValue::simple_string(Bytes::from_static(b"caf\xc3\xa9 \x01"));
        assert_eq!(value.serialize(), b"+caf\xc3\xa9 \x01\r\n");
    }

    #[test]
    fn test_bulk_string_is_length_prefixed() {
        let value = RespValue::bulk_string(Bytes::from_static(b"a\r\nb"));
        assert_eq!(value.serialize(), b"$4\r\na\r\nb\r\n");
        assert_eq!(RespValue::bulk_string("").serialize(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_command_frame() {
        let value = RespValue::command(["SET", "k", "v", "PX", "100"]);
        assert_eq!(
            value.serialize(),
            b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$3\r\n100\r\n"
        );
    }

    #[test]
    fn test_encoded_len_matches_output() {
        let frames = [
            RespValue::pong(),
            RespValue::null(),
            RespValue::error("ERR syntax error"),
            RespValue::bulk_string(""),
            RespValue::bulk_string(vec![b'x'; 1234]),
            RespValue::command(["ECHO", "hello world"]),
            RespValue::command(Vec::<Bytes>::new()),
        ];
        for frame in frames {
            assert_eq!(frame.serialize().len(), frame.encoded_len(), "{}", frame);
        }
    }

    #[test]
    fn test_encode_appends() {
        let mut buf = BytesMut::from(&b"+OK\r\n"[..]);
        RespValue::pong().encode(&mut buf);
        assert_eq!(&buf[..], b"+OK\r\n+PONG\r\n");
    }

    #[test]
    fn test_display() {
        assert_eq!(RespValue::pong().to_string(), "+PONG");
        assert_eq!(RespValue::null().to_string(), "nil");
        assert_eq!(RespValue::error("ERR x").to_string(), "-ERR x");
        assert_eq!(
            RespValue::command(["GET", "a\nb"]).to_string(),
            "[\"GET\", \"a\\nb\"]"
        );
    }
}
