//! Command Frame Decoder
//!
//! Clients send every command as a RESP array of bulk strings:
//!
//! ```text
//! Frame  := "*" Digits CRLF Item{count}
//! Item   := "$" Digits CRLF Payload CRLF      ; Payload is exactly Digits bytes
//! Digits := one or more ASCII '0'-'9'
//! ```
//!
//! The decoder turns one such frame into its ordered list of tokens.
//! Position 0 is the command name, the rest are its arguments.
//!
//! ## How the Decoder Works
//!
//! [`parse_command`] reads from a buffer and returns either:
//! - `Ok(Some((tokens, consumed)))` - A complete frame, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the frame is incomplete
//! - `Err(ParseError)` - Invalid framing
//!
//! This lets a connection append network reads to a buffer, decode as many
//! frames as are complete, and keep the remainder for the next read.
//! [`decode_command`] is the one-shot form for a buffer that is expected to
//! hold exactly one frame; there an incomplete frame is an error.
//!
//! Decoding is a flat loop over the items, so a hostile item count cannot
//! grow the stack.

use crate::protocol::types::{marker, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Framing errors. A command must never be dispatched from a frame that
/// produced one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A type marker (`*` or `$`) was not where the grammar requires it
    #[error("expected {:?}, found {:?}", char::from(*expected), char::from(*found))]
    UnexpectedByte { expected: u8, found: u8 },

    /// Length or count field is empty, non-numeric or overflows
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// A length line or payload is not followed by CRLF
    #[error("missing CRLF after {0}")]
    MissingCrlf(&'static str),

    /// Declared item length is above [`MAX_BULK_SIZE`]
    #[error("item too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Declared item count is above [`MAX_ITEMS`]
    #[error("too many items: {count} (max: {max})")]
    TooManyItems { count: usize, max: usize },

    /// The buffer ended before the frame did
    #[error("truncated frame")]
    Truncated,

    /// Bytes left over after a complete frame
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Result type for decoding operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single item (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of items in one frame
pub const MAX_ITEMS: usize = 1024 * 1024;

/// Upper bound on up-front token allocation; larger frames grow as items arrive.
const PREALLOC_ITEMS: usize = 16;

/// Attempts to decode one command frame from the front of `buf`.
///
/// # Example
///
/// ```
/// use driftkv::protocol::parse_command;
///
/// let (tokens, consumed) = parse_command(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(tokens, vec!["GET", "name"]);
/// assert_eq!(consumed, 23);
/// ```
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let Some(&marker) = buf.first() else {
        return Ok(None);
    };
    expect_marker(marker::ARRAY, marker)?;

    let Some((count, mut pos)) = read_length(buf, 1, "item count")? else {
        return Ok(None);
    };
    if count > MAX_ITEMS {
        return Err(ParseError::TooManyItems {
            count,
            max: MAX_ITEMS,
        });
    }

    let mut tokens = Vec::with_capacity(count.min(PREALLOC_ITEMS));

    for _ in 0..count {
        let Some(&marker) = buf.get(pos) else {
            return Ok(None);
        };
        expect_marker(marker::BULK, marker)?;

        let Some((length, data_start)) = read_length(buf, pos + 1, "item length")? else {
            return Ok(None);
        };
        if length > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        let data_end = data_start + length;
        if buf.len() < data_end + CRLF.len() {
            return Ok(None);
        }
        if &buf[data_end..data_end + CRLF.len()] != CRLF {
            return Err(ParseError::MissingCrlf("payload"));
        }

        tokens.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        pos = data_end + CRLF.len();
    }

    Ok(Some((tokens, pos)))
}

/// Decodes a buffer that must contain exactly one complete command frame.
///
/// A frame that stops short is [`ParseError::Truncated`]; bytes after the
/// frame are [`ParseError::TrailingBytes`].
pub fn decode_command(buf: &[u8]) -> ParseResult<Vec<Bytes>> {
    match parse_command(buf)? {
        Some((tokens, consumed)) if consumed == buf.len() => Ok(tokens),
        Some((_, consumed)) => Err(ParseError::TrailingBytes(buf.len() - consumed)),
        None => Err(ParseError::Truncated),
    }
}

#[inline]
fn expect_marker(expected: u8, found: u8) -> ParseResult<()> {
    if found == expected {
        Ok(())
    } else {
        Err(ParseError::UnexpectedByte { expected, found })
    }
}

/// Reads `Digits CRLF` starting at `start`.
///
/// Returns the decoded value and the offset just past the CRLF, or `None`
/// if the buffer ends first.
fn read_length(buf: &[u8], start: usize, field: &str) -> ParseResult<Option<(usize, usize)>> {
    let mut value: usize = 0;
    let mut pos = start;

    loop {
        let Some(&byte) = buf.get(pos) else {
            return Ok(None);
        };
        match byte {
            b'0'..=b'9' => {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(usize::from(byte - b'0')))
                    .ok_or_else(|| ParseError::InvalidLength(format!("{} overflows", field)))?;
                pos += 1;
            }
            b'\r' => break,
            other => {
                return Err(ParseError::InvalidLength(format!(
                    "unexpected byte {:#04x} in {}",
                    other, field
                )))
            }
        }
    }

    if pos == start {
        return Err(ParseError::InvalidLength(format!("empty {}", field)));
    }

    match buf.get(pos + 1) {
        None => Ok(None),
        Some(b'\n') => Ok(Some((value, pos + 2))),
        Some(_) => Err(ParseError::MissingCrlf("length")),
    }
}
