//! Non-Consuming Command Scanner
//!
//! Before a client request is routed, the proxy needs its command name (and
//! for some commands the first argument) without taking the request out of
//! the client's buffer: the bytes still have to be forwarded verbatim to a
//! backend afterwards.
//!
//! ## Contract
//!
//! [`get_command`] only sees a `&mut [u8]` view over bytes that have already
//! been received. It has no reader to pull from, so it can never trigger
//! another network read. If the view does not hold a complete multibulk
//! header plus a complete command element, the scan fails with
//! [`ProtocolError::MultibulkFormatRequired`] rather than waiting.
//!
//! ```text
//! *2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n
//! └─┬─┘ └─┬─┘ └┬┘    └─┬─┘ └┬┘
//! count  len  name    len  first argument
//! ```
//!
//! The command name is lowercased in place, so the forwarded request carries
//! the canonical spelling. Nothing is touched unless the whole scan succeeds.

use crate::protocol::commands::CommandClass;
use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::types::{prefix, CRLF};
use std::ops::Range;
use tracing::{debug, trace};

/// A command peeked out of a buffered client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    /// The lowercased command name
    pub name: &'a [u8],
    /// The first argument, if the request has one and it is fully buffered
    pub first_argument: Option<&'a [u8]>,
}

impl Command<'_> {
    /// Looks the command up in the routing sets.
    pub fn class(&self) -> CommandClass {
        CommandClass::of(self.name)
    }
}

/// Parses an unsigned decimal integer.
///
/// Only the digits `0` to `9` are accepted: no sign, no whitespace, no hex.
/// An empty slice parses as `0`; callers that need to detect a missing value
/// must check for emptiness themselves.
pub fn parse_int(bytes: &[u8]) -> ProtocolResult<usize> {
    bytes.iter().try_fold(0usize, |value, &byte| {
        // Bytes below '0' wrap around past 9 as well.
        let digit = byte.wrapping_sub(b'0');
        if digit > 9 {
            debug!(byte, "parse_int: invalid int character");
            return Err(ProtocolError::InvalidInteger);
        }
        value
            .checked_mul(10)
            .and_then(|v| v.checked_add(usize::from(digit)))
            .ok_or(ProtocolError::InvalidInteger)
    })
}

/// Inspects a buffered request and returns its command and first argument.
///
/// `contents` must start at the beginning of a multibulk request. The
/// command name is lowercased in place on success.
///
/// # Errors
///
/// - [`ProtocolError::MultibulkFormatRequired`] if the request is not in
///   multibulk form, or is not completely buffered up to the end of the
///   element being read
/// - [`ProtocolError::InvalidInteger`] if a count or length prefix is not a
///   decimal integer
pub fn get_command(contents: &mut [u8]) -> ProtocolResult<Command<'_>> {
    let (count, cursor) = read_prefixed_len(contents, 0, prefix::ARRAY)?;
    if count == 0 {
        debug!("get_command: multibulk request without a command");
        return Err(ProtocolError::MultibulkFormatRequired);
    }

    let name = read_bulk(contents, cursor)?;
    trace!(len = name.len(), "get_command: peeked at command");

    let next = name.end + CRLF.len();
    // Only the command is present, or what follows belongs to the next
    // pipelined request.
    let first_argument = if next == contents.len() || count == 1 {
        None
    } else {
        let argument = read_bulk(contents, next)?;
        trace!(len = argument.len(), "get_command: peeked at argument");
        Some(argument)
    };

    contents[name.clone()].make_ascii_lowercase();

    let contents: &[u8] = contents;
    Ok(Command {
        name: &contents[name],
        first_argument: first_argument.map(|range| &contents[range]),
    })
}

/// Reads a `<sigil><decimal>\r\n` line starting at `start`.
///
/// Returns the decoded value and the offset just past the CRLF.
fn read_prefixed_len(contents: &[u8], start: usize, sigil: u8) -> ProtocolResult<(usize, usize)> {
    let line = contents.get(start..).unwrap_or_default();
    let end = match find_crlf(line) {
        Some(end) => end,
        None => {
            debug!(start, "get_command: no newline found");
            return Err(ProtocolError::MultibulkFormatRequired);
        }
    };

    if end == 0 || line[0] != sigil {
        debug!(start, expected = %char::from(sigil), "get_command: wrong type prefix");
        return Err(ProtocolError::MultibulkFormatRequired);
    }

    let value = parse_int(&line[1..end])?;
    Ok((value, start + end + CRLF.len()))
}

/// Locates the payload of the bulk element starting at `start`.
fn read_bulk(contents: &[u8], start: usize) -> ProtocolResult<Range<usize>> {
    let (len, body) = read_prefixed_len(contents, start, prefix::BULK_STRING)?;

    let end = body
        .checked_add(len)
        .ok_or(ProtocolError::MultibulkFormatRequired)?;
    if end + CRLF.len() > contents.len() {
        debug!(
            declared = len,
            buffered = contents.len() - body,
            "get_command: element is not as long as its header suggests"
        );
        return Err(ProtocolError::MultibulkFormatRequired);
    }
    if &contents[end..end + CRLF.len()] != CRLF {
        debug!("get_command: element missing trailing CRLF");
        return Err(ProtocolError::MultibulkFormatRequired);
    }

    Ok(body..end)
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == CRLF)
}
