//! RESP Wire Constants
//!
//! The engine never builds a full value tree for the traffic it relays, so
//! this module only carries the bytes it has to recognise or emit verbatim.
//!
//! ## Protocol Format
//!
//! Each RESP line starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array (multibulk)
//!
//! All lines are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Bulk String: `$5\r\nhello\r\n`
//! Null Bulk String: `$-1\r\n`
//! Multibulk request: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// Status line a backend sends after a successful `AUTH` or `select`.
pub const OK_RESPONSE: &[u8] = b"+OK";

/// Status line a backend sends in answer to [`SHORT_PING_COMMAND`].
pub const PONG_RESPONSE: &[u8] = b"+PONG";

/// The null bulk reply. It is a complete message on its own.
pub const NULL_BULK_RESPONSE: &[u8] = b"$-1";

/// Health-check command, sent verbatim with its case preserved.
pub const SHORT_PING_COMMAND: &[u8] = b"PING";

/// Size of the scratch buffer used when discarding payloads.
///
/// Discards read at most this many bytes at a time, whatever the declared
/// payload length.
pub const BUFFER_SIZE: usize = 4096;

/// Longest header or status line the engine will accept from a peer.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Maximum multibulk nesting depth relayed by the streamer
pub const MAX_NESTING_DEPTH: usize = 32;

/// Database every fresh session starts on.
pub const DEFAULT_DATABASE: usize = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_constants() {
        assert_eq!(CRLF, b"\r\n");
        assert_eq!(OK_RESPONSE, b"+OK");
        assert_eq!(PONG_RESPONSE, b"+PONG");
        assert_eq!(NULL_BULK_RESPONSE, b"$-1");
        assert_eq!(SHORT_PING_COMMAND, b"PING");
    }

    #[test]
    fn test_replies_start_with_their_prefix() {
        assert_eq!(OK_RESPONSE[0], prefix::SIMPLE_STRING);
        assert_eq!(PONG_RESPONSE[0], prefix::SIMPLE_STRING);
        assert_eq!(NULL_BULK_RESPONSE[0], prefix::BULK_STRING);
    }
}
