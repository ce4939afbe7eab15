//! Errors raised while scanning or relaying RESP traffic.

use thiserror::Error;

/// Errors that can occur while inspecting or streaming RESP data.
///
/// Framing problems get their own variants. Transport failures are wrapped
/// transparently so callers can still inspect the original
/// [`std::io::ErrorKind`] (a timeout is not a reset).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A length or count prefix was not an unsigned decimal integer
    #[error("did not receive a valid int value")]
    InvalidInteger,

    /// The buffered request is not a complete multibulk command
    #[error("multibulk format is required")]
    MultibulkFormatRequired,

    /// A bulk or multibulk reply did not follow the expected framing
    #[error("bad bulk format supplied")]
    BadBulkFormat,

    /// A header or status line grew past the accepted maximum
    #[error("line longer than {max} bytes")]
    LineTooLong { max: usize },

    /// Multibulk replies nested deeper than the streamer will follow
    #[error("multibulk nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    /// Error bubbled up from the underlying reader or writer
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
