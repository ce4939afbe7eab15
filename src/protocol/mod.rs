//! RESP Wire Protocol Engine
//!
//! This module holds everything that touches RESP bytes on their way
//! through the proxy. Nothing here builds a value tree: requests are peeked
//! at where they sit in the client buffer, and replies are streamed from one
//! socket buffer into another.
//!
//! ## Modules
//!
//! - `types`: wire constants and type prefixes
//! - `commands`: command classification sets
//! - `scanner`: non-consuming command scanner
//! - `streamer`: bulk/multibulk reply relay
//! - `writer`: CRLF-terminated line writes
//!
//! ## Example
//!
//! ```ignore
//! use flashmux::protocol::{get_command, CommandClass, MessageStreamer};
//!
//! // Peek at the request without consuming it
//! let command = get_command(&mut client_buffer)?;
//! if command.class() == CommandClass::Unsafe {
//!     // refuse it
//! }
//!
//! // ...forward the request, then relay the reply
//! let mut streamer = MessageStreamer::new();
//! streamer.copy_server_response(&mut backend_reader, &mut client_writer).await?;
//! ```

pub mod commands;
pub mod error;
pub mod scanner;
pub mod streamer;
pub mod types;
pub mod writer;

// Re-export commonly used types for convenience
pub use commands::CommandClass;
pub use error::{ProtocolError, ProtocolResult};
pub use scanner::{get_command, parse_int, Command};
pub use streamer::{read_line, MessageStreamer};
pub use writer::{flush_line, write_line};
