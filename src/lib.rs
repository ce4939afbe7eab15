//! # FlashMux - RESP Wire Engine for a Multiplexing Proxy
//!
//! FlashMux is the part of a Redis-compatible multiplexing proxy that touches
//! bytes on the wire. Clients talk to the proxy, the proxy talks to a pool of
//! backend servers, and FlashMux sits in between: it peeks at requests to
//! decide where they may go, relays replies without decoding them, and keeps
//! the backend sessions alive.
//!
//! ## Features
//!
//! - **Zero-decode relay**: Replies are streamed straight from the backend
//!   socket buffer into the client buffer
//! - **Command classification**: Unsafe, single-backend and pub/sub commands
//!   are recognized from the raw request
//! - **Backend sessions**: TCP or unix sockets, `AUTH`, `select`, and
//!   passive and active liveness checks
//! - **Async I/O**: Built on Tokio, with a deadline on every read and write
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashMux                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────────────────┐  │
//! │  │   Client    │───>│  Protocol   │───>│     BackendConnection       │  │
//! │  │   buffer    │    │  Scanner    │    │  (Disconnected..Ready)      │  │
//! │  └─────────────┘    └─────────────┘    └──────────────┬──────────────┘  │
//! │         ▲                                             │                 │
//! │         │                                             ▼                 │
//! │  ┌──────┴──────┐                        ┌─────────────────────────────┐ │
//! │  │   Message   │<───────────────────────│  BufReader<Deadline<...>>   │ │
//! │  │  Streamer   │     reply bytes        │     (backend socket)        │ │
//! │  └─────────────┘                        └─────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashmux::connection::{BackendConfig, BackendConnection, ConnectionError};
//! use flashmux::protocol::{get_command, CommandClass, MessageStreamer};
//! use tokio::io::AsyncWriteExt;
//!
//! let mut backend = BackendConnection::new(BackendConfig::tcp("127.0.0.1:6379"));
//! backend.reconnect_if_necessary().await?;
//!
//! let command = get_command(&mut request)?;
//! if command.class() != CommandClass::Unsafe {
//!     let session = backend.session_mut().ok_or(ConnectionError::NotConnected)?;
//!     session.writer.write_all(&request).await?;
//!     session.writer.flush().await?;
//!     MessageStreamer::new()
//!         .copy_server_response(&mut session.reader, &mut client_writer)
//!         .await?;
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Command scanner, reply streamer and line writer
//! - [`connection`]: Backend sessions, deadlines and connection statistics
//!
//! ## Design Highlights
//!
//! ### No Value Tree
//!
//! Replies are never parsed into values. Only the header line of each bulk
//! or multibulk element is read; payloads are copied or discarded in
//! bounded chunks, so memory use does not grow with reply size.
//!
//! ### Explicit Lifecycle
//!
//! A backend connection is always in exactly one of four states, and its
//! socket exists only in the states that need it. Any I/O failure collapses
//! it back to disconnected.

pub mod connection;
pub mod protocol;

// Re-export commonly used types for convenience
pub use connection::{BackendConfig, BackendConnection, BackendStats, ConnectionError, ConnectionState};
pub use protocol::{get_command, CommandClass, MessageStreamer, ProtocolError};

/// The default port backends listen on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default backend host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of FlashMux
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
