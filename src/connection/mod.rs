//! Backend Connection Module
//!
//! This module manages the proxy's outbound sessions to backend servers.
//! Each [`BackendConnection`] owns one socket, wrapped in per-operation
//! deadlines and split into a buffered reader and writer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Connection pool (caller)                  │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ reconnect_if_necessary()
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  BackendConnection                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │    Dial     │───>│ AUTH / +OK  │───>│   Ready     │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               │             │
//! │                       select / PING / relay   ▼             │
//! │                                      ┌─────────────────┐    │
//! │                                      │ BufReader/Writer│    │
//! │                                      │  over Deadline  │    │
//! │                                      └─────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Transports**: TCP (`host:port`) and unix domain sockets
//! - **Deadlines**: Separate connect, read and write timeouts
//! - **Health checks**: Passive `is_connected` probe and active `PING`
//! - **Statistics**: Connection events reported through [`Metrics`]
//!
//! ## Example
//!
//! ```ignore
//! use flashmux::connection::{BackendConfig, BackendConnection};
//!
//! let mut backend = BackendConnection::new(BackendConfig::tcp("127.0.0.1:6379"));
//! backend.reconnect_if_necessary().await?;
//! backend.select_database(2).await?;
//! assert!(backend.check_connection().await);
//! ```

pub mod backend;
pub mod config;
pub mod deadline;
pub mod stats;

// Re-export commonly used types
pub use backend::{BackendConnection, BackendStream, ConnectionError, ConnectionState, Session};
pub use config::{BackendConfig, Transport};
pub use deadline::Deadline;
pub use stats::{BackendStats, Counter, Metrics, NoopMetrics};
