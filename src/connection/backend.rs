//! Backend Connection
//!
//! One [`BackendConnection`] owns one session with one backend server: it
//! dials, authenticates, keeps track of the selected database, answers
//! liveness questions and tears everything down when anything goes wrong.
//!
//! ## Lifecycle
//!
//! ```text
//!                  reconnect_if_necessary()
//!   ┌──────────────┐        ┌────────────┐        ┌────────────────┐        ┌───────┐
//!   │ Disconnected │───────>│ Connecting │───────>│ Authenticating │───────>│ Ready │
//!   └──────────────┘  dial  └────────────┘  wrap  └────────────────┘  +OK   └───────┘
//!          ▲                      │                       │                     │
//!          └──────────────────────┴───────────────────────┴─────────────────────┘
//!                    any I/O error, bad reply or explicit disconnect()
//! ```
//!
//! The buffered reader and writer live inside the state itself, so a
//! disconnected connection has no socket to misuse. Every state change goes
//! through one transition function, which also closes the socket, resets
//! the database index, logs and reports the disconnect.
//!
//! ## Concurrency
//!
//! A connection serves one request/response cycle at a time and has no
//! internal locking: callers serialize access (the pool holds it by `&mut`).
//! Separate connections share nothing and can run on separate tasks.

use crate::connection::config::{BackendConfig, Transport};
use crate::connection::deadline::Deadline;
use crate::connection::stats::{Counter, Metrics, NoopMetrics};
use crate::protocol::commands::SELECT_COMMAND;
use crate::protocol::types::{DEFAULT_DATABASE, OK_RESPONSE, PONG_RESPONSE, SHORT_PING_COMMAND};
use crate::protocol::{flush_line, read_line};
use bytes::{BufMut, BytesMut};
use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader, BufWriter, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// How long the passive liveness probe waits for the socket to speak up.
const PROBE_TIMEOUT: Duration = Duration::from_micros(10);

/// A connected backend socket, over TCP or a unix domain socket.
#[derive(Debug)]
pub enum BackendStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl AsyncRead for BackendStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            BackendStream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BackendStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BackendStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            BackendStream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            BackendStream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BackendStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            BackendStream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Buffered, deadline-bounded reader for backend replies
pub type BackendReader = BufReader<Deadline<ReadHalf<BackendStream>>>;

/// Buffered, deadline-bounded writer for backend requests
pub type BackendWriter = BufWriter<Deadline<WriteHalf<BackendStream>>>;

/// The live half of a connection: present only while a socket is open.
#[derive(Debug)]
pub struct Session {
    /// Replies from the backend
    pub reader: BackendReader,
    /// Requests to the backend
    pub writer: BackendWriter,
}

impl Session {
    fn new(stream: BackendStream, read_timeout: Duration, write_timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(Deadline::new(read_half, read_timeout, write_timeout)),
            writer: BufWriter::new(Deadline::new(write_half, read_timeout, write_timeout)),
        }
    }

    /// Gives the next read and write their full timeouts, dropping timers
    /// left armed by an operation that was cancelled midway.
    pub fn clear_deadlines(&mut self) {
        self.reader.get_mut().clear_timers();
        self.writer.get_mut().clear_timers();
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

/// Lifecycle state, carrying the session while one exists.
#[derive(Debug, Default)]
enum Stage {
    #[default]
    Disconnected,
    Connecting,
    Authenticating(Session),
    Ready(Session),
}

impl Stage {
    fn state(&self) -> ConnectionState {
        match self {
            Stage::Disconnected => ConnectionState::Disconnected,
            Stage::Connecting => ConnectionState::Connecting,
            Stage::Authenticating(_) => ConnectionState::Authenticating,
            Stage::Ready(_) => ConnectionState::Ready,
        }
    }

    fn has_session(&self) -> bool {
        matches!(self, Stage::Authenticating(_) | Stage::Ready(_))
    }

    fn session_mut(&mut self) -> Option<&mut Session> {
        match self {
            Stage::Authenticating(session) | Stage::Ready(session) => Some(session),
            _ => None,
        }
    }

    fn ready_mut(&mut self) -> Option<&mut Session> {
        match self {
            Stage::Ready(session) => Some(session),
            _ => None,
        }
    }
}

/// Errors raised by a backend connection.
///
/// Every variant except [`ConnectionError::NotConnected`] leaves the
/// connection disconnected.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The operation needs a ready session and there is none
    #[error("connection is not established")]
    NotConnected,

    /// Dialing the backend failed or timed out
    #[error("failed to dial {transport} backend {endpoint}: {source}")]
    Dial {
        transport: Transport,
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The backend did not answer `AUTH` with `+OK`
    #[error("invalid authentication response")]
    Authentication,

    /// The backend did not answer `select` with `+OK`
    #[error("invalid select response")]
    Selection,

    /// I/O error while writing to the backend
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An outbound session with a single backend server.
pub struct BackendConnection {
    config: BackendConfig,
    stage: Stage,
    /// The database the backend last acknowledged selecting
    database_id: usize,
    /// Reply line buffer, reused across round trips
    line: Vec<u8>,
    metrics: Arc<dyn Metrics>,
}

impl std::fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnection")
            .field("config", &self.config)
            .field("state", &self.stage.state())
            .field("database_id", &self.database_id)
            .finish()
    }
}

impl BackendConnection {
    /// Creates a disconnected connection. Nothing is dialed until the first
    /// [`reconnect_if_necessary`](Self::reconnect_if_necessary).
    pub fn new(config: BackendConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Like [`new`](Self::new), reporting events to `metrics`.
    pub fn with_metrics(config: BackendConfig, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            config,
            stage: Stage::Disconnected,
            database_id: DEFAULT_DATABASE,
            line: Vec::with_capacity(64),
            metrics,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.stage.state()
    }

    /// The database the backend last acknowledged.
    pub fn database_id(&self) -> usize {
        self.database_id
    }

    /// The reader/writer pair, while the connection is ready.
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.stage.ready_mut()
    }

    /// Moves to the stage produced by `next` and performs the side effects
    /// of entering it.
    ///
    /// `next` receives the current stage by value; dropping a session there
    /// closes its socket.
    fn transition(&mut self, next: impl FnOnce(Stage) -> Stage) {
        let previous = self.stage.state();
        let was_open = self.stage.has_session();
        self.stage = next(mem::take(&mut self.stage));

        match self.stage.state() {
            ConnectionState::Disconnected => {
                self.database_id = DEFAULT_DATABASE;
                if was_open {
                    info!(backend = %self.config.endpoint, "Disconnected a connection");
                    self.metrics.increment(Counter::Disconnect);
                }
            }
            ConnectionState::Connecting => {
                self.database_id = DEFAULT_DATABASE;
                debug!(backend = %self.config.endpoint, transport = %self.config.transport, "Dialing backend");
            }
            ConnectionState::Authenticating => {
                debug!(backend = %self.config.endpoint, "Socket open, authenticating");
            }
            ConnectionState::Ready if previous != ConnectionState::Ready => {
                info!(backend = %self.config.endpoint, "Backend connection ready");
                self.metrics.increment(Counter::Connect);
            }
            ConnectionState::Ready => {}
        }
    }

    /// Closes the socket, drops the reader and writer and resets the
    /// database index. Calling it on a disconnected connection does nothing
    /// more than that.
    pub fn disconnect(&mut self) {
        self.transition(|_| Stage::Disconnected);
    }

    /// Makes sure the connection is ready, dialing and authenticating a new
    /// session if the current one is gone.
    ///
    /// Returns the first error met while dialing or authenticating; the
    /// connection is left disconnected in that case.
    pub async fn reconnect_if_necessary(&mut self) -> Result<(), ConnectionError> {
        if self.is_connected().await {
            return Ok(());
        }

        // Whatever is left of the old session goes.
        self.disconnect();
        self.transition(|_| Stage::Connecting);

        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(backend = %self.config.endpoint, error = %e, "Error received from dial");
                self.metrics.increment(Counter::DialFailure);
                self.disconnect();
                return Err(ConnectionError::Dial {
                    transport: self.config.transport,
                    endpoint: self.config.endpoint.clone(),
                    source: e,
                });
            }
        };

        let session = Session::new(stream, self.config.read_timeout, self.config.write_timeout);
        self.transition(|_| Stage::Authenticating(session));

        self.authenticate().await?;

        self.transition(|stage| match stage {
            Stage::Authenticating(session) => Stage::Ready(session),
            other => other,
        });
        Ok(())
    }

    async fn dial(&self) -> io::Result<BackendStream> {
        let connect = async {
            match self.config.transport {
                Transport::Tcp => {
                    let stream = TcpStream::connect(&self.config.endpoint).await?;
                    stream.set_nodelay(true)?;
                    Ok(BackendStream::Tcp(stream))
                }
                #[cfg(unix)]
                Transport::Unix => tokio::net::UnixStream::connect(&self.config.endpoint)
                    .await
                    .map(BackendStream::Unix),
                #[cfg(not(unix))]
                Transport::Unix => Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not available on this platform",
                )),
            }
        };

        if self.config.connect_timeout.is_zero() {
            return connect.await;
        }
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }

    /// Sends `AUTH` if a password is configured and checks for `+OK`.
    async fn authenticate(&mut self) -> Result<(), ConnectionError> {
        let password = match self.config.password() {
            Some(password) => password,
            None => return Ok(()),
        };
        let command = auth_command(self.config.user(), password);

        let session = match self.stage.session_mut() {
            Some(session) => session,
            None => {
                error!(backend = %self.config.endpoint, "authenticate: using an invalid connection");
                return Err(ConnectionError::NotConnected);
            }
        };

        if let Err(e) = flush_line(&command, &mut session.writer).await {
            error!(backend = %self.config.endpoint, error = %e, "authenticate: error sending AUTH");
            self.metrics.increment(Counter::AuthFailure);
            self.disconnect();
            return Err(ConnectionError::Io(e));
        }

        let outcome = match read_line(&mut session.reader, &mut self.line).await {
            Ok(reply) if reply == OK_RESPONSE => Ok(()),
            Ok(reply) => {
                error!(
                    backend = %self.config.endpoint,
                    response = %String::from_utf8_lossy(reply),
                    "authenticate: invalid AUTH response"
                );
                Err(ConnectionError::Authentication)
            }
            Err(e) => {
                error!(backend = %self.config.endpoint, error = %e, "authenticate: error reading AUTH response");
                Err(ConnectionError::Authentication)
            }
        };

        if outcome.is_err() {
            self.metrics.increment(Counter::AuthFailure);
            self.disconnect();
        }
        outcome
    }

    /// Selects database `id` on the backend.
    ///
    /// On `+OK` the recorded database index becomes `id`. Any other reply,
    /// a read error or an over-long reply line disconnects and returns
    /// [`ConnectionError::Selection`]; the recorded index keeps its previous
    /// value.
    pub async fn select_database(&mut self, id: usize) -> Result<(), ConnectionError> {
        let session = match self.stage.ready_mut() {
            Some(session) => session,
            None => {
                error!(backend = %self.config.endpoint, "select_database: selecting on an invalid connection");
                return Err(ConnectionError::NotConnected);
            }
        };
        session.clear_deadlines();

        let command = select_command(id);
        if let Err(e) = flush_line(&command, &mut session.writer).await {
            error!(backend = %self.config.endpoint, error = %e, "select_database: error sending select");
            self.metrics.increment(Counter::SelectFailure);
            self.disconnect();
            return Err(ConnectionError::Io(e));
        }

        let outcome = match read_line(&mut session.reader, &mut self.line).await {
            Ok(reply) if reply == OK_RESPONSE => Ok(()),
            Ok(reply) => {
                error!(
                    backend = %self.config.endpoint,
                    database = id,
                    response = %String::from_utf8_lossy(reply),
                    "select_database: invalid select response"
                );
                Err(ConnectionError::Selection)
            }
            Err(e) => {
                error!(
                    backend = %self.config.endpoint,
                    database = id,
                    error = %e,
                    "select_database: error reading select response"
                );
                Err(ConnectionError::Selection)
            }
        };

        match outcome {
            Ok(()) => {
                self.database_id = id;
                debug!(backend = %self.config.endpoint, database = id, "Selected database");
                Ok(())
            }
            Err(e) => {
                let acknowledged = self.database_id;
                self.metrics.increment(Counter::SelectFailure);
                self.disconnect();
                // A refused select does not change what was last acknowledged.
                self.database_id = acknowledged;
                Err(e)
            }
        }
    }

    /// Active health check: sends `PING` and expects `+PONG`.
    ///
    /// Costs a full round trip, so use it for periodic checks rather than
    /// per request. Any failure disconnects and returns false.
    pub async fn check_connection(&mut self) -> bool {
        let session = match self.stage.ready_mut() {
            Some(session) => session,
            None => return false,
        };
        session.clear_deadlines();

        let write_started = Instant::now();
        if let Err(e) = flush_line(SHORT_PING_COMMAND, &mut session.writer).await {
            error!(
                backend = %self.config.endpoint,
                error = %e,
                elapsed = ?write_started.elapsed(),
                "check_connection: could not write PING"
            );
            self.metrics.increment(Counter::PingFailure);
            self.disconnect();
            return false;
        }

        let read_started = Instant::now();
        let healthy = match read_line(&mut session.reader, &mut self.line).await {
            Ok(reply) if reply == PONG_RESPONSE => true,
            Ok(reply) => {
                error!(
                    backend = %self.config.endpoint,
                    response = %String::from_utf8_lossy(reply),
                    "check_connection: expected PONG response"
                );
                false
            }
            Err(e) => {
                error!(
                    backend = %self.config.endpoint,
                    error = %e,
                    elapsed = ?read_started.elapsed(),
                    "check_connection: could not read PING response"
                );
                false
            }
        };

        if !healthy {
            self.metrics.increment(Counter::PingFailure);
            self.disconnect();
        }
        healthy
    }

    /// Passive liveness check.
    ///
    /// Tries to read from the raw socket with an extremely short deadline.
    /// Timing out means the peer is quiet and the socket is still usable.
    /// A clean close or any other error means it is gone. Bytes that show up
    /// unasked for are logged and dropped, and the connection still counts
    /// as connected.
    pub async fn is_connected(&mut self) -> bool {
        let session = match self.stage.ready_mut() {
            Some(session) => session,
            None => return false,
        };

        let buffered = session.reader.buffer().len();
        if buffered != 0 {
            warn!(backend = %self.config.endpoint, bytes = buffered, "Got bytes back when we expected 0");
            return true;
        }

        let mut probe = [0u8; 4];
        let raw = session.reader.get_mut().get_mut();
        match tokio::time::timeout(PROBE_TIMEOUT, raw.read(&mut probe)).await {
            Err(_) => true,
            Ok(Ok(0)) => {
                info!(backend = %self.config.endpoint, "Backend closed the connection, will reconnect");
                false
            }
            Ok(Ok(n)) => {
                warn!(backend = %self.config.endpoint, bytes = n, "Got bytes back when we expected 0");
                true
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => true,
            Ok(Err(e)) => {
                info!(
                    backend = %self.config.endpoint,
                    error = %e,
                    "Error when checking the connection, will reconnect"
                );
                false
            }
        }
    }
}

/// Builds `AUTH <password>` or `AUTH <user> <password>`.
fn auth_command(user: Option<&str>, password: &str) -> BytesMut {
    let user_len = user.map_or(0, |u| u.len() + 1);
    let mut command = BytesMut::with_capacity(5 + user_len + password.len());
    command.put_slice(b"AUTH ");
    if let Some(user) = user {
        command.put_slice(user.as_bytes());
        command.put_u8(b' ');
    }
    command.put_slice(password.as_bytes());
    command
}

/// Builds `select <id>`.
fn select_command(id: usize) -> BytesMut {
    let index = id.to_string();
    let mut command = BytesMut::with_capacity(SELECT_COMMAND.len() + 1 + index.len());
    command.put_slice(SELECT_COMMAND);
    command.put_u8(b' ');
    command.put_slice(index.as_bytes());
    command
}
