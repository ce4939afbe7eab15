//! Static configuration for one backend session.

use std::fmt;
use std::time::Duration;

/// Default backend address (same as Redis)
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:6379";

/// Default time allowed for the TCP or unix-socket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(50);

/// Default time allowed for each individual read or write
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// How the backend is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// `host:port`
    Tcp,
    /// Filesystem path of a unix domain socket
    Unix,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Unix => write!(f, "unix"),
        }
    }
}

/// Everything a [`BackendConnection`](super::BackendConnection) needs to
/// know before it dials.
///
/// A zero read or write timeout disables that deadline; a zero connect
/// timeout waits for the operating system's own limit.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub transport: Transport,
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub auth_user: Option<String>,
    pub auth_password: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_IO_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
            auth_user: None,
            auth_password: None,
        }
    }
}

impl BackendConfig {
    /// Configuration for a backend at `host:port`.
    pub fn tcp(endpoint: impl Into<String>) -> Self {
        Self {
            transport: Transport::Tcp,
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Configuration for a backend listening on a unix socket.
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            transport: Transport::Unix,
            endpoint: path.into(),
            ..Self::default()
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration, write: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth_password = Some(password.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.auth_user = Some(user.into());
        self
    }

    /// The password to authenticate with. Empty counts as none.
    pub fn password(&self) -> Option<&str> {
        self.auth_password.as_deref().filter(|p| !p.is_empty())
    }

    /// The user to authenticate as. Empty counts as none.
    pub fn user(&self) -> Option<&str> {
        self.auth_user.as_deref().filter(|u| !u.is_empty())
    }
}

// Hand-written so credentials never end up in logs.
impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("transport", &self.transport)
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("auth_user", &self.auth_user)
            .field("auth_password", &self.auth_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
