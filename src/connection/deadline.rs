//! Deadline-aware transport wrapper.
//!
//! Every read and every write/flush on a backend socket is bounded by its
//! own timeout. [`Deadline`] arms a timer the first time an operation has to
//! wait and fails the operation with [`io::ErrorKind::TimedOut`] when the
//! timer fires first. The timer is disarmed as soon as the operation
//! completes, so each operation gets the full timeout. Cancelled operations
//! leave their timer armed until [`Deadline::clear_timers`] is called.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Sleep};

/// Wraps a stream so reads and writes time out individually.
///
/// A zero timeout disables the deadline for that direction.
#[derive(Debug)]
pub struct Deadline<S> {
    inner: S,
    read_timeout: Duration,
    write_timeout: Duration,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
}

impl<S> Deadline<S> {
    pub fn new(inner: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            write_timeout,
            read_timer: None,
            write_timer: None,
        }
    }

    /// Access to the raw stream, bypassing the deadlines.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Drops any armed timers.
    ///
    /// A timer is only disarmed when its operation completes. An operation
    /// that was cancelled while pending (its future dropped by `select!` or
    /// `timeout`) leaves its timer behind, and the next operation would
    /// inherit what is left of it. Call this before starting a new one.
    pub fn clear_timers(&mut self) {
        self.read_timer = None;
        self.write_timer = None;
    }
}

/// Resolves a pending operation against its timer.
///
/// `outcome` is the result of polling the wrapped operation. The timer is
/// dropped whenever the operation finishes, and armed on the first pending
/// poll.
fn check_timer<T>(
    outcome: Poll<io::Result<T>>,
    timer: &mut Option<Pin<Box<Sleep>>>,
    timeout: Duration,
    cx: &mut Context<'_>,
    what: &'static str,
) -> Poll<io::Result<T>> {
    match outcome {
        Poll::Ready(result) => {
            *timer = None;
            Poll::Ready(result)
        }
        Poll::Pending if timeout.is_zero() => Poll::Pending,
        Poll::Pending => {
            let armed = timer.get_or_insert_with(|| Box::pin(sleep(timeout)));
            if armed.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            *timer = None;
            Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, what)))
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Deadline<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let outcome = Pin::new(&mut this.inner).poll_read(cx, buf);
        check_timer(outcome, &mut this.read_timer, this.read_timeout, cx, "read timed out")
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Deadline<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let outcome = Pin::new(&mut this.inner).poll_write(cx, buf);
        check_timer(outcome, &mut this.write_timer, this.write_timeout, cx, "write timed out")
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let outcome = Pin::new(&mut this.inner).poll_flush(cx);
        check_timer(outcome, &mut this.write_timer, this.write_timeout, cx, "flush timed out")
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let outcome = Pin::new(&mut this.inner).poll_shutdown(cx);
        check_timer(outcome, &mut this.write_timer, this.write_timeout, cx, "shutdown timed out")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_read_times_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut timed = Deadline::new(client, Duration::from_millis(20), Duration::ZERO);

        let mut buf = [0u8; 8];
        let err = timed.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_read_completes_within_deadline() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut timed = Deadline::new(client, Duration::from_secs(1), Duration::ZERO);

        server.write_all(b"+OK\r\n").await.unwrap();
        let mut buf = [0u8; 5];
        timed.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+OK\r\n");
    }

    #[tokio::test]
    async fn test_each_read_gets_a_fresh_deadline() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut timed = Deadline::new(client, Duration::from_millis(100), Duration::ZERO);

        let writer = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(60)).await;
                server.write_all(b"x").await.unwrap();
            }
            server
        });

        // Three reads, 180ms in total, each one shorter than the timeout.
        let mut buf = [0u8; 1];
        for _ in 0..3 {
            timed.read_exact(&mut buf).await.unwrap();
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_cleared_timer_after_cancelled_read() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut timed = Deadline::new(client, Duration::from_millis(100), Duration::ZERO);

        // Give up on a read after 80ms, leaving its timer 20ms from firing.
        let mut buf = [0u8; 1];
        let cancelled = tokio::time::timeout(Duration::from_millis(80), timed.read(&mut buf)).await;
        assert!(cancelled.is_err());

        timed.clear_timers();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.write_all(b"x").await.unwrap();
            server
        });

        // 50ms into a fresh 100ms deadline.
        timed.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"x");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_times_out_when_peer_stalls() {
        let (client, _server) = tokio::io::duplex(8);
        let mut timed = Deadline::new(client, Duration::ZERO, Duration::from_millis(20));

        // The duplex buffer holds 8 bytes and nobody drains it.
        let err = timed.write_all(&[0u8; 64]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
