//! Line-oriented writes with the RESP newline.

use crate::protocol::types::CRLF;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Writes `line` followed by CRLF to `destination` without flushing.
///
/// Use this to batch several lines ahead of one [`flush_line`] or an
/// explicit flush. Write errors are returned unchanged.
pub async fn write_line<W>(line: &[u8], destination: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    destination.write_all(line).await?;
    destination.write_all(CRLF).await
}

/// Writes `line` followed by CRLF, then flushes `destination`.
///
/// Used for single round-trip commands such as `AUTH`, `select` and `PING`.
pub async fn flush_line<W>(line: &[u8], destination: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_line(line, destination).await?;
    let start = Instant::now();
    destination.flush().await?;
    trace!(elapsed = ?start.elapsed(), "flush_line: flushed");
    Ok(())
}
