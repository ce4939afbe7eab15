//! Streaming Reply Relay
//!
//! Backend replies are never decoded into values. The streamer reads just
//! enough framing (header lines and length prefixes) to know where a reply
//! ends, and moves the payload bytes straight from the source buffer to the
//! destination, or drops them.
//!
//! ## Why stream?
//!
//! 1. **Bounded memory**: a 500 MB bulk reply costs one reader buffer, not
//!    500 MB.
//! 2. **Byte-for-byte fidelity**: header lines are forwarded exactly as
//!    received rather than re-encoded from the parsed length, so fields the
//!    engine does not understand survive the trip.
//!
//! ## Reply Shapes
//!
//! ```text
//! $<len>\r\n<payload>\r\n        bulk
//! $-1\r\n                        null bulk (complete on its own)
//! *<count>\r\n<element>...       multibulk
//! +OK\r\n  -ERR ...\r\n  :1\r\n  single line
//! ```
//!
//! Every operation starts from a first line that has already been read,
//! with its CRLF stripped. [`MessageStreamer::copy_server_response`] reads
//! that line itself and flushes the destination once the whole reply is
//! written; the other copy operations leave flushing to the caller.

use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::scanner::parse_int;
use crate::protocol::types::{
    prefix, BUFFER_SIZE, CRLF, MAX_LINE_LENGTH, MAX_NESTING_DEPTH, NULL_BULK_RESPONSE,
};
use crate::protocol::writer::write_line;
use std::io;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Reads one line from `source` into `line` and returns it without its
/// line terminator.
///
/// Lines longer than [`MAX_LINE_LENGTH`] fail with
/// [`ProtocolError::LineTooLong`]. End of stream before a newline is an
/// [`io::ErrorKind::UnexpectedEof`] transport error.
pub async fn read_line<'a, R>(source: &mut R, line: &'a mut Vec<u8>) -> ProtocolResult<&'a [u8]>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    line.clear();
    loop {
        let available = source.fill_buf().await?;
        if available.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended mid-line").into());
        }

        let (take, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        if line.len() + take > MAX_LINE_LENGTH + CRLF.len() {
            debug!(max = MAX_LINE_LENGTH, "read_line: line too long");
            return Err(ProtocolError::LineTooLong {
                max: MAX_LINE_LENGTH,
            });
        }

        line.extend_from_slice(&available[..take]);
        source.consume(take);
        if complete {
            break;
        }
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(line.as_slice())
}

/// Relays or discards RESP replies between buffered streams.
///
/// Owns a line buffer for element headers and a fixed-size scratch buffer
/// for discarded payloads. Both are reused across calls and never grow past
/// their limits, so one streamer per backend connection is enough.
#[derive(Debug)]
pub struct MessageStreamer {
    /// Header line of the element being processed
    line: Vec<u8>,
    /// Landing area for ignored payload bytes
    scratch: Box<[u8; BUFFER_SIZE]>,
}

impl Default for MessageStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStreamer {
    pub fn new() -> Self {
        Self {
            line: Vec::with_capacity(128),
            scratch: Box::new([0u8; BUFFER_SIZE]),
        }
    }

    /// Copies one bulk message, starting at `first_line`, from `source` to
    /// `destination`.
    pub async fn copy_bulk_message<R, W>(
        &mut self,
        first_line: &[u8],
        destination: &mut W,
        source: &mut R,
    ) -> ProtocolResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        copy_bulk(first_line, destination, source).await
    }

    /// Reads past one bulk message, starting at `first_line`.
    pub async fn ignore_bulk_message<R>(&mut self, first_line: &[u8], source: &mut R) -> ProtocolResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        discard_bulk(first_line, source, &mut self.scratch).await
    }

    /// Copies a multibulk message, starting at `first_line`, from `source`
    /// to `destination`.
    ///
    /// Does not flush `destination`.
    pub async fn copy_multi_bulk_message<R, W>(
        &mut self,
        first_line: &[u8],
        destination: &mut W,
        source: &mut R,
    ) -> ProtocolResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let count = multi_bulk_count(first_line)?;
        write_line(first_line, destination).await?;
        trace!(count, "copy_multi_bulk_message: copying elements");
        self.copy_elements(count, destination, source).await
    }

    /// Reads past a multibulk message, starting at `first_line`.
    pub async fn ignore_multi_bulk_message<R>(&mut self, first_line: &[u8], source: &mut R) -> ProtocolResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let count = multi_bulk_count(first_line)?;
        trace!(count, "ignore_multi_bulk_message: ignoring elements");

        let mut pending = vec![count];
        while let Some(remaining) = pending.last_mut() {
            if *remaining == 0 {
                pending.pop();
                continue;
            }
            *remaining -= 1;

            let element = read_line(source, &mut self.line).await?;
            match element.first() {
                Some(&prefix::ARRAY) if !is_null_array(element) => {
                    let nested = multi_bulk_count(element)?;
                    push_nested(&mut pending, nested)?;
                }
                Some(&prefix::BULK_STRING) => {
                    discard_bulk(element, source, &mut self.scratch).await?;
                }
                Some(&(prefix::INTEGER | prefix::SIMPLE_STRING | prefix::ERROR | prefix::ARRAY)) => {}
                _ => {
                    debug!("ignore_multi_bulk_message: unexpected element header");
                    return Err(ProtocolError::BadBulkFormat);
                }
            }
        }
        Ok(())
    }

    /// Copies one complete server reply from `remote` to `local`.
    ///
    /// The reply shape is chosen from the first byte of its first line:
    /// bulk, multibulk with a non-negative count, or a single line for
    /// everything else. `local` is flushed exactly once, after the whole
    /// reply has been written.
    pub async fn copy_server_response<R, W>(&mut self, remote: &mut R, local: &mut W) -> ProtocolResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let first_line = read_line(remote, &mut self.line).await?;
        if first_line.len() < 2 {
            debug!("copy_server_response: invalid first line");
            return Err(ProtocolError::BadBulkFormat);
        }

        match first_line[0] {
            prefix::BULK_STRING => copy_bulk(first_line, local, remote).await?,
            prefix::ARRAY if !is_null_array(first_line) => {
                let count = multi_bulk_count(first_line)?;
                write_line(first_line, local).await?;
                self.copy_elements(count, local, remote).await?;
            }
            // Normally +OK, but forward whatever arrives in case the format
            // grows.
            _ => write_line(first_line, local).await?,
        }

        local.flush().await?;
        trace!(elapsed = ?start.elapsed(), "copy_server_response: copied reply");
        Ok(())
    }

    /// Copies `count` multibulk elements, following nested multibulks
    /// without recursion.
    async fn copy_elements<R, W>(&mut self, count: usize, destination: &mut W, source: &mut R) -> ProtocolResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut pending = vec![count];
        while let Some(remaining) = pending.last_mut() {
            if *remaining == 0 {
                pending.pop();
                continue;
            }
            *remaining -= 1;

            let element = read_line(source, &mut self.line).await?;
            match element.first() {
                Some(&prefix::ARRAY) if !is_null_array(element) => {
                    let nested = multi_bulk_count(element)?;
                    write_line(element, destination).await?;
                    push_nested(&mut pending, nested)?;
                }
                Some(&prefix::BULK_STRING) => copy_bulk(element, destination, source).await?,
                Some(&(prefix::INTEGER | prefix::SIMPLE_STRING | prefix::ERROR | prefix::ARRAY)) => {
                    write_line(element, destination).await?;
                }
                _ => {
                    debug!("copy_elements: unexpected element header");
                    return Err(ProtocolError::BadBulkFormat);
                }
            }
        }
        Ok(())
    }
}

/// Validates a multibulk header line and returns its element count.
fn multi_bulk_count(first_line: &[u8]) -> ProtocolResult<usize> {
    if first_line.len() < 2 || first_line[0] != prefix::ARRAY {
        debug!("multi_bulk_count: invalid multibulk first line");
        return Err(ProtocolError::BadBulkFormat);
    }
    parse_int(&first_line[1..])
}

/// `*-1` and friends carry no elements.
#[inline]
fn is_null_array(line: &[u8]) -> bool {
    line.get(1) == Some(&b'-')
}

fn push_nested(pending: &mut Vec<usize>, count: usize) -> ProtocolResult<()> {
    if pending.len() >= MAX_NESTING_DEPTH {
        debug!(depth = pending.len(), "multibulk nested too deeply");
        return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
    }
    pending.push(count);
    Ok(())
}

/// Validates a bulk header line. Returns `None` for the null bulk.
fn bulk_len(first_line: &[u8]) -> ProtocolResult<Option<usize>> {
    if first_line.len() < 2 || first_line[0] != prefix::BULK_STRING {
        debug!("bulk_len: invalid bulk first line");
        return Err(ProtocolError::BadBulkFormat);
    }
    if first_line == NULL_BULK_RESPONSE {
        return Ok(None);
    }
    parse_int(&first_line[1..]).map(Some)
}

async fn copy_bulk<R, W>(first_line: &[u8], destination: &mut W, source: &mut R) -> ProtocolResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let len = match bulk_len(first_line)? {
        Some(len) => len,
        None => {
            write_line(NULL_BULK_RESPONSE, destination).await?;
            return Ok(());
        }
    };
    trace!(len, "copy_bulk: copying payload");

    write_line(first_line, destination).await?;

    // Straight from the reader's buffer; the destination is never flushed
    // here.
    let mut remaining = len;
    while remaining > 0 {
        let available = source.fill_buf().await?;
        if available.is_empty() {
            debug!(remaining, expected = len, "copy_bulk: ran out of bytes to copy");
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "bulk payload ended early").into());
        }
        let chunk = available.len().min(remaining);
        destination.write_all(&available[..chunk]).await?;
        source.consume(chunk);
        remaining -= chunk;
    }

    expect_crlf(source).await?;
    destination.write_all(CRLF).await?;
    Ok(())
}

async fn discard_bulk<R>(first_line: &[u8], source: &mut R, scratch: &mut [u8; BUFFER_SIZE]) -> ProtocolResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut remaining = match bulk_len(first_line)? {
        Some(len) => len,
        None => return Ok(()),
    };
    trace!(len = remaining, "discard_bulk: ignoring payload");

    while remaining > 0 {
        let chunk = remaining.min(BUFFER_SIZE);
        let read = source.read(&mut scratch[..chunk]).await?;
        if read == 0 {
            debug!(remaining, "discard_bulk: ran out of bytes to ignore");
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "bulk payload ended early").into());
        }
        remaining -= read;
    }

    expect_crlf(source).await
}

async fn expect_crlf<R>(source: &mut R) -> ProtocolResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut terminator = [0u8; 2];
    source.read_exact(&mut terminator).await?;
    if terminator != CRLF {
        debug!(?terminator, "expect_crlf: missing CRLF after payload");
        return Err(ProtocolError::BadBulkFormat);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::BufReader;

    /// Sink that records writes and counts flushes.
    #[derive(Debug, Default)]
    struct RecordingWriter {
        written: Vec<u8>,
        flushes: usize,
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.get_mut().written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.get_mut().flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn relay(input: &[u8]) -> (ProtocolResult<()>, RecordingWriter) {
        let mut source = BufReader::new(input);
        let mut destination = RecordingWriter::default();
        let result = MessageStreamer::new()
            .copy_server_response(&mut source, &mut destination)
            .await;
        (result, destination)
    }

    #[tokio::test]
    async fn test_read_line() {
        let mut source = BufReader::new(&b"+OK\r\n:12\r\n"[..]);
        let mut line = Vec::new();
        assert_eq!(read_line(&mut source, &mut line).await.unwrap(), b"+OK");
        assert_eq!(read_line(&mut source, &mut line).await.unwrap(), b":12");
        let err = read_line(&mut source, &mut line).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_read_line_across_reads() {
        let mut source = BufReader::new(tokio_test::io::Builder::new().read(b"+PO").read(b"NG\r\n").build());
        let mut line = Vec::new();
        assert_eq!(read_line(&mut source, &mut line).await.unwrap(), b"+PONG");
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let mut input = vec![b'+'; MAX_LINE_LENGTH + 16];
        input.extend_from_slice(CRLF);
        let mut source = BufReader::new(&input[..]);
        let mut line = Vec::new();
        assert!(matches!(
            read_line(&mut source, &mut line).await,
            Err(ProtocolError::LineTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn test_copy_null_bulk_reads_nothing_further() {
        let input = b"$-1\r\n+OK\r\n";
        let mut source = BufReader::new(&input[..]);
        let mut destination = RecordingWriter::default();
        let mut streamer = MessageStreamer::new();

        streamer
            .copy_server_response(&mut source, &mut destination)
            .await
            .unwrap();
        assert_eq!(destination.written, b"$-1\r\n");

        let mut line = Vec::new();
        assert_eq!(read_line(&mut source, &mut line).await.unwrap(), b"+OK");
    }

    #[tokio::test]
    async fn test_copy_bulk() {
        let (result, destination) = relay(b"$5\r\nhello\r\n").await;
        result.unwrap();
        assert_eq!(destination.written, b"$5\r\nhello\r\n");
        assert_eq!(destination.flushes, 1);
    }

    #[tokio::test]
    async fn test_copy_binary_bulk() {
        let input = b"$6\r\nhe\r\n\x00o\r\n";
        let (result, destination) = relay(input).await;
        result.unwrap();
        assert_eq!(destination.written, input);
    }

    #[tokio::test]
    async fn test_copy_empty_bulk() {
        let (result, destination) = relay(b"$0\r\n\r\n").await;
        result.unwrap();
        assert_eq!(destination.written, b"$0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_copy_bulk_bad_terminator() {
        let (result, _) = relay(b"$3\r\nfooXY").await;
        assert!(matches!(result, Err(ProtocolError::BadBulkFormat)));
    }

    #[tokio::test]
    async fn test_copy_bulk_short_payload() {
        let (result, _) = relay(b"$10\r\nfoo").await;
        assert!(matches!(result, Err(ProtocolError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_copy_bulk_bad_length() {
        let (result, _) = relay(b"$1x\r\nfoo\r\n").await;
        assert!(matches!(result, Err(ProtocolError::InvalidInteger)));
    }

    #[tokio::test]
    async fn test_copy_bulk_requires_sigil() {
        let mut source = BufReader::new(&b""[..]);
        let mut destination = Vec::new();
        let result = MessageStreamer::new()
            .copy_bulk_message(b"*1", &mut destination, &mut source)
            .await;
        assert!(matches!(result, Err(ProtocolError::BadBulkFormat)));
        assert!(destination.is_empty());
    }

    #[tokio::test]
    async fn test_copy_mixed_multi_bulk() {
        let input = b"*3\r\n:42\r\n$3\r\nfoo\r\n$-1\r\n";
        let (result, destination) = relay(input).await;
        result.unwrap();
        assert_eq!(destination.written, input);
        assert_eq!(destination.flushes, 1);
    }

    #[tokio::test]
    async fn test_copy_multi_bulk_leaves_following_reply() {
        let input = b"*2\r\n$1\r\na\r\n$1\r\nb\r\n+OK\r\n";
        let mut source = BufReader::new(&input[..]);
        let mut destination = RecordingWriter::default();
        let mut streamer = MessageStreamer::new();

        streamer
            .copy_server_response(&mut source, &mut destination)
            .await
            .unwrap();
        assert_eq!(destination.written, b"*2\r\n$1\r\na\r\n$1\r\nb\r\n");

        streamer
            .copy_server_response(&mut source, &mut destination)
            .await
            .unwrap();
        assert_eq!(destination.flushes, 2);
        assert!(destination.written.ends_with(b"+OK\r\n"));
    }

    #[tokio::test]
    async fn test_copy_nested_multi_bulk() {
        let input = b"*2\r\n*2\r\n:1\r\n$3\r\nbar\r\n*-1\r\n";
        let (result, destination) = relay(input).await;
        result.unwrap();
        assert_eq!(destination.written, input);
    }

    #[tokio::test]
    async fn test_copy_transaction_reply() {
        let input = b"*3\r\n+OK\r\n-ERR wrong type\r\n:7\r\n";
        let (result, destination) = relay(input).await;
        result.unwrap();
        assert_eq!(destination.written, input);
    }

    #[tokio::test]
    async fn test_copy_multi_bulk_short_stream() {
        let (result, _) = relay(b"*3\r\n$1\r\na\r\n").await;
        assert!(matches!(result, Err(ProtocolError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_copy_multi_bulk_without_flush() {
        let mut source = BufReader::new(&b"$1\r\na\r\n:1\r\n$3\r\nbar\r\n"[..]);
        let mut destination = RecordingWriter::default();
        MessageStreamer::new()
            .copy_multi_bulk_message(b"*3", &mut destination, &mut source)
            .await
            .unwrap();
        assert_eq!(destination.written, b"*3\r\n$1\r\na\r\n:1\r\n$3\r\nbar\r\n");
        assert_eq!(destination.flushes, 0);
    }

    #[tokio::test]
    async fn test_copy_bulk_message_without_flush() {
        let payload = vec![b'z'; BUFFER_SIZE * 2 + 5];
        let mut input = payload.clone();
        input.extend_from_slice(b"\r\n");
        // A small reader buffer forces the payload through several refills.
        let mut source = BufReader::with_capacity(64, &input[..]);
        let mut destination = RecordingWriter::default();
        let header = format!("${}", payload.len());

        MessageStreamer::new()
            .copy_bulk_message(header.as_bytes(), &mut destination, &mut source)
            .await
            .unwrap();
        assert_eq!(destination.flushes, 0);
        assert!(destination.written.starts_with(header.as_bytes()));
        assert_eq!(destination.written.len(), header.len() + 2 + payload.len() + 2);
    }

    #[tokio::test]
    async fn test_copy_nesting_limit() {
        let mut input = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        let (result, _) = relay(&input).await;
        assert!(matches!(result, Err(ProtocolError::NestingTooDeep(_))));
    }

    #[tokio::test]
    async fn test_copy_single_lines() {
        let inputs: [&[u8]; 4] = [b"+OK\r\n", b"-ERR unknown command\r\n", b":1000\r\n", b"*-1\r\n"];
        for input in inputs {
            let (result, destination) = relay(input).await;
            result.unwrap();
            assert_eq!(destination.written, input);
            assert_eq!(destination.flushes, 1);
        }
    }

    #[tokio::test]
    async fn test_copy_rejects_short_first_line() {
        let (result, destination) = relay(b"+\r\n").await;
        assert!(matches!(result, Err(ProtocolError::BadBulkFormat)));
        assert_eq!(destination.flushes, 0);
    }

    #[tokio::test]
    async fn test_ignore_bulk() {
        let mut source = BufReader::new(&b"hello\r\n+OK\r\n"[..]);
        let mut streamer = MessageStreamer::new();
        streamer.ignore_bulk_message(b"$5", &mut source).await.unwrap();

        let mut line = Vec::new();
        assert_eq!(read_line(&mut source, &mut line).await.unwrap(), b"+OK");
    }

    #[tokio::test]
    async fn test_ignore_null_bulk() {
        let mut source = BufReader::new(&b"+OK\r\n"[..]);
        let mut streamer = MessageStreamer::new();
        streamer
            .ignore_bulk_message(NULL_BULK_RESPONSE, &mut source)
            .await
            .unwrap();

        let mut line = Vec::new();
        assert_eq!(read_line(&mut source, &mut line).await.unwrap(), b"+OK");
    }

    #[tokio::test]
    async fn test_ignore_bulk_larger_than_scratch() {
        let len = BUFFER_SIZE * 3 + 17;
        let mut input = vec![b'x'; len];
        input.extend_from_slice(b"\r\n:1\r\n");
        let mut source = BufReader::new(&input[..]);
        let header = format!("${}", len);

        let mut streamer = MessageStreamer::new();
        streamer
            .ignore_bulk_message(header.as_bytes(), &mut source)
            .await
            .unwrap();

        let mut line = Vec::new();
        assert_eq!(read_line(&mut source, &mut line).await.unwrap(), b":1");
    }

    #[tokio::test]
    async fn test_ignore_bulk_bad_terminator() {
        let mut source = BufReader::new(&b"hello!!"[..]);
        let result = MessageStreamer::new()
            .ignore_bulk_message(b"$5", &mut source)
            .await;
        assert!(matches!(result, Err(ProtocolError::BadBulkFormat)));
    }

    #[tokio::test]
    async fn test_ignore_multi_bulk() {
        let mut source = BufReader::new(&b":1\r\n$3\r\nfoo\r\n*2\r\n$1\r\na\r\n$-1\r\n+OK\r\n"[..]);
        let mut streamer = MessageStreamer::new();
        streamer
            .ignore_multi_bulk_message(b"*3", &mut source)
            .await
            .unwrap();

        let mut line = Vec::new();
        assert_eq!(read_line(&mut source, &mut line).await.unwrap(), b"+OK");
    }

    #[tokio::test]
    async fn test_ignore_multi_bulk_requires_sigil() {
        let mut source = BufReader::new(&b""[..]);
        let result = MessageStreamer::new()
            .ignore_multi_bulk_message(b"$3", &mut source)
            .await;
        assert!(matches!(result, Err(ProtocolError::BadBulkFormat)));
    }
}
