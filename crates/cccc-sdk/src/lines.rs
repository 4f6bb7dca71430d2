//! Newline-delimited line reassembly over a raw byte stream
//!
//! `LineReader` keeps one growing buffer (seeded with any bytes left over
//! from a previous read) and splits complete lines off its front. Reads are
//! only issued when no complete line is buffered, so a single chunk carrying
//! several messages yields them one by one without touching the socket.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Bytes reserved in the buffer before each socket read
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Pull-based line splitter over an `AsyncRead`
///
/// The reader is single pass: once the underlying stream reports EOF,
/// [`LineReader::next_line`] keeps returning `Ok(None)`.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to contain no newline
    scanned: usize,
    eof: bool,
}

impl<R> LineReader<R> {
    /// Wrap `reader`, treating `residual` as bytes already received
    pub fn new(reader: R, residual: Vec<u8>) -> Self {
        Self {
            reader,
            buffer: residual,
            scanned: 0,
            eof: false,
        }
    }

    /// Number of bytes buffered but not yet returned as a line
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Split the first complete line off the buffer, without its `\n`
    pub(crate) fn take_line(&mut self) -> Option<Vec<u8>> {
        let offset = self.buffer[self.scanned..]
            .iter()
            .position(|b| *b == b'\n');

        match offset {
            Some(offset) => {
                let newline = self.scanned + offset;
                let rest = self.buffer.split_off(newline + 1);
                let mut line = std::mem::replace(&mut self.buffer, rest);
                line.pop();
                self.scanned = 0;
                Some(line)
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// Give back the underlying reader and whatever is still buffered
    #[cfg(test)]
    pub(crate) fn into_parts(self) -> (R, Vec<u8>) {
        (self.reader, self.buffer)
    }

    /// Mutable access to the underlying stream, e.g. to write a request or
    /// shut it down; bytes already buffered are unaffected
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read one more chunk from the stream into the buffer
    ///
    /// Returns the number of bytes read; `0` means end of stream.
    pub(crate) async fn fill(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        self.buffer.reserve(READ_CHUNK_SIZE);
        let n = self.reader.read_buf(&mut self.buffer).await?;
        if n == 0 {
            self.eof = true;
        }
        trace!(bytes = n, buffered = self.buffer.len(), "Read chunk");
        Ok(n)
    }

    /// Next trimmed, non-blank line
    ///
    /// Suspends until a complete line is available. Returns `Ok(None)` at end
    /// of stream; a trailing fragment without a newline is dropped then.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            while let Some(raw) = self.take_line() {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if !line.is_empty() {
                    return Ok(Some(line.to_string()));
                }
            }

            if self.fill().await? == 0 {
                if !self.buffer.is_empty() {
                    trace!(
                        bytes = self.buffer.len(),
                        "Dropping unterminated trailing fragment"
                    );
                    self.buffer.clear();
                    self.scanned = 0;
                }
                return Ok(None);
            }
        }
    }
}

/// Build a line reader over `socket` seeded with `residual`
pub fn lines<R: AsyncRead + Unpin>(socket: R, residual: Vec<u8>) -> LineReader<R> {
    LineReader::new(socket, residual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_single_chunk_multiple_lines() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut reader = lines(device, Vec::new());

        host.write_all(b"a\nb\nc").await.unwrap();

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("b"));

        // "c" has no newline yet, so the next read must wait
        let pending = tokio::time::timeout(Duration::from_millis(50), reader.next_line()).await;
        assert!(pending.is_err(), "partial line must not be produced");

        host.write_all(b"\n").await.unwrap();
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_trailing_fragment_dropped_at_eof() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut reader = lines(device, Vec::new());

        host.write_all(b"a\nb\nc").await.unwrap();
        drop(host);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(reader.next_line().await.unwrap(), None);
        // Stays finished
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_split_across_writes() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut reader = lines(device, Vec::new());

        let writer = tokio::spawn(async move {
            host.write_all(b"hel").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            host.write_all(b"lo\n").await.unwrap();
        });

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("hello"));
        writer.await.unwrap();
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blank_lines_suppressed_and_trimmed() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut reader = lines(device, Vec::new());

        host.write_all(b"\n   \n\t\r\n  x  \r\n\n").await.unwrap();
        drop(host);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("x"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_residual_buffer_is_consumed_first() {
        let (mut host, device) = tokio::io::duplex(64);
        let mut reader = lines(device, b"first\nsec".to_vec());

        host.write_all(b"ond\n").await.unwrap();
        drop(host);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_long_line_larger_than_chunk() {
        let (mut host, device) = tokio::io::duplex(1024);
        let mut reader = lines(device, Vec::new());
        let payload = "x".repeat(READ_CHUNK_SIZE * 3 + 17);

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            host.write_all(payload.as_bytes()).await.unwrap();
            host.write_all(b"\n").await.unwrap();
        });

        assert_eq!(reader.next_line().await.unwrap(), Some(expected));
        writer.await.unwrap();
    }

    #[test]
    fn test_take_line_leaves_remainder() {
        let (_host, device) = tokio::io::duplex(8);
        let mut reader = LineReader::new(device, b"one\ntwo".to_vec());

        assert_eq!(reader.take_line(), Some(b"one".to_vec()));
        assert_eq!(reader.take_line(), None);
        assert_eq!(reader.buffered_len(), 3);

        let (_device, rest) = reader.into_parts();
        assert_eq!(rest, b"two".to_vec());
    }
}
