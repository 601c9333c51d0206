//! Per-connection input/output buffers
//!
//! Reads from the transport are level triggered: once buffered input reaches
//! the high watermark no further reads are issued until the consumer drains
//! the input down to the low watermark.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{BufferResult, ByteBuffer, DEFAULT_HIGH_WATERMARK};

/// Maximum bytes requested from the transport per read
pub const READ_CHUNK_SIZE: usize = 4096;

/// Result of a single `fill` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// This many bytes were appended to the input buffer
    Read(usize),
    /// Input is at or above the high watermark; nothing was read
    Suspended,
    /// The peer closed the transport
    Closed,
}

/// Buffer statistics
#[derive(Debug, Default, Clone)]
pub struct BufferStats {
    /// Bytes read from the transport
    pub bytes_read: u64,
    /// Bytes written to the transport
    pub bytes_written: u64,
    /// Times reading was suspended by the high watermark
    pub suspensions: u64,
}

/// The input and output buffers of one connection
pub struct ConnectionBuffers<S> {
    stream: S,
    input: BytesMut,
    output: BytesMut,
    low_watermark: usize,
    high_watermark: usize,
    reading: bool,
    stats: BufferStats,
}

impl<S> ConnectionBuffers<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Bind a fresh pair of buffers to a transport
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            input: BytesMut::with_capacity(READ_CHUNK_SIZE),
            output: BytesMut::with_capacity(READ_CHUNK_SIZE),
            low_watermark: 0,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            reading: true,
            stats: BufferStats::default(),
        }
    }

    /// View of the buffered, not yet decoded input
    pub fn input(&mut self) -> ByteBuffer<'_> {
        ByteBuffer::wrap(&mut self.input)
    }

    /// View of the queued, not yet flushed output
    pub fn output(&mut self) -> ByteBuffer<'_> {
        ByteBuffer::wrap(&mut self.output)
    }

    /// Configure read backpressure
    ///
    /// Reading stops once `high` bytes of input are buffered and resumes at
    /// `low` or below. A `high` of zero removes the limit.
    pub fn read_in(&mut self, low: usize, high: usize) {
        self.high_watermark = high;
        self.low_watermark = if high == 0 { low } else { low.min(high) };
        self.update_reading();
    }

    pub fn watermarks(&self) -> (usize, usize) {
        (self.low_watermark, self.high_watermark)
    }

    /// Whether the next `fill` would read from the transport
    pub fn reading_enabled(&mut self) -> bool {
        self.update_reading();
        self.reading
    }

    fn update_reading(&mut self) {
        let buffered = self.input.len();

        if self.high_watermark == 0 {
            self.reading = true;
        } else if self.reading && buffered >= self.high_watermark {
            self.reading = false;
            self.stats.suspensions += 1;
            tracing::debug!(
                "Input reached high watermark ({} >= {}), suspending reads",
                buffered,
                self.high_watermark
            );
        } else if !self.reading && buffered <= self.low_watermark {
            self.reading = true;
            tracing::debug!(
                "Input drained to low watermark ({} <= {}), resuming reads",
                buffered,
                self.low_watermark
            );
        }
    }

    /// Read once from the transport into the input buffer
    pub async fn fill(&mut self) -> BufferResult<FillOutcome> {
        if !self.reading_enabled() {
            return Ok(FillOutcome::Suspended);
        }

        let room = if self.high_watermark == 0 {
            READ_CHUNK_SIZE
        } else {
            self.high_watermark
                .saturating_sub(self.input.len())
                .min(READ_CHUNK_SIZE)
        };
        if room == 0 {
            return Ok(FillOutcome::Suspended);
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = self.stream.read(&mut chunk[..room]).await?;
        if n == 0 {
            return Ok(FillOutcome::Closed);
        }

        self.input.extend_from_slice(&chunk[..n]);
        self.stats.bytes_read += n as u64;
        self.update_reading();

        Ok(FillOutcome::Read(n))
    }

    /// Write all queued output to the transport now
    ///
    /// Output leaves the buffer only once the transport has taken it, so a
    /// failed write keeps the unsent tail queued.
    pub async fn flush(&mut self) -> BufferResult<usize> {
        let total = self.output.len();
        while !self.output.is_empty() {
            let n = self.stream.write(&self.output).await?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
            self.output.advance(n);
            self.stats.bytes_written += n as u64;
        }
        self.stream.flush().await?;

        Ok(total)
    }

    /// Bytes waiting in the output buffer
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    pub fn stream_ref(&self) -> &S {
        &self.stream
    }

    /// Shut down the write side of the transport
    pub async fn shutdown(&mut self) -> BufferResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Transport that hands out `chunk` bytes per read and records writes
    struct MockTransport {
        reads: Arc<AtomicUsize>,
        chunk: usize,
        written: Vec<u8>,
        flushes: usize,
        /// Bytes the transport still accepts before writes fail
        accept: usize,
    }

    impl MockTransport {
        fn new(chunk: usize) -> (Self, Arc<AtomicUsize>) {
            let reads = Arc::new(AtomicUsize::new(0));
            let transport = Self {
                reads: reads.clone(),
                chunk,
                written: Vec::new(),
                flushes: 0,
                accept: usize::MAX,
            };
            (transport, reads)
        }
    }

    impl AsyncRead for MockTransport {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let n = self.chunk.min(buf.remaining());
            buf.put_slice(&vec![0xAB; n]);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockTransport {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            data: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.accept == 0 {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            let n = data.len().min(self.accept);
            self.accept -= n;
            self.written.extend_from_slice(&data[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushes += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_reads_suspend_at_high_watermark() {
        let (transport, reads) = MockTransport::new(8);
        let mut buffers = ConnectionBuffers::new(transport);
        buffers.read_in(4, 16);

        assert_eq!(buffers.fill().await.unwrap(), FillOutcome::Read(8));
        assert_eq!(buffers.fill().await.unwrap(), FillOutcome::Read(8));
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        // 16 bytes buffered: no more reads reach the transport
        for _ in 0..3 {
            assert_eq!(buffers.fill().await.unwrap(), FillOutcome::Suspended);
        }
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        // Above the low watermark, still suspended
        buffers.input().drain(10).unwrap();
        assert_eq!(buffers.fill().await.unwrap(), FillOutcome::Suspended);
        assert_eq!(reads.load(Ordering::SeqCst), 2);

        // At the low watermark, reading resumes
        buffers.input().drain(2).unwrap();
        assert_eq!(buffers.fill().await.unwrap(), FillOutcome::Read(8));
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        assert_eq!(buffers.stats().suspensions, 1);
    }

    #[tokio::test]
    async fn test_read_never_overshoots_high_watermark() {
        let (transport, _reads) = MockTransport::new(100);
        let mut buffers = ConnectionBuffers::new(transport);
        buffers.read_in(0, 10);

        assert_eq!(buffers.fill().await.unwrap(), FillOutcome::Read(10));
        assert_eq!(buffers.input().len(), 10);
        assert!(!buffers.reading_enabled());
    }

    #[tokio::test]
    async fn test_zero_high_watermark_disables_limit() {
        let (transport, reads) = MockTransport::new(READ_CHUNK_SIZE);
        let mut buffers = ConnectionBuffers::new(transport);
        buffers.read_in(0, 0);

        for _ in 0..4 {
            buffers.fill().await.unwrap();
        }
        assert_eq!(reads.load(Ordering::SeqCst), 4);
        assert_eq!(buffers.input().len(), 4 * READ_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_flush_writes_output() {
        let (transport, _reads) = MockTransport::new(1);
        let mut buffers = ConnectionBuffers::new(transport);

        buffers.output().add(b"\x00\x01");
        buffers.output().add(b"\x02");
        assert_eq!(buffers.pending_output(), 3);

        assert_eq!(buffers.flush().await.unwrap(), 3);
        assert_eq!(buffers.pending_output(), 0);
        assert_eq!(buffers.stream_ref().written, vec![0, 1, 2]);
        assert_eq!(buffers.stream_ref().flushes, 1);
        assert_eq!(buffers.stats().bytes_written, 3);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_unsent_output() {
        let (mut transport, _) = MockTransport::new(8);
        transport.accept = 3;
        let mut buffers = ConnectionBuffers::new(transport);

        buffers.output().add(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(buffers.flush().await.is_err());

        assert_eq!(buffers.stream_ref().written, vec![1, 2, 3]);
        assert_eq!(buffers.pending_output(), 5);
        assert_eq!(buffers.stats().bytes_written, 3);
        assert_eq!(buffers.output().content(), &[4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_closed_transport() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);

        let mut buffers = ConnectionBuffers::new(server);
        assert_eq!(buffers.fill().await.unwrap(), FillOutcome::Closed);
    }
}
