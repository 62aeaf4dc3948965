//! The `Transport` seam that stands in for the WiFi driver (§6): a
//! `TcpStream`-backed production implementation plus an in-memory mock used
//! throughout the test suite (§10.5) so S1-S6 are assertable without a real
//! socket.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// One half of a duplex byte stream between this node and a peer. Mirrors
/// the non-blocking read/write contract of §5: `read` returns whatever is
/// currently available (possibly zero bytes on a mock with nothing queued),
/// `write` enqueues and may complete a partial write.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read whatever bytes are currently available, blocking only until at
    /// least one byte arrives or the peer closes (`Ok(0)`).
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write bytes, blocking until the full buffer has been accepted by the
    /// underlying stream.
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    /// Tear down the transport. Idempotent.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

/// Read half of a [`Transport`] split in two, so a connection's reader and
/// writer can each run on their own task without sharing a lock.
#[async_trait]
pub trait TransportReader: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Write half of a [`Transport`] split in two. See [`TransportReader`].
#[async_trait]
pub trait TransportWriter: Send {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

/// Production transport: a live `TcpStream`.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Split into independent read/write halves backed by the same socket,
    /// via `TcpStream::into_split`.
    pub fn split(self) -> (TcpReadHalf, TcpWriteHalf) {
        let (read_half, write_half) = self.stream.into_split();
        (TcpReadHalf { half: read_half }, TcpWriteHalf { half: write_half })
    }
}

pub struct TcpReadHalf {
    half: tokio::net::tcp::OwnedReadHalf,
}

#[async_trait]
impl TransportReader for TcpReadHalf {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.half.read(buf).await?)
    }
}

pub struct TcpWriteHalf {
    half: tokio::net::tcp::OwnedWriteHalf,
}

#[async_trait]
impl TransportWriter for TcpWriteHalf {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.half.write_all(buf).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.half.shutdown().await.map_err(TransportError::Io).or(Ok(()))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.stream.read(buf).await?)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(buf).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        use tokio::io::AsyncWriteExt as _;
        self.stream
            .shutdown()
            .await
            .map_err(TransportError::Io)
            .or(Ok(()))
    }
}

/// In-memory duplex transport for tests: bytes written on one end arrive on
/// the other's `read`. `MockTransport::pair()` builds both ends at once.
pub struct MockTransport {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl MockTransport {
    /// Build a connected pair: writes to `a` are readable from `b` and vice
    /// versa, matching two ends of one TCP socket.
    pub fn pair() -> (MockTransport, MockTransport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MockTransport {
                tx: Some(a_tx),
                rx: a_rx,
                pending: Vec::new(),
            },
            MockTransport {
                tx: Some(b_tx),
                rx: b_rx,
                pending: Vec::new(),
            },
        )
    }

    /// Split into independent halves for tests that exercise the split
    /// reader/writer task pair instead of a single `Transport`.
    pub fn split(self) -> (MockReadHalf, MockWriteHalf) {
        (
            MockReadHalf { rx: self.rx, pending: self.pending },
            MockWriteHalf { tx: self.tx },
        )
    }
}

pub struct MockReadHalf {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

#[async_trait]
impl TransportReader for MockReadHalf {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

pub struct MockWriteHalf {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl TransportWriter for MockWriteHalf {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(buf.to_vec()).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            match self.rx.recv().await {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(buf.to_vec()).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_pair_roundtrips_bytes() {
        let (mut a, mut b) = MockTransport::pair();
        a.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn mock_reads_partial_chunks_in_order() {
        let (mut a, mut b) = MockTransport::pair();
        a.write_all(b"one").await.unwrap();
        a.write_all(b"two").await.unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(b.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"one");
        assert_eq!(b.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"two");
    }

    #[tokio::test]
    async fn shutdown_closes_the_write_side() {
        let (mut a, mut b) = MockTransport::pair();
        a.shutdown().await.unwrap();
        assert!(a.write_all(b"x").await.is_err());
        // The read side observes end-of-stream once the channel drains.
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf).await.unwrap(), 0);
    }
}
