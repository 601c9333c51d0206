//! Connection handling
//!
//! A `Connection` owns a client's transport through its `ConnectionBuffers`:
//! bytes are read into the input buffer, complete packets are decoded off
//! the front, and responses are encoded into the output buffer and flushed.
//! Workers never touch a connection directly; they talk to it through a
//! cloneable `ConnectionHandle`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use crate::buffer::{BufferError, ConnectionBuffers, FillOutcome};
use crate::protocol::{CodecError, Packet};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,

    #[error("Packet does not fit below the read limit ({buffered} bytes buffered)")]
    ReadLimit { buffered: usize },

    #[error("Send channel closed")]
    SendChannelClosed,

    #[error("Outbound queue full")]
    Overflow,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection identifier, unique for the lifetime of a server
pub type ConnectionId = u64;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, not registered with the workers yet
    Connecting,
    /// Packets flow to the workers
    Connected,
    /// A disconnect has been sent
    Closing,
    Closed,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
}

/// One client's transport, buffers and decoder state
pub struct Connection<S> {
    id: ConnectionId,
    remote_addr: SocketAddr,
    buffers: ConnectionBuffers<S>,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: ConnectionId, stream: S, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            buffers: ConnectionBuffers::new(stream),
            state: ConnectionState::Connecting,
            stats: ConnectionStats::default(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn buffers(&mut self) -> &mut ConnectionBuffers<S> {
        &mut self.buffers
    }

    /// Configure read backpressure, see `ConnectionBuffers::read_in`
    pub fn read_in(&mut self, low: usize, high: usize) {
        self.buffers.read_in(low, high);
    }

    /// Receive the next packet
    ///
    /// Returns `Ok(None)` when the peer closes cleanly between packets.
    pub async fn recv(&mut self) -> ConnectionResult<Option<Packet>> {
        loop {
            if let Some(packet) = Packet::decode(&mut self.buffers.input())? {
                self.stats.packets_received += 1;
                return Ok(Some(packet));
            }

            match self.buffers.fill().await? {
                FillOutcome::Read(_) => {}
                FillOutcome::Suspended => {
                    // Nothing decodes and nothing more may be read
                    return Err(ConnectionError::ReadLimit {
                        buffered: self.buffers.input().len(),
                    });
                }
                FillOutcome::Closed => {
                    return if self.buffers.input().is_empty() {
                        Ok(None)
                    } else {
                        Err(ConnectionError::Closed)
                    };
                }
            }
        }
    }

    /// Queue a packet without flushing
    pub fn queue(&mut self, packet: &Packet) -> ConnectionResult<()> {
        packet.encode(&mut self.buffers.output())?;
        self.stats.packets_sent += 1;
        Ok(())
    }

    /// Queue a packet and flush it right away
    pub async fn send(&mut self, packet: &Packet) -> ConnectionResult<()> {
        self.queue(packet)?;
        self.buffers.flush().await?;
        Ok(())
    }

    /// Send a disconnect and shut the transport down
    pub async fn close(&mut self, reason: &str) -> ConnectionResult<()> {
        tracing::debug!("Closing connection {} ({}): {}", self.id, self.remote_addr, reason);
        if self.state != ConnectionState::Closing {
            self.state = ConnectionState::Closing;
            self.send(&Packet::Disconnect {
                reason: reason.to_string(),
            })
            .await?;
        }

        self.buffers.shutdown().await?;
        self.state = ConnectionState::Closed;
        Ok(())
    }

}

/// A handle for sending packets to a connection
///
/// Sends never wait. A client whose outbound queue is full is too slow to
/// keep up, so it is dropped rather than stalling the worker that sends.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    addr: SocketAddr,
    sender: mpsc::Sender<Packet>,
    connected: Arc<AtomicBool>,
    closed: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::Sender<Packet>) -> Self {
        Self {
            id,
            addr,
            sender,
            connected: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(Notify::new()),
        }
    }

    /// A handle not bound to any transport, with the receiving end of its queue
    #[cfg(test)]
    pub(crate) fn detached(id: ConnectionId) -> (Self, mpsc::Receiver<Packet>) {
        Self::detached_with_capacity(id, 64)
    }

    #[cfg(test)]
    pub(crate) fn detached_with_capacity(
        id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(capacity);
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        (Self::new(id, addr, tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue a packet for this connection
    ///
    /// Fails with `Overflow`, and disconnects the client, if its queue is full.
    pub fn send(&self, packet: Packet) -> ConnectionResult<()> {
        if !self.is_connected() {
            return Err(ConnectionError::Closed);
        }

        match self.sender.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Connection {} is not keeping up, dropping it", self.id);
                self.mark_disconnected();
                Err(ConnectionError::Overflow)
            }
            Err(TrySendError::Closed(_)) => Err(ConnectionError::SendChannelClosed),
        }
    }

    /// Send a disconnect; the connection closes once it has gone out
    pub fn kick(&self, reason: &str) -> ConnectionResult<()> {
        let result = self.send(Packet::Disconnect {
            reason: reason.to_string(),
        });
        self.mark_disconnected();
        result
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
    }

    /// Wait until the connection is marked disconnected
    pub async fn closed(&self) {
        loop {
            let notified = self.closed.notified();
            if !self.is_connected() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 25565))
    }

    fn encode(packet: &Packet) -> Vec<u8> {
        let mut buf = crate::buffer::ByteBuffer::new();
        packet.encode(&mut buf).unwrap();
        buf.content().to_vec()
    }

    #[tokio::test]
    async fn test_recv_across_split_writes() {
        let (client, server) = tokio::io::duplex(64);
        let mut conn = Connection::new(1, server, addr());

        let bytes = encode(&Packet::Handshake {
            username: "notch".to_string(),
        });
        let (head, tail) = bytes.split_at(3);

        let mut client = client;
        client.write_all(head).await.unwrap();
        let writer = tokio::spawn({
            let tail = tail.to_vec();
            async move {
                tokio::task::yield_now().await;
                client.write_all(&tail).await.unwrap();
                client.write_all(&encode(&Packet::KeepAlive)).await.unwrap();
                client
            }
        });

        assert_eq!(
            conn.recv().await.unwrap(),
            Some(Packet::Handshake {
                username: "notch".to_string()
            })
        );
        assert_eq!(conn.recv().await.unwrap(), Some(Packet::KeepAlive));
        assert_eq!(conn.stats().packets_received, 2);

        drop(writer.await.unwrap());
        assert_eq!(conn.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_mid_packet() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut conn = Connection::new(1, server, addr());

        client.write_all(&[0x06, 0x00]).await.unwrap();
        drop(client);

        assert!(matches!(conn.recv().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_packet_hits_read_limit() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut conn = Connection::new(1, server, addr());
        conn.read_in(0, 16);

        let bytes = encode(&Packet::Chat {
            message: "x".repeat(40),
        });
        let writer = tokio::spawn(async move {
            let _ = client.write_all(&bytes).await;
            client
        });

        assert!(matches!(
            conn.recv().await,
            Err(ConnectionError::ReadLimit { buffered: 16 })
        ));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_send_and_close() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut conn = Connection::new(1, server, addr());

        conn.send(&Packet::SpawnPosition { x: 0, y: 64, z: 0 })
            .await
            .unwrap();
        conn.close("Bye").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();

        let mut expected = encode(&Packet::SpawnPosition { x: 0, y: 64, z: 0 });
        expected.extend(encode(&Packet::Disconnect {
            reason: "Bye".to_string(),
        }));
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_handle_after_kick() {
        let (handle, mut rx) = ConnectionHandle::detached(3);

        handle.kick("Server full").unwrap();
        assert!(!handle.is_connected());
        assert_eq!(
            rx.recv().await,
            Some(Packet::Disconnect {
                reason: "Server full".to_string()
            })
        );
        assert!(matches!(
            handle.send(Packet::KeepAlive),
            Err(ConnectionError::Closed)
        ));
        handle.closed().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_client_without_waiting() {
        let (handle, mut rx) = ConnectionHandle::detached_with_capacity(4, 2);
        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.closed().await }
        });

        handle.send(Packet::KeepAlive).unwrap();
        handle.send(Packet::KeepAlive).unwrap();
        assert!(matches!(
            handle.send(Packet::KeepAlive),
            Err(ConnectionError::Overflow)
        ));
        assert!(!handle.is_connected());

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        // What was queued before the overflow is still delivered
        assert_eq!(rx.recv().await, Some(Packet::KeepAlive));
        assert_eq!(rx.recv().await, Some(Packet::KeepAlive));
    }
}
