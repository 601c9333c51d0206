//! Game server reactor
//!
//! Accepts connections and runs one task per client. The task reads and
//! decodes packets, hands each one to the dispatcher as a job, and writes
//! whatever the workers queue on the client's handle.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::connection::{
    Connection, ConnectionError, ConnectionHandle, ConnectionId, ConnectionState,
};
use super::{resolve_host, NetworkConfig};
use crate::job::{Dispatcher, Job};
use crate::map::ConcurrentMap;
use crate::protocol::Packet;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
///
/// Delivery is best effort: events are dropped while the receiver lags.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Started {
        bind_addr: SocketAddr,
    },
    ClientConnected {
        id: ConnectionId,
        addr: SocketAddr,
    },
    ClientDisconnected {
        id: ConnectionId,
        addr: SocketAddr,
        reason: String,
    },
    Stopped,
}

/// State shared by the accept loop and the client tasks
#[derive(Clone)]
struct Shared {
    config: NetworkConfig,
    dispatcher: Arc<Dispatcher>,
    clients: Arc<ConcurrentMap<ConnectionHandle>>,
    event_tx: mpsc::Sender<ServerEvent>,
}

/// Game server
pub struct Server {
    shared: Shared,
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    running: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl Server {
    pub fn new(config: NetworkConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            shared: Shared {
                config,
                dispatcher,
                clients: Arc::new(ConcurrentMap::new()),
                event_tx,
            },
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(AtomicBool::new(false)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Bind and start accepting; returns the bound address
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let config = &self.shared.config;
        let bind_addr = resolve_host(&config.bind, config.port).await?;
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let running = self.running.clone();
        let next_id = self.next_id.clone();

        let _ = shared
            .event_tx
            .try_send(ServerEvent::Started {
                bind_addr: local_addr,
            });

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                if let Err(e) = stream.set_nodelay(true) {
                                    tracing::debug!("Could not disable Nagle for {}: {}", addr, e);
                                }

                                let id = next_id.fetch_add(1, Ordering::Relaxed);
                                tracing::info!("New connection {} from {}", id, addr);

                                let shared = shared.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_client(stream, id, addr, shared).await {
                                        tracing::error!("Client handler error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            let _ = shared.event_tx.try_send(ServerEvent::Stopped);
        });

        Ok(local_addr)
    }

    /// Stop accepting and kick every client
    pub async fn stop(&mut self) -> ServerResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ServerError::NotRunning);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        for client in self.clients() {
            let _ = client.kick("Server shutting down");
        }

        Ok(())
    }

    /// Handles of the connected clients
    pub fn clients(&self) -> Vec<ConnectionHandle> {
        let mut clients = Vec::with_capacity(self.shared.clients.len());
        self.shared.clients.for_each(|_, handle| {
            clients.push(handle);
            ControlFlow::Continue(())
        });
        clients
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Run one client until it disconnects
async fn handle_client<S>(
    stream: S,
    id: ConnectionId,
    addr: SocketAddr,
    shared: Shared,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut conn = Connection::new(id, stream, addr);
    conn.read_in(shared.config.low_watermark, shared.config.high_watermark);

    let (packet_tx, mut packet_rx) = mpsc::channel::<Packet>(shared.config.outbound_queue.max(1));
    let handle = ConnectionHandle::new(id, addr, packet_tx);

    shared.clients.put(id as i64, handle.clone());
    let _ = shared
        .event_tx
        .try_send(ServerEvent::ClientConnected { id, addr });

    let mut disconnect_reason = match shared
        .dispatcher
        .submit(Job::client_connect(handle.clone()))
        .await
    {
        Ok(()) => {
            conn.set_state(ConnectionState::Connected);
            None
        }
        Err(e) => Some(format!("Dispatch error: {}", e)),
    };

    while disconnect_reason.is_none() {
        tokio::select! {
            result = conn.recv() => {
                disconnect_reason = match result {
                    Ok(Some(Packet::Disconnect { reason })) => Some(reason),
                    Ok(Some(packet)) => {
                        let job = Job::client_process(handle.clone(), packet);
                        submit_writing(&mut conn, &shared.dispatcher, job, &handle, &mut packet_rx)
                            .await
                    }
                    Ok(None) => Some("Connection closed".to_string()),
                    Err(e) => Some(format!("Error: {}", e)),
                };
            }

            Some(packet) = packet_rx.recv() => {
                disconnect_reason = write_batch(&mut conn, packet, &mut packet_rx).await;
            }

            _ = handle.closed() => {
                disconnect_reason = Some(write_remaining(&mut conn, &mut packet_rx).await);
            }
        }
    }
    let disconnect_reason = disconnect_reason.unwrap_or_default();

    handle.mark_disconnected();
    shared.clients.delete(id as i64);

    // Queued after every packet job of this connection, on the same worker
    if let Err(e) = shared.dispatcher.submit(Job::client_disconnect(handle)).await {
        tracing::warn!("Could not report disconnect of {}: {}", id, e);
    }

    tracing::info!("Connection {} ({}) closed: {}", id, addr, disconnect_reason);
    let _ = shared
        .event_tx
        .try_send(ServerEvent::ClientDisconnected {
            id,
            addr,
            reason: disconnect_reason.clone(),
        });

    let _ = conn.close(&disconnect_reason).await;
    Ok(())
}

/// Hand a job to the workers while still writing what they queue
///
/// The worker this job waits for may be the one filling `pending`, so the
/// queue keeps draining until the job is accepted.
async fn submit_writing<S>(
    conn: &mut Connection<S>,
    dispatcher: &Dispatcher,
    job: Job,
    handle: &ConnectionHandle,
    pending: &mut mpsc::Receiver<Packet>,
) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let submit = dispatcher.submit(job);
    tokio::pin!(submit);

    loop {
        tokio::select! {
            result = &mut submit => {
                return result.err().map(|e| format!("Dispatch error: {}", e));
            }

            Some(packet) = pending.recv() => {
                if let Some(reason) = write_batch(conn, packet, pending).await {
                    return Some(reason);
                }
            }

            _ = handle.closed() => {
                return Some(write_remaining(conn, pending).await);
            }
        }
    }
}

/// Flush whatever is still queued for a client that was dropped or kicked
async fn write_remaining<S>(
    conn: &mut Connection<S>,
    pending: &mut mpsc::Receiver<Packet>,
) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match pending.try_recv() {
        Ok(packet) => write_batch(conn, packet, pending)
            .await
            .unwrap_or_else(|| "Outbound queue overflow".to_string()),
        Err(_) => "Outbound queue overflow".to_string(),
    }
}

/// Write `first` and anything else already waiting, then flush once
///
/// Returns a disconnect reason if the connection should end.
async fn write_batch<S>(
    conn: &mut Connection<S>,
    first: Packet,
    pending: &mut mpsc::Receiver<Packet>,
) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut next = Some(first);
    let mut kicked = None;

    while let Some(packet) = next.take() {
        if let Packet::Disconnect { reason } = &packet {
            conn.set_state(ConnectionState::Closing);
            kicked = Some(format!("Kicked: {}", reason));
        }
        if let Err(e) = conn.queue(&packet) {
            return Some(format!("Encode error: {}", e));
        }
        if kicked.is_some() {
            break;
        }
        next = pending.try_recv().ok();
    }

    if let Err(e) = conn.buffers().flush().await {
        return Some(format!("Send error: {}", e));
    }
    kicked
}
