//! TCP server role: the tool dials in and receives cross-probe commands.
//!
//! The server binds its configured port, moving up on `AddrInUse`, and
//! accepts tool connections. Each peer gets its own read task which watches
//! for the tool's liveness marker. Commands go to the most recently accepted
//! live peer.
//!
//! In single-session mode (the default) the server is tied to its one tool
//! session: when a peer disconnects the whole server stops.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{EndpointConfig, DEFAULT_PORT_SPAN};
use crate::error::ProbeError;
use crate::protocol::Inbound;

/// Size of a single read from a tool peer.
const READ_CHUNK: usize = 1024;

/// Lifecycle of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Binding,
    Listening,
    Accepting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPolicy {
    /// Number of consecutive ports tried, starting at the configured one.
    pub port_span: u16,
    /// Stop the server when a tool peer disconnects.
    pub single_session: bool,
}

impl Default for ServerPolicy {
    fn default() -> Self {
        Self {
            port_span: DEFAULT_PORT_SPAN,
            single_session: true,
        }
    }
}

/// Result of handing a command to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No tool is connected yet; nothing was sent.
    NoPeer,
}

type PeerWriter = Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>;

struct Peer {
    addr: SocketAddr,
    /// `None` once the socket has been closed.
    writer: PeerWriter,
    /// The tool has sent its readiness marker.
    ready: bool,
}

#[derive(Default)]
struct PeerSet {
    peers: HashMap<u64, Peer>,
    /// Peer that receives commands.
    current: Option<u64>,
    /// Bumped every time `current` changes.
    generation: u64,
}

impl PeerSet {
    fn set_current(&mut self, id: Option<u64>) {
        if self.current != id {
            self.current = id;
            self.generation += 1;
        }
    }
}

struct Inner {
    local_addr: SocketAddr,
    policy: ServerPolicy,
    running: AtomicBool,
    next_peer_id: AtomicU64,
    peers: Mutex<PeerSet>,
    state_tx: watch::Sender<ServerState>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// A running cross-probe server. Cheap to clone.
#[derive(Clone)]
pub struct ProbeServer {
    inner: Arc<Inner>,
}

impl ProbeServer {
    /// Bind the first free port from `config.port` and start accepting.
    pub async fn start(config: &EndpointConfig, policy: ServerPolicy) -> Result<Self, ProbeError> {
        let (state_tx, _) = watch::channel(ServerState::Idle);
        state_tx.send_replace(ServerState::Binding);

        let listener = bind_with_retry(&config.host, config.port, policy.port_span).await?;
        let local_addr = listener.local_addr().map_err(|source| ProbeError::Bind {
            addr: config.address(),
            source,
        })?;
        state_tx.send_replace(ServerState::Listening);
        tracing::info!(addr = %local_addr, tool = %config.tool, "cross-probe server started");

        let inner = Arc::new(Inner {
            local_addr,
            policy,
            running: AtomicBool::new(true),
            next_peer_id: AtomicU64::new(0),
            peers: Mutex::new(PeerSet::default()),
            state_tx,
            cancel: CancellationToken::new(),
            accept_task: Mutex::new(None),
        });

        let task = tokio::spawn(accept_loop(inner.clone(), listener));
        *inner.accept_task.lock() = Some(task);
        inner.state_tx.send_replace(ServerState::Accepting);

        Ok(Self { inner })
    }

    /// Address actually bound, which may differ from the configured port.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether the current tool peer has announced it is ready.
    pub fn tool_ready(&self) -> bool {
        let set = self.inner.peers.lock();
        set.current
            .and_then(|id| set.peers.get(&id))
            .is_some_and(|peer| peer.ready)
    }

    /// Changes whenever commands start going to a different peer, including
    /// to no peer at all.
    pub fn peer_generation(&self) -> u64 {
        self.inner.peers.lock().generation
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().peers.len()
    }

    pub fn has_peer(&self) -> bool {
        self.inner.peers.lock().current.is_some()
    }

    /// Send a command line to the current tool peer.
    ///
    /// Returns [`SendOutcome::NoPeer`] when no tool is connected; a write to a
    /// peer that was closed concurrently fails with `SendFailed`.
    pub async fn send_command(&self, text: &str) -> Result<SendOutcome, ProbeError> {
        let target = {
            let set = self.inner.peers.lock();
            set.current
                .and_then(|id| set.peers.get(&id))
                .map(|peer| (peer.addr, peer.writer.clone()))
        };
        let Some((addr, writer)) = target else {
            tracing::debug!("no cross-probe tool connected, dropping command");
            return Ok(SendOutcome::NoPeer);
        };

        let mut guard = writer.lock().await;
        let stream = guard.as_mut().ok_or(ProbeError::NotConnected)?;
        if let Err(e) = write_line(stream, text).await {
            tracing::error!(
                peer = %addr,
                error = %e,
                command = text.trim_end(),
                "failed to send cross-probe command"
            );
            return Err(ProbeError::SendFailed(e));
        }
        tracing::debug!(peer = %addr, command = text.trim_end(), "sent cross-probe command");
        Ok(SendOutcome::Sent)
    }

    /// Stop accepting, close every peer and the listening socket.
    pub async fn stop(&self) {
        self.inner.shutdown().await;
    }
}

async fn write_line(stream: &mut OwnedWriteHalf, text: &str) -> io::Result<()> {
    stream.write_all(text.as_bytes()).await?;
    stream.flush().await
}

/// Ports tried for `port` and `span`, clamped at the top of the port space.
fn port_range(port: u16, span: u16) -> RangeInclusive<u16> {
    port..=port.saturating_add(span.max(1) - 1)
}

/// Bind `port`, moving to the next port while the address is in use.
async fn bind_with_retry(host: &str, port: u16, span: u16) -> Result<TcpListener, ProbeError> {
    let range = port_range(port, span);
    let last = *range.end();
    for candidate in range {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                tracing::debug!(port = candidate, "port in use, trying next");
            }
            Err(source) => {
                tracing::error!(host, port = candidate, error = %source, "unexpected bind error");
                return Err(ProbeError::Bind {
                    addr: format!("{host}:{candidate}"),
                    source,
                });
            }
        }
    }
    tracing::error!(first = port, last, "no free port for cross-probe server");
    Err(ProbeError::BindExhausted { first: port, last })
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => {
                tracing::debug!("cross-probe server received cancel signal, stopping accept loop");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => inner.register(stream, addr),
                    Err(e) => {
                        tracing::error!(?e, "failed to accept cross-probe connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
}

impl Inner {
    fn register(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_peer_id.fetch_add(1, Ordering::SeqCst);
        let (reader, writer) = stream.into_split();
        {
            let mut set = self.peers.lock();
            set.peers.insert(
                id,
                Peer {
                    addr,
                    writer: Arc::new(tokio::sync::Mutex::new(Some(writer))),
                    ready: false,
                },
            );
            set.set_current(Some(id));
        }
        tracing::info!(peer = %addr, "cross-probe tool connected");

        let inner = self.clone();
        tokio::spawn(async move { inner.handle_peer(id, addr, reader).await });
    }

    async fn handle_peer(self: Arc<Self>, id: u64, addr: SocketAddr, mut reader: OwnedReadHalf) {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let reason = loop {
            buf.reserve(READ_CHUNK);
            tokio::select! {
                _ = self.cancel.cancelled() => break "server stopped",
                result = reader.read_buf(&mut buf) => match result {
                    Ok(0) => break "peer closed",
                    Ok(_) => self.on_inbound(id, addr, buf.split().freeze()),
                    Err(e) => {
                        tracing::debug!(peer = %addr, ?e, "read from tool failed");
                        break "read error";
                    }
                },
            }
        };

        self.remove_peer(id).await;
        tracing::info!(peer = %addr, reason, "cross-probe connection closed");

        if self.policy.single_session && self.running.load(Ordering::SeqCst) {
            let err = ProbeError::PeerDisconnected(addr);
            tracing::warn!(%err, "single-session server shutting down");
            self.shutdown().await;
        }
    }

    fn on_inbound(&self, id: u64, addr: SocketAddr, chunk: Bytes) {
        let text = String::from_utf8_lossy(&chunk);
        tracing::info!(peer = %addr, data = %text.trim_end(), "received from tool");
        match Inbound::classify(&text) {
            Inbound::ToolReady => {
                if let Some(peer) = self.peers.lock().peers.get_mut(&id) {
                    peer.ready = true;
                }
                tracing::info!(peer = %addr, "tool ready for cross-probing");
            }
            Inbound::Other(_) => {
                tracing::debug!(peer = %addr, "ignoring tool message");
            }
        }
    }

    /// Drop a peer from the set and close its socket.
    async fn remove_peer(&self, id: u64) {
        let peer = {
            let mut set = self.peers.lock();
            let peer = set.peers.remove(&id);
            if set.current == Some(id) {
                // Fall back to the most recently accepted live peer.
                let fallback = set.peers.keys().max().copied();
                set.set_current(fallback);
            }
            peer
        };
        if let Some(peer) = peer {
            close_writer(&peer.writer).await;
        }
    }

    async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(addr = %self.local_addr, "stopping cross-probe server");
        self.cancel.cancel();

        let peers: Vec<Peer> = {
            let mut set = self.peers.lock();
            set.set_current(None);
            set.peers.drain().map(|(_, peer)| peer).collect()
        };
        for peer in peers {
            close_writer(&peer.writer).await;
        }

        // The accept loop owns the listener; joining it closes the socket.
        let accept = self.accept_task.lock().take();
        if let Some(task) = accept {
            if let Err(e) = task.await {
                tracing::debug!(?e, "accept loop ended abnormally");
            }
        }
        self.state_tx.send_replace(ServerState::Stopped);
        tracing::info!(addr = %self.local_addr, "cross-probe server stopped");
    }
}

async fn close_writer(writer: &PeerWriter) {
    if let Some(mut stream) = writer.lock().await.take() {
        // Best effort; the peer may already be gone.
        let _ = stream.shutdown().await;
    }
}
