//! TCP client role: dial a tool that listens for cross-probe commands.
//!
//! The client owns exactly one socket for its whole life. A failed connect is
//! not retried; the caller decides whether to show the feature as disabled.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::config::EndpointConfig;
use crate::error::ProbeError;

/// Lifecycle of a client link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Closing,
    Closed,
}

/// A client connection to a tool's cross-probe port.
pub struct ProbeClient {
    peer_addr: SocketAddr,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
    state: Mutex<ClientState>,
}

impl ProbeClient {
    /// Connect to the tool, giving up after `timeout`.
    pub async fn connect(config: &EndpointConfig, timeout: Duration) -> Result<Self, ProbeError> {
        let addr = config.address();
        tracing::debug!(%addr, ?timeout, "connecting to cross-probe tool");

        let connect = TcpStream::connect((config.host.as_str(), config.port));
        let stream = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                tracing::error!(%addr, error = %source, "failed to connect to cross-probe tool");
                return Err(ProbeError::ConnectFailed { addr, source });
            }
            Err(_) => {
                tracing::error!(%addr, ?timeout, "cross-probe connect timed out");
                return Err(ProbeError::ConnectFailed {
                    addr,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(?e, "failed to set TCP_NODELAY");
        }
        let peer_addr = stream
            .peer_addr()
            .map_err(|source| ProbeError::ConnectFailed {
                addr: addr.clone(),
                source,
            })?;

        tracing::info!(peer = %peer_addr, tool = %config.tool, "connected to cross-probe tool");
        Ok(Self {
            peer_addr,
            stream: tokio::sync::Mutex::new(Some(stream)),
            state: Mutex::new(ClientState::Connected),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Write a command line to the tool.
    ///
    /// The link stays open after a failed write so the next event can retry.
    pub async fn send(&self, text: &str) -> Result<(), ProbeError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(ProbeError::NotConnected)?;

        stream
            .write_all(text.as_bytes())
            .await
            .map_err(ProbeError::SendFailed)?;
        stream.flush().await.map_err(ProbeError::SendFailed)?;

        tracing::debug!(
            peer = %self.peer_addr,
            command = text.trim_end(),
            "sent cross-probe command"
        );
        Ok(())
    }

    /// Close the socket. Errors are logged, never returned.
    pub async fn close(&self) {
        *self.state.lock() = ClientState::Closing;
        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(peer = %self.peer_addr, ?e, "error closing cross-probe connection");
            }
        }
        *self.state.lock() = ClientState::Closed;
        tracing::info!(peer = %self.peer_addr, "cross-probe connection closed");
    }
}
