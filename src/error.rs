use std::io;
use std::net::SocketAddr;

/// Failures surfaced by the cross-probe core.
///
/// Socket errors are converted into these variants at the connection
/// boundary; none of them is fatal to the host application.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send cross-probe command: {0}")]
    SendFailed(#[source] io::Error),

    #[error("no free port in {first}..={last}")]
    BindExhausted { first: u16, last: u16 },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("select 'net/instance' and a column to crossprobe")]
    MissingSelectionCriteria,

    #[error("nothing selected to crossprobe")]
    EmptySelection,

    #[error("tool peer {0} disconnected")]
    PeerDisconnected(SocketAddr),

    #[error("cross-probe link is not connected")]
    NotConnected,
}

impl ProbeError {
    /// Errors the caller recovers from locally without telling the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::EmptySelection)
    }
}
