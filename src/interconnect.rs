//! The cross-probe interconnect: what the host application talks to.
//!
//! Owns one link (client or server role) and the scope state that belongs to
//! it. Every request ends in at most one user notification; socket failures
//! are reported, never propagated.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::aggregate::{self, MessagePlan};
use crate::client::ProbeClient;
use crate::config::{CrossProbeConfig, Role, ToolName};
use crate::error::ProbeError;
use crate::hier::Delimiter;
use crate::protocol::ObjectKind;
use crate::scope::ScopeState;
use crate::server::{ProbeServer, SendOutcome, ServerPolicy};
use crate::table::{DatasetSource, SelectionEvent};

/// The socket side of the interconnect.
pub enum Link {
    Client(ProbeClient),
    Server(ProbeServer),
}

impl Link {
    pub fn role(&self) -> Role {
        match self {
            Self::Client(_) => Role::Client,
            Self::Server(_) => Role::Server,
        }
    }

    /// Open the link the config asks for.
    pub async fn open(config: &CrossProbeConfig) -> Result<Self, ProbeError> {
        let endpoint = config.endpoint();
        match config.role.unwrap_or_default() {
            Role::Client => {
                let client = ProbeClient::connect(&endpoint, config.connect_timeout()).await?;
                Ok(Self::Client(client))
            }
            Role::Server => {
                let defaults = ServerPolicy::default();
                let policy = ServerPolicy {
                    port_span: config.port_span.unwrap_or(defaults.port_span),
                    single_session: config.single_session.unwrap_or(defaults.single_session),
                };
                let server = ProbeServer::start(&endpoint, policy).await?;
                Ok(Self::Server(server))
            }
        }
    }

    /// Identifies the tool on the other end; changes when a server switches
    /// peers. A client only ever talks to one tool.
    fn peer_generation(&self) -> u64 {
        match self {
            Self::Client(_) => 0,
            Self::Server(server) => server.peer_generation(),
        }
    }

    /// Returns false when there was nobody to send to.
    async fn transmit(&self, text: &str) -> Result<bool, ProbeError> {
        match self {
            Self::Client(client) => client.send(text).await.map(|()| true),
            Self::Server(server) => server
                .send_command(text)
                .await
                .map(|outcome| outcome == SendOutcome::Sent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

/// One-shot message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    /// Command text that was sent or attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Full object path as the tool names it (net probes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_path: Option<String>,
}

impl Notification {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message: message.into(),
            command: None,
            tool_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub role: Role,
    /// A client is connected, or a server has a tool peer.
    pub connected: bool,
    pub tool_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_addr: Option<SocketAddr>,
}

/// Scope as seen by one particular tool peer.
struct PeerScope {
    generation: u64,
    state: ScopeState,
}

pub struct Interconnect {
    link: Link,
    tool: ToolName,
    delimiter: Delimiter,
    scope: Mutex<PeerScope>,
    dataset: Arc<dyn DatasetSource>,
}

impl Interconnect {
    pub fn new(
        link: Link,
        tool: ToolName,
        delimiter: Delimiter,
        dataset: Arc<dyn DatasetSource>,
    ) -> Self {
        let scope = PeerScope {
            generation: link.peer_generation(),
            state: ScopeState::new(),
        };
        Self {
            link,
            tool,
            delimiter,
            scope: Mutex::new(scope),
            dataset,
        }
    }

    /// Open the configured link and wrap it.
    pub async fn open(
        config: &CrossProbeConfig,
        dataset: Arc<dyn DatasetSource>,
    ) -> Result<Self, ProbeError> {
        let link = Link::open(config).await?;
        Ok(Self::new(
            link,
            config.tool(),
            config.delimiter.unwrap_or_default(),
            dataset,
        ))
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn current_scope(&self) -> String {
        self.synced_scope().state.current().to_string()
    }

    /// Probe the objects behind a grid selection.
    ///
    /// Returns `None` when there is nothing to tell the user: an empty cell
    /// was clicked, or no tool is connected to the server yet.
    pub async fn submit_selection(&self, event: &SelectionEvent) -> Option<Notification> {
        let dataset = self.dataset.snapshot();
        let (planned, generation) = {
            let scope = self.synced_scope();
            let plan = aggregate::build_message(event, &dataset, &scope.state, self.delimiter);
            (plan, scope.generation)
        };
        match planned {
            Ok(plan) => self.deliver(plan, generation).await,
            Err(e) => self.reject(e),
        }
    }

    /// Probe a name typed in by the user.
    pub async fn submit_manual(&self, name: &str, kind: ObjectKind) -> Option<Notification> {
        match aggregate::build_manual(name, kind, self.delimiter) {
            Ok(plan) => self.deliver(plan, self.link.peer_generation()).await,
            Err(e) => self.reject(e),
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        match &self.link {
            Link::Client(client) => ConnectionStatus {
                role: Role::Client,
                connected: client.is_connected(),
                tool_ready: client.is_connected(),
                local_addr: None,
                peer_addr: Some(client.peer_addr()),
            },
            Link::Server(server) => ConnectionStatus {
                role: Role::Server,
                connected: server.is_running() && server.has_peer(),
                tool_ready: server.tool_ready(),
                local_addr: Some(server.local_addr()),
                peer_addr: None,
            },
        }
    }

    pub async fn shutdown(&self) {
        match &self.link {
            Link::Client(client) => client.close().await,
            Link::Server(server) => server.stop().await,
        }
    }

    /// Scope state for the current peer; forgotten when the peer changed.
    fn synced_scope(&self) -> MutexGuard<'_, PeerScope> {
        let generation = self.link.peer_generation();
        let mut scope = self.scope.lock();
        if scope.generation != generation {
            tracing::debug!(scope = scope.state.current(), "tool peer changed, resetting scope");
            scope.state.reset();
            scope.generation = generation;
        }
        scope
    }

    async fn deliver(&self, plan: MessagePlan, generation: u64) -> Option<Notification> {
        let command = plan.text.trim_end().to_string();
        let tool_path = plan.command.tool_path(self.tool);

        match self.link.transmit(&plan.text).await {
            Ok(true) => {
                if let Some(update) = plan.scope_update {
                    let mut scope = self.synced_scope();
                    // A different tool may have taken over while sending.
                    if scope.generation == generation {
                        scope.state.commit(update);
                    }
                }
                tracing::info!(%command, "cross-probe command sent");
                Some(Notification {
                    level: NotificationLevel::Success,
                    message: format!("CP command: {command}"),
                    command: Some(command),
                    tool_path,
                })
            }
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(%command, error = %e, "cross-probe send failed");
                Some(Notification {
                    level: NotificationLevel::Error,
                    message: e.to_string(),
                    command: Some(command),
                    tool_path: None,
                })
            }
        }
    }

    fn reject(&self, err: ProbeError) -> Option<Notification> {
        if err.is_silent() {
            tracing::debug!(%err, "nothing to crossprobe");
            return None;
        }
        tracing::warn!(%err, "cross-probe request rejected");
        Some(Notification::warning(err.to_string()))
    }
}
