//! crossprobe - cross-probe bridge between a report grid and an EDA viewer.
//!
//! ## Modes
//!
//! **Server** (`crossprobe serve`): listens for the tool to dial in, moving up
//! from the configured port while ports are taken.
//!
//! **Client** (`crossprobe connect`): dials a tool that is already listening.
//!
//! In both modes the host application drives the link with JSON lines on
//! stdin and reads one JSON line per request from stdout. Logs go to stderr.
//!
//! **Normalize** (`crossprobe normalize <value>`): show how a cell value is
//! split into hierarchy path and object name.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser as ClapParser, Subcommand};
use crossprobe::{
    config::{self, ConfigError, CrossProbeConfig, Role, ToolName},
    error::ProbeError,
    hier::{self, Delimiter},
    interconnect::{ConnectionStatus, Interconnect, Link, Notification},
    protocol::ObjectKind,
    server::ServerState,
    table::{Dataset, DatasetSource, Row, SelectionEvent},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// crossprobe - keep a schematic or waveform viewer in sync with a report grid
#[derive(ClapParser, Debug)]
#[command(name = "crossprobe", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/crossprobe/config.toml)
    #[arg(long, global = true, env = "CROSSPROBE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for the tool to connect
    Serve {
        #[command(flatten)]
        link: LinkArgs,

        /// Number of consecutive ports to try when the port is taken
        #[arg(long)]
        port_span: Option<u16>,

        /// Keep serving after the tool disconnects
        #[arg(long)]
        multi_session: bool,
    },

    /// Connect to a tool that is listening
    Connect {
        #[command(flatten)]
        link: LinkArgs,

        /// Connect timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Split a cell value into hierarchy path and object name
    Normalize {
        value: String,

        /// Hierarchy delimiter used for the split ("." or "/")
        #[arg(long, default_value = ".")]
        delimiter: Delimiter,

        /// Object kind; instances lose their r/m prefix
        #[arg(long, default_value = "net")]
        kind: ObjectKind,

        /// Tool whose path format to echo
        #[arg(long, default_value = "other")]
        tool: ToolName,
    },
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// Host to bind (serve) or dial (connect)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (serve) or dial (connect)
    #[arg(long)]
    port: Option<u16>,

    /// Tool on the other end: customwaveview, verdi or other
    #[arg(long)]
    tool: Option<ToolName>,

    /// Hierarchy delimiter ("." or "/")
    #[arg(long)]
    delimiter: Option<Delimiter>,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("cross-probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A line of input from the host application.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    /// Replace the table snapshot used for group probing.
    Dataset(Dataset),
    Select {
        rows: Vec<Row>,
        object_kind: Option<ObjectKind>,
        #[serde(default)]
        column: String,
    },
    Manual {
        name: String,
        object_kind: ObjectKind,
    },
    Status,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Response {
    Notification(Notification),
    Status(ConnectionStatus),
    /// The request was handled and there is nothing to report.
    Ok,
    Error { message: String },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Serve { link, port_span, multi_session } => {
            let mut config = load_config(cli.config.as_deref())?;
            link.apply(&mut config);
            config.role = Some(Role::Server);
            if port_span.is_some() {
                config.port_span = port_span;
            }
            if multi_session {
                config.single_session = Some(false);
            }
            run_link(config).await
        }
        Commands::Connect { link, timeout_ms } => {
            let mut config = load_config(cli.config.as_deref())?;
            link.apply(&mut config);
            config.role = Some(Role::Client);
            if timeout_ms.is_some() {
                config.connect_timeout_ms = timeout_ms;
            }
            run_link(config).await
        }
        Commands::Normalize { value, delimiter, kind, tool } => {
            run_normalize(&value, delimiter, kind, tool)
        }
    }
}

/// Logs go to stderr; stdout carries the JSON-lines protocol.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "crossprobe=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<CrossProbeConfig, CliError> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => config::default_config_path(),
    };
    let Some(path) = path else {
        return Ok(CrossProbeConfig::default());
    };
    let loaded = CrossProbeConfig::load(&path)?;
    if loaded.is_some() {
        tracing::debug!(path = %path.display(), "loaded config");
    }
    Ok(loaded.unwrap_or_default())
}

impl LinkArgs {
    fn apply(self, config: &mut CrossProbeConfig) {
        if self.host.is_some() {
            config.host = self.host;
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if self.tool.is_some() {
            config.tool = self.tool;
        }
        if self.delimiter.is_some() {
            config.delimiter = self.delimiter;
        }
    }
}

// ── Link mode ──────────────────────────────────────────────────────

async fn run_link(config: CrossProbeConfig) -> Result<(), CliError> {
    let dataset = Arc::new(parking_lot::RwLock::new(Dataset::default()));
    let interconnect =
        Interconnect::open(&config, dataset.clone() as Arc<dyn DatasetSource>).await?;

    let mut server_state = match interconnect.link() {
        Link::Server(server) => {
            tracing::info!(addr = %server.local_addr(), "waiting for tool to connect");
            Some(server.subscribe_state())
        }
        Link::Client(_) => None,
    };
    print_line(&Response::Status(interconnect.connection_status())).await?;

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = wait_stopped(&mut server_state) => {
                tracing::info!("cross-probe server stopped, exiting");
                break;
            }
        };
        let Some(line) = line else {
            // EOF on stdin
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(&interconnect, &dataset, request).await,
            Err(e) => {
                tracing::warn!(error = %e, "invalid request line");
                Response::Error {
                    message: format!("invalid request: {e}"),
                }
            }
        };
        print_line(&response).await?;
    }

    interconnect.shutdown().await;
    Ok(())
}

async fn handle_request(
    interconnect: &Interconnect,
    dataset: &parking_lot::RwLock<Dataset>,
    request: Request,
) -> Response {
    let outcome = match request {
        Request::Dataset(snapshot) => {
            tracing::debug!(
                rows = snapshot.rows.len(),
                group_by = ?snapshot.group_by,
                "dataset updated"
            );
            *dataset.write() = snapshot;
            None
        }
        Request::Select { rows, object_kind, column } => {
            let event = SelectionEvent {
                rows,
                object_kind,
                column,
                group_by_columns: dataset.read().group_by.clone(),
            };
            interconnect.submit_selection(&event).await
        }
        Request::Manual { name, object_kind } => {
            interconnect.submit_manual(&name, object_kind).await
        }
        Request::Status => return Response::Status(interconnect.connection_status()),
    };
    match outcome {
        Some(notification) => Response::Notification(notification),
        None => Response::Ok,
    }
}

/// Resolves once the server reports `Stopped`; never for client links.
async fn wait_stopped(state: &mut Option<watch::Receiver<ServerState>>) {
    match state {
        Some(rx) => {
            let _ = rx.wait_for(|s| *s == ServerState::Stopped).await;
        }
        None => std::future::pending().await,
    }
}

async fn print_line<T: Serialize>(value: &T) -> Result<(), CliError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

// ── Normalize ──────────────────────────────────────────────────────

fn run_normalize(
    value: &str,
    delimiter: Delimiter,
    kind: ObjectKind,
    tool: ToolName,
) -> Result<(), CliError> {
    let name = hier::normalize(value, delimiter);
    let leaf = hier::strip_instance_prefix(kind, &name.leaf);
    let out = serde_json::json!({
        "path": name.path,
        "leaf": leaf,
        "tool_path": hier::tool_path(tool, &name.path, leaf),
    });
    println!("{out}");
    Ok(())
}
