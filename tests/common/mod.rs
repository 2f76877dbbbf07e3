#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crossprobe::config::{EndpointConfig, ToolName};
use crossprobe::server::{ProbeServer, ServerPolicy, ServerState};
use crossprobe::table::{CellValue, Dataset, DatasetSource, Row};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Loopback endpoint on `port` (0 picks a free port).
pub fn loopback(port: u16) -> EndpointConfig {
    EndpointConfig {
        host: "127.0.0.1".to_string(),
        port,
        tool: ToolName::Other,
    }
}

/// Start a server on a free loopback port.
pub async fn start_server(policy: ServerPolicy) -> ProbeServer {
    ProbeServer::start(&loopback(0), policy)
        .await
        .expect("server should start")
}

/// Poll `check` until it returns true or the timeout expires.
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !check() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

pub async fn wait_for_state(server: &ProbeServer, state: ServerState) {
    let mut rx = server.subscribe_state();
    tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
        .expect("state channel closed");
}

/// Connect a fake tool to the server and wait until it is registered.
pub async fn attach_tool(server: &ProbeServer) -> TcpStream {
    let before = server.peer_count();
    let tool = TcpStream::connect(server.local_addr())
        .await
        .expect("tool should connect");
    wait_until("peer registration", || server.peer_count() > before).await;
    tool
}

/// Read one newline-terminated command from a fake tool socket.
pub async fn read_command(tool: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            let n = tool.read(&mut byte).await.expect("read from server");
            assert!(n > 0, "server closed before a full command arrived");
            out.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
    })
    .await
    .expect("timed out reading command");
    String::from_utf8(out).expect("command should be utf-8")
}

pub fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), CellValue::from(*v)))
        .collect()
}

pub fn shared_dataset(rows: Vec<Row>, group_by: &[&str]) -> Arc<parking_lot::RwLock<Dataset>> {
    Arc::new(parking_lot::RwLock::new(Dataset {
        rows,
        group_by: group_by.iter().map(|c| c.to_string()).collect(),
    }))
}

pub fn as_source(dataset: &Arc<parking_lot::RwLock<Dataset>>) -> Arc<dyn DatasetSource> {
    dataset.clone()
}
