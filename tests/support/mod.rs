//! Shared helpers: a controller on an ephemeral port plus scripted peers

#![allow(dead_code)]

use minifs::controller::ControllerState;
use minifs::{Config, Controller};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestController {
    pub addr: SocketAddr,
    pub state: Arc<ControllerState>,
    handle: JoinHandle<()>,
}

impl Drop for TestController {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn start(replicas: usize, timeout_ms: u64, rebalance_period_secs: u64) -> TestController {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let controller = Controller::new(Config {
        bind_addr: addr,
        replication_factor: replicas,
        timeout_ms,
        rebalance_period_secs,
        ..Default::default()
    });
    let state = controller.state();
    let handle = tokio::spawn(async move {
        let _ = controller.serve_on(listener).await;
    });
    TestController { addr, state, handle }
}

/// Poll until `check` holds or the wait runs out.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// One raw line-protocol connection.
pub struct Peer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    pub local: SocketAddr,
}

impl Peer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let local = stream.local_addr().unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
            local,
        }
    }

    /// Connect as a storage node advertising `listen_port`.
    pub async fn join(addr: SocketAddr, listen_port: u16) -> Self {
        let mut node = Self::connect(addr).await;
        node.send(&format!("JOIN {}", listen_port)).await;
        assert_eq!(node.recv().await, "JOIN_ACK");
        node
    }

    pub async fn send(&mut self, line: &str) {
        self.send_bytes(line.as_bytes()).await;
    }

    /// Send one line that need not be UTF-8.
    pub async fn send_bytes(&mut self, line: &[u8]) {
        self.writer.write_all(line).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn recv(&mut self) -> String {
        self.recv_within(WAIT).await.expect("no line from controller")
    }

    pub async fn recv_within(&mut self, wait: Duration) -> Option<String> {
        match tokio::time::timeout(wait, self.lines.next_line()).await {
            Ok(line) => line.unwrap(),
            Err(_) => None,
        }
    }

    /// Wait for the next `LIST` probe, skipping other commands, and answer it.
    pub async fn answer_list(&mut self, files: &[&str]) {
        loop {
            if self.recv().await == "LIST" {
                break;
            }
        }
        let mut reply = String::from("LIST");
        for file in files {
            reply.push(' ');
            reply.push_str(file);
        }
        self.send(&reply).await;
    }
}
