//! Controller server: accept loop and per-connection role dispatch

use crate::common::protocol::parse_join;
use crate::common::{ControllerConfig, Error, ErrorCode, Response, Result};
use crate::controller::outbox::Outbox;
use crate::controller::rebalance::spawn_rebalancer;
use crate::controller::state::ControllerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};

pub struct Controller {
    state: Arc<ControllerState>,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            state: ControllerState::new(config),
        }
    }

    pub fn state(&self) -> Arc<ControllerState> {
        self.state.clone()
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let config = &self.state.config;
        tracing::info!("Starting controller on {}", listener.local_addr()?);
        tracing::info!("  Replicas: {}", config.replication_factor);
        tracing::info!("  Timeout: {:?}", config.timeout());
        tracing::info!("  Rebalance period: {:?}", config.rebalance_period());

        let rebalancer = spawn_rebalancer(self.state.clone());
        let _guard = AbortOnDrop(rebalancer);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    continue;
                }
            };
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(state, stream, peer).await {
                    tracing::warn!("Connection {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One line read off a connection, with the newline stripped.
enum Line {
    Text(String),
    /// Not valid UTF-8
    Unreadable(Vec<u8>),
}

/// Newline-delimited reader that survives lines that are not UTF-8.
struct LineReader {
    reader: BufReader<OwnedReadHalf>,
    buf: Vec<u8>,
}

impl LineReader {
    fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next line, or `None` at end of stream.
    async fn next_line(&mut self) -> Result<Option<Line>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        let raw = std::mem::take(&mut self.buf);
        Ok(Some(match String::from_utf8(raw) {
            Ok(text) => Line::Text(text),
            Err(e) => Line::Unreadable(e.into_bytes()),
        }))
    }
}

async fn handle_connection(
    state: Arc<ControllerState>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let outbox = Outbox::spawn(peer, writer);
    let mut lines = LineReader::new(reader);

    let Some(first) = lines.next_line().await? else {
        tracing::debug!("Connection {} closed before identifying", peer);
        return Ok(());
    };

    let join = match &first {
        Line::Text(text) => parse_join(text),
        Line::Unreadable(_) => None,
    };
    match join {
        Some(listen_port) => serve_node(&state, peer, listen_port, outbox, lines).await,
        None => serve_client(&state, peer, outbox, first, lines).await,
    }
}

async fn serve_node(
    state: &Arc<ControllerState>,
    peer: SocketAddr,
    listen_port: u16,
    outbox: Outbox,
    mut lines: LineReader,
) -> Result<()> {
    state.nodes.register(peer, listen_port, outbox.clone());
    outbox.send(&Response::JoinAck);

    let result = async {
        while let Some(line) = lines.next_line().await? {
            match line {
                Line::Text(text) => state.handle_node_line(peer, &text),
                Line::Unreadable(raw) => state.reject_node_line(peer, &raw),
            }
        }
        Ok::<(), Error>(())
    }
    .await;

    state.deregister_node(&peer);
    result
}

async fn serve_client(
    state: &Arc<ControllerState>,
    peer: SocketAddr,
    outbox: Outbox,
    first: Line,
    mut lines: LineReader,
) -> Result<()> {
    state.clients.register(peer, outbox.clone());

    let result = async {
        let mut line = first;
        loop {
            let response = match line {
                Line::Text(text) => state.handle_client_line(peer, &text),
                Line::Unreadable(raw) => {
                    tracing::debug!(
                        "Unreadable request from {}: {}",
                        peer,
                        String::from_utf8_lossy(&raw)
                    );
                    Some(Response::Error(ErrorCode::MalformedCommand))
                }
            };
            if let Some(response) = response {
                outbox.send(&response);
            }
            match lines.next_line().await? {
                Some(next) => line = next,
                None => break,
            }
        }
        Ok::<(), Error>(())
    }
    .await;

    state.deregister_client(&peer);
    result
}
