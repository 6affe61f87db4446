//! Serialized line writer for one connection
//!
//! Several tasks write to the same connection (a node's control connection is
//! used by remove fan-out, rebalance probes and rebalance dispatch). Lines are
//! queued on a channel and written by a single task, so they never interleave.

use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct Outbox {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    /// Outbox whose lines are read from the returned receiver.
    pub fn channel(peer: SocketAddr) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { peer, tx }, rx)
    }

    /// Outbox backed by a writer task draining into `writer`.
    pub fn spawn<W>(peer: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, rx) = Self::channel(peer);
        tokio::spawn(write_lines(peer, writer, rx));
        outbox
    }

    /// Queue one line. Returns false if the connection's writer is gone.
    pub fn send<M: fmt::Display + ?Sized>(&self, message: &M) -> bool {
        let line = message.to_string();
        tracing::debug!("-> {}: {}", self.peer, line);
        self.tx.send(line).is_ok()
    }
}

async fn write_lines<W>(peer: SocketAddr, mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::debug!("Write to {} failed: {}", peer, e);
            break;
        }
    }
}
