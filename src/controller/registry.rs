//! Registries of connected storage nodes and clients

use crate::common::{NodeCommand, Response};
use crate::controller::outbox::Outbox;
use crate::controller::placement::NodePlan;
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// A node is identified by the peer address of its control connection.
pub type NodeId = SocketAddr;

/// A client is identified by the peer address of its connection.
pub type ClientId = SocketAddr;

struct NodeRecord {
    listen_port: u16,
    outbox: Outbox,
    /// Join order, used for deterministic iteration
    seq: u64,
    /// Waiting rebalance probe, filled by the reply to the latest `LIST`
    probe: Option<oneshot::Sender<Vec<String>>>,
    /// `LIST` commands sent whose replies have not arrived yet
    lists_owed: u32,
    /// Last rebalance plan dispatched and not yet reported complete
    plan: Option<NodePlan>,
}

/// Point-in-time view of one joined node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub listen_port: u16,
}

impl NodeInfo {
    /// Endpoint other nodes use to push files to this node.
    pub fn endpoint(&self) -> String {
        SocketAddr::new(self.id.ip(), self.listen_port).to_string()
    }
}

#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<NodeId, NodeRecord>,
    next_seq: AtomicU64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: NodeId, listen_port: u16, outbox: Outbox) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.nodes.insert(
            id,
            NodeRecord {
                listen_port,
                outbox,
                seq,
                probe: None,
                lists_owed: 0,
                plan: None,
            },
        );
        tracing::info!("Node {} joined (listen port {})", id, listen_port);
    }

    pub fn deregister(&self, id: &NodeId) -> bool {
        let removed = self.nodes.remove(id).is_some();
        if removed {
            tracing::info!("Node {} left", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn listen_port(&self, id: &NodeId) -> Option<u16> {
        self.nodes.get(id).map(|n| n.listen_port)
    }

    pub fn info(&self, id: &NodeId) -> Option<NodeInfo> {
        self.nodes.get(id).map(|n| NodeInfo {
            id: *id,
            listen_port: n.listen_port,
        })
    }

    pub fn ids(&self) -> HashSet<NodeId> {
        self.nodes.iter().map(|n| *n.key()).collect()
    }

    /// Joined nodes in join order.
    pub fn snapshot(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<(u64, NodeInfo)> = self
            .nodes
            .iter()
            .map(|n| {
                (
                    n.seq,
                    NodeInfo {
                        id: *n.key(),
                        listen_port: n.listen_port,
                    },
                )
            })
            .collect();
        nodes.sort_by_key(|(seq, _)| *seq);
        nodes.into_iter().map(|(_, info)| info).collect()
    }

    /// Queue a command on the node's control connection.
    pub fn send(&self, id: &NodeId, command: &NodeCommand) -> bool {
        match self.nodes.get(id) {
            Some(node) => node.outbox.send(command),
            None => false,
        }
    }

    /// Ask a node for its file list. The receiver resolves when the reply
    /// to this `LIST` arrives and errors if the node leaves first or the
    /// reply is unreadable.
    pub fn begin_probe(&self, id: &NodeId) -> Option<oneshot::Receiver<Vec<String>>> {
        let mut node = self.nodes.get_mut(id)?;
        if !node.outbox.send(&NodeCommand::List) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        node.lists_owed += 1;
        node.probe = Some(tx);
        Some(rx)
    }

    /// Deliver a node's `LIST` reply. Returns false if it answered an
    /// earlier, abandoned probe or nothing was waiting.
    pub fn complete_probe(&self, id: &NodeId, files: Vec<String>) -> bool {
        match self.claim_reply(id) {
            Some(tx) => tx.send(files).is_ok(),
            None => false,
        }
    }

    /// Account for a `LIST` reply that could not be read. A probe waiting on
    /// it fails instead of taking the node's next reply.
    pub fn fail_probe(&self, id: &NodeId) -> bool {
        self.claim_reply(id).is_some()
    }

    /// Replies arrive in the order the `LIST`s were sent, so only the reply
    /// that settles the last outstanding one belongs to the current probe.
    fn claim_reply(&self, id: &NodeId) -> Option<oneshot::Sender<Vec<String>>> {
        let mut node = self.nodes.get_mut(id)?;
        if node.lists_owed == 0 {
            return None;
        }
        node.lists_owed -= 1;
        if node.lists_owed > 0 {
            tracing::debug!(
                "Discarding stale LIST reply from node {} ({} still owed)",
                id,
                node.lists_owed
            );
            return None;
        }
        node.probe.take()
    }

    pub fn set_plan(&self, id: &NodeId, plan: NodePlan) {
        if let Some(mut node) = self.nodes.get_mut(id) {
            node.plan = Some(plan);
        }
    }

    pub fn take_plan(&self, id: &NodeId) -> Option<NodePlan> {
        self.nodes.get_mut(id).and_then(|mut n| n.plan.take())
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Outbox>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ClientId, outbox: Outbox) {
        self.clients.insert(id, outbox);
        tracing::debug!("Client connection registered: {}", id);
    }

    pub fn deregister(&self, id: &ClientId) {
        if self.clients.remove(id).is_some() {
            tracing::debug!("Client {} disconnected", id);
        }
    }

    /// Push an asynchronous notification to a client.
    pub fn notify(&self, id: &ClientId, response: &Response) -> bool {
        match self.clients.get(id) {
            Some(outbox) => outbox.send(response),
            None => {
                tracing::warn!("Client {} gone, dropping {}", id, response);
                false
            }
        }
    }
}
