//! Shared controller state and message dispatch
//!
//! One `ControllerState` is shared (behind an `Arc`) by every connection
//! task, the rebalancer and remove timers. All of its maps are concurrent, so
//! operations on different files never wait on each other.

use crate::common::protocol;
use crate::common::{ClientRequest, ControllerConfig, Error, NodeMessage, Response, Result};
use crate::controller::index::FileIndex;
use crate::controller::placement::PlacementManager;
use crate::controller::registry::{ClientId, ClientRegistry, NodeId, NodeRegistry};
use crate::controller::remove::PendingRemove;
use dashmap::DashMap;
use std::sync::Arc;

pub struct ControllerState {
    pub config: ControllerConfig,
    pub index: FileIndex,
    pub nodes: NodeRegistry,
    pub clients: ClientRegistry,
    pub(crate) placement: PlacementManager,
    /// filename → client awaiting `STORE_COMPLETE`
    pub(crate) pending_stores: DashMap<String, ClientId>,
    /// filename → outstanding removal acknowledgments
    pub(crate) pending_removes: DashMap<String, PendingRemove>,
    /// (client, filename) → node that last served the file to that client
    pub(crate) last_served: DashMap<(ClientId, String), NodeId>,
}

impl ControllerState {
    pub fn new(config: ControllerConfig) -> Arc<Self> {
        let placement = PlacementManager::new(config.replication_factor);
        Arc::new(Self {
            config,
            index: FileIndex::new(),
            nodes: NodeRegistry::new(),
            clients: ClientRegistry::new(),
            placement,
            pending_stores: DashMap::new(),
            pending_removes: DashMap::new(),
            last_served: DashMap::new(),
        })
    }

    pub fn replication_factor(&self) -> usize {
        self.config.replication_factor
    }

    /// Fails with `NotEnoughNodes` while fewer than R nodes are joined.
    pub fn ensure_enough_nodes(&self) -> Result<()> {
        let available = self.nodes.len();
        let needed = self.replication_factor();
        if available < needed {
            return Err(Error::NotEnoughNodes { needed, available });
        }
        Ok(())
    }

    /// Handle one line from a client connection, returning the immediate
    /// reply if there is one.
    pub fn handle_client_line(self: &Arc<Self>, client: ClientId, line: &str) -> Option<Response> {
        let result = ClientRequest::parse(line).and_then(|request| {
            tracing::debug!("{} from client {}", request, client);
            match request {
                ClientRequest::Store { filename, size } => {
                    self.store(client, &filename, size).map(Some)
                }
                ClientRequest::Load { filename } => self.load(client, &filename, false).map(Some),
                ClientRequest::Reload { filename } => self.load(client, &filename, true).map(Some),
                ClientRequest::Remove { filename } => self.remove(client, &filename).map(|_| None),
                ClientRequest::List => self.list().map(Some),
            }
        });

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Rejected request from {}: {}", client, e);
                match e.error_code() {
                    Some(code) => Some(Response::Error(code)),
                    None => {
                        tracing::warn!("Unreported error for client {}: {}", client, e);
                        None
                    }
                }
            }
        }
    }

    /// Handle one line from a joined node's control connection.
    pub fn handle_node_line(&self, node: NodeId, line: &str) {
        let message = match NodeMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Unknown message from node {}: {} ({})", node, line, e);
                return;
            }
        };

        match message {
            NodeMessage::StoreAck(filename) => self.acknowledge_store(&filename, node),
            NodeMessage::RemoveAck(filename) | NodeMessage::RemoveMissing(filename) => {
                self.acknowledge_remove(&filename, node);
            }
            NodeMessage::RemoveFailed(filename) => {
                tracing::warn!("Node {} failed to delete {}", node, filename);
            }
            NodeMessage::List(files) => {
                if !self.nodes.complete_probe(&node, files) {
                    tracing::debug!("Ignoring stale or unsolicited file list from node {}", node);
                }
            }
            NodeMessage::RebalanceComplete => self.complete_rebalance(node),
        }
    }

    /// Handle a node line that is not valid UTF-8. The node stays joined; an
    /// unreadable `LIST` reply still settles the probe that asked for it.
    pub fn reject_node_line(&self, node: NodeId, raw: &[u8]) {
        tracing::warn!(
            "Unreadable line from node {}: {}",
            node,
            String::from_utf8_lossy(raw)
        );
        let keyword = raw.split(|b| b.is_ascii_whitespace()).next();
        if keyword == Some(protocol::LIST.as_bytes()) {
            self.nodes.fail_probe(&node);
        }
    }

    /// Forget a node whose control connection closed.
    pub fn deregister_node(&self, node: &NodeId) {
        self.nodes.deregister(node);
    }

    /// Forget a client whose connection closed.
    pub fn deregister_client(&self, client: &ClientId) {
        self.clients.deregister(client);
    }
}
