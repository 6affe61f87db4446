//! Remove coordination
//!
//! `REMOVE` fans a delete out to every replica and waits for each one to
//! acknowledge. A timer bounds the wait: when it fires the remove is logged
//! as timed out and left in `RemoveInProgress` for the rebalancer to finish.

use crate::common::{Error, NodeCommand, Response, Result};
use crate::controller::index::FileStatus;
use crate::controller::registry::{ClientId, NodeId};
use crate::controller::state::ControllerState;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Acknowledgments still owed for one remove.
#[derive(Debug)]
pub struct PendingRemove {
    pub client: ClientId,
    pub waiting: HashSet<NodeId>,
    timer: Option<JoinHandle<()>>,
}

impl Drop for PendingRemove {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl ControllerState {
    /// Accept a remove request. Completion is reported asynchronously.
    pub fn remove(self: &Arc<Self>, client: ClientId, filename: &str) -> Result<()> {
        if self.index.status(filename) != Some(FileStatus::StoreComplete) {
            return Err(Error::FileDoesNotExist(filename.to_string()));
        }
        self.ensure_enough_nodes()?;

        let replicas = self.index.begin_remove(filename)?;
        tracing::info!("Removing {} from {} node(s)", filename, replicas.len());

        let timer = self.spawn_remove_timer(filename);
        self.pending_removes.insert(
            filename.to_string(),
            PendingRemove {
                client,
                waiting: replicas.iter().copied().collect(),
                timer: Some(timer),
            },
        );

        let command = NodeCommand::Remove(filename.to_string());
        for node in &replicas {
            if !self.nodes.send(node, &command) {
                tracing::warn!("Node {} unavailable for REMOVE {}", node, filename);
            }
        }

        self.finish_remove_if_drained(filename);
        Ok(())
    }

    /// Record that `node` deleted its copy of `filename`. Returns true if
    /// this completed the remove.
    pub fn acknowledge_remove(&self, filename: &str, node: NodeId) -> bool {
        match self.pending_removes.get_mut(filename) {
            Some(mut pending) => {
                pending.waiting.remove(&node);
                tracing::debug!(
                    "REMOVE_ACK {} from {} ({} outstanding)",
                    filename,
                    node,
                    pending.waiting.len()
                );
            }
            None => {
                tracing::debug!("Ignoring REMOVE_ACK {} from {}: no remove pending", filename, node);
                return false;
            }
        }
        self.finish_remove_if_drained(filename)
    }

    fn finish_remove_if_drained(&self, filename: &str) -> bool {
        let Some((_, pending)) = self
            .pending_removes
            .remove_if(filename, |_, p| p.waiting.is_empty())
        else {
            return false;
        };

        self.index.finish_remove(filename);
        tracing::info!("Remove of {} complete", filename);
        self.clients.notify(&pending.client, &Response::RemoveComplete);
        true
    }

    fn spawn_remove_timer(self: &Arc<Self>, filename: &str) -> JoinHandle<()> {
        let state = Arc::downgrade(self);
        let filename = filename.to_string();
        let timeout = self.config.timeout();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(state) = state.upgrade() {
                state.expire_remove(&filename);
            }
        })
    }

    fn expire_remove(&self, filename: &str) {
        let outstanding = match self.pending_removes.get(filename) {
            Some(pending) => pending.waiting.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
            None => return,
        };
        self.index.mark_remove_timed_out(filename);
        tracing::warn!(
            "Remove of {} timed out waiting on {:?}; leaving it for rebalance",
            filename,
            outstanding
        );
    }

    /// Drop a timed-out remove without notifying its client.
    pub(crate) fn abandon_remove(&self, filename: &str) -> bool {
        if !self.index.drop_abandoned_remove(filename) {
            return false;
        }
        self.pending_removes.remove(filename);
        tracing::info!("Dropped abandoned remove of {}", filename);
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::common::{ErrorCode, Response};
    use crate::controller::index::FileStatus;
    use crate::controller::state::ControllerState;
    use crate::controller::state::tests::{client_addr, connect, join, node_addr, state};
    use std::time::Duration;

    fn stored(state: &ControllerState) {
        state.store(client_addr(1), "a.txt", 10).unwrap();
        for port in 4001..=4003 {
            state.acknowledge_store("a.txt", node_addr(port));
        }
    }

    #[tokio::test]
    async fn test_remove_fans_out_and_completes() {
        let state = state(3);
        let mut nodes: Vec<_> = (4001..=4003).map(|p| join(&state, p)).collect();
        let mut client_rx = connect(&state, 1);
        stored(&state);
        assert_eq!(client_rx.recv().await.unwrap(), "STORE_COMPLETE");

        state.remove(client_addr(1), "a.txt").unwrap();
        for rx in nodes.iter_mut() {
            assert_eq!(rx.recv().await.unwrap(), "REMOVE a.txt");
        }
        assert_eq!(state.index.status("a.txt"), Some(FileStatus::RemoveInProgress));
        assert_eq!(
            state.handle_client_line(client_addr(1), "LIST"),
            Some(Response::List(vec![]))
        );

        assert!(!state.acknowledge_remove("a.txt", node_addr(4001)));
        assert!(!state.acknowledge_remove("a.txt", node_addr(4002)));
        assert!(state.acknowledge_remove("a.txt", node_addr(4003)));
        assert_eq!(client_rx.recv().await.unwrap(), "REMOVE_COMPLETE");
        assert!(state.index.get("a.txt").is_none());

        // duplicate acks after completion do nothing
        assert!(!state.acknowledge_remove("a.txt", node_addr(4003)));
        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remove_unknown_file() {
        let state = state(1);
        let _node = join(&state, 4001);

        let err = state.remove(client_addr(1), "nope").unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::FileDoesNotExist));
        assert!(state.index.is_empty());
        assert!(state.pending_removes.is_empty());
    }

    #[tokio::test]
    async fn test_remove_requires_enough_nodes() {
        let state = state(3);
        let _nodes: Vec<_> = (4001..=4003).map(|p| join(&state, p)).collect();
        let _client = connect(&state, 1);
        stored(&state);

        state.deregister_node(&node_addr(4003));
        let err = state.remove(client_addr(1), "a.txt").unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::NotEnoughNodes));
        assert_eq!(state.index.status("a.txt"), Some(FileStatus::StoreComplete));
    }

    #[tokio::test]
    async fn test_second_remove_is_rejected() {
        let state = state(3);
        let _nodes: Vec<_> = (4001..=4003).map(|p| join(&state, p)).collect();
        let _client = connect(&state, 1);
        stored(&state);

        state.remove(client_addr(1), "a.txt").unwrap();
        let err = state.remove(client_addr(1), "a.txt").unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::FileDoesNotExist));
    }

    #[tokio::test]
    async fn test_timeout_leaves_remove_in_progress() {
        let state = state(3);
        let _nodes: Vec<_> = (4001..=4003).map(|p| join(&state, p)).collect();
        let mut client_rx = connect(&state, 1);
        stored(&state);
        assert_eq!(client_rx.recv().await.unwrap(), "STORE_COMPLETE");

        state.remove(client_addr(1), "a.txt").unwrap();
        state.acknowledge_remove("a.txt", node_addr(4001));

        tokio::time::sleep(Duration::from_millis(400)).await;
        let record = state.index.get("a.txt").unwrap();
        assert_eq!(record.status, FileStatus::RemoveInProgress);
        assert!(record.remove_timed_out);
        assert!(client_rx.try_recv().is_err());

        // late acks still finish the remove
        state.acknowledge_remove("a.txt", node_addr(4002));
        assert!(state.acknowledge_remove("a.txt", node_addr(4003)));
        assert_eq!(client_rx.recv().await.unwrap(), "REMOVE_COMPLETE");
    }

    #[tokio::test]
    async fn test_node_missing_file_counts_as_ack() {
        let state = state(1);
        let _node = join(&state, 4001);
        let mut client_rx = connect(&state, 1);
        state.store(client_addr(1), "a.txt", 1).unwrap();
        state.acknowledge_store("a.txt", node_addr(4001));
        assert_eq!(client_rx.recv().await.unwrap(), "STORE_COMPLETE");

        state.remove(client_addr(1), "a.txt").unwrap();
        state.handle_node_line(node_addr(4001), "ERROR_FILE_DOES_NOT_EXIST a.txt");
        assert_eq!(client_rx.recv().await.unwrap(), "REMOVE_COMPLETE");
    }
}
