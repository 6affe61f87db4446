//! Store coordination
//!
//! `STORE` allocates R nodes and answers with their ports; the client then
//! sends the bytes to each node directly. Each node reports `STORE_ACK` and
//! the R-th distinct ack completes the file and notifies the client.

use crate::common::{Response, Result};
use crate::controller::index::AckOutcome;
use crate::controller::registry::{ClientId, NodeId};
use crate::controller::state::ControllerState;

impl ControllerState {
    /// Accept a store request, returning the `STORE_TO` reply.
    pub fn store(&self, client: ClientId, filename: &str, size: u64) -> Result<Response> {
        let window = self.config.timeout();
        self.index.check_storable(filename, window)?;

        let targets = self.placement.select_store_nodes(&self.nodes.snapshot())?;
        self.index.begin_store(filename, size, window)?;
        self.pending_stores.insert(filename.to_string(), client);

        let ports: Vec<u16> = targets.iter().map(|n| n.listen_port).collect();
        tracing::info!("Storing {} ({} bytes) on ports {:?}", filename, size, ports);
        Ok(Response::StoreTo(ports))
    }

    /// Record that `node` holds `filename`.
    pub fn acknowledge_store(&self, filename: &str, node: NodeId) {
        match self
            .index
            .record_store_ack(filename, node, self.replication_factor())
        {
            AckOutcome::Completed => {
                tracing::info!("Store of {} complete", filename);
                match self.pending_stores.remove(filename) {
                    Some((_, client)) => {
                        self.clients.notify(&client, &Response::StoreComplete);
                    }
                    None => tracing::warn!("No client waiting on store of {}", filename),
                }
            }
            AckOutcome::Pending { acks } => {
                tracing::debug!(
                    "STORE_ACK {} from {} ({}/{})",
                    filename,
                    node,
                    acks,
                    self.replication_factor()
                );
            }
            AckOutcome::AlreadyComplete => {
                tracing::debug!("Late STORE_ACK {} from {}", filename, node);
            }
            AckOutcome::Ignored => {
                tracing::warn!("Ignoring STORE_ACK {} from {}: no store in progress", filename, node);
            }
        }
    }
}
