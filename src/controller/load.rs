//! Read-side requests: LIST, LOAD and RELOAD

use crate::common::{Error, Response, Result};
use crate::controller::index::FileStatus;
use crate::controller::registry::{ClientId, NodeId};
use crate::controller::state::ControllerState;
use rand::seq::SliceRandom;

impl ControllerState {
    /// Names of every complete file.
    pub fn list(&self) -> Result<Response> {
        self.ensure_enough_nodes()?;
        Ok(Response::List(self.index.complete_files()))
    }

    /// Pick a live replica to serve `filename`. On `reload` the replica that
    /// last served this client is skipped.
    pub fn load(&self, client: ClientId, filename: &str, reload: bool) -> Result<Response> {
        let record = self
            .index
            .get(filename)
            .filter(|r| r.status == FileStatus::StoreComplete)
            .ok_or_else(|| Error::FileDoesNotExist(filename.to_string()))?;

        let key = (client, filename.to_string());
        // live replicas with the port they listen on, read once
        let mut candidates: Vec<(NodeId, u16)> = record
            .replicas
            .iter()
            .filter_map(|n| self.nodes.listen_port(n).map(|port| (*n, port)))
            .collect();

        if reload {
            if let Some(last) = self.last_served.get(&key).map(|n| *n) {
                candidates.retain(|(n, _)| *n != last);
            }
        } else if candidates.len() < self.replication_factor() {
            return Err(Error::NotEnoughNodes {
                needed: self.replication_factor(),
                available: candidates.len(),
            });
        }

        // only a reload can be left without candidates here
        let (chosen, port) = *candidates
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| Error::LoadFailed(filename.to_string()))?;

        self.last_served.insert(key, chosen);
        tracing::debug!("Serving {} to {} from {}", filename, client, chosen);
        Ok(Response::LoadFrom {
            port,
            size: record.size,
        })
    }
}
