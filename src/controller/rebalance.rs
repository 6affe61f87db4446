//! Periodic rebalancer
//!
//! Each cycle probes every joined node for the files it actually holds,
//! repairs the index against what was reported, plans pushes and deletes,
//! and sends each node with work a single `REBALANCE` command. When a node
//! reports `REBALANCE_COMPLETE` its plan is applied to the index.

use crate::common::{FileTransfer, NodeCommand};
use crate::controller::index::FileStatus;
use crate::controller::placement::NodePlan;
use crate::controller::registry::NodeId;
use crate::controller::state::ControllerState;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

/// Summary of one rebalance cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceReport {
    /// Nodes that answered their probe in time
    pub probed: usize,
    /// Replica references to departed nodes dropped from the index
    pub pruned: usize,
    /// Timed-out removes dropped because no node still holds the file
    pub abandoned: usize,
    /// Nodes sent a `REBALANCE` command
    pub dispatched: usize,
    /// Complete files no reporting node holds
    pub lost: usize,
}

/// Start the background rebalance loop.
pub fn spawn_rebalancer(state: Arc<ControllerState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.rebalance_period());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick fires immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Some(report) = state.rebalance_once().await {
                tracing::debug!("Rebalance cycle finished: {:?}", report);
            }
        }
    })
}

impl ControllerState {
    /// Run one rebalance cycle. Returns `None` when skipped for lack of nodes.
    pub async fn rebalance_once(&self) -> Option<RebalanceReport> {
        if self.ensure_enough_nodes().is_err() {
            tracing::debug!(
                "Skipping rebalance: {} of {} nodes joined",
                self.nodes.len(),
                self.replication_factor()
            );
            return None;
        }

        let holdings = self.probe_nodes().await;
        let mut report = RebalanceReport {
            probed: holdings.len(),
            ..Default::default()
        };

        report.pruned = self.index.prune_replicas(&self.nodes.ids());
        for name in self.index.timed_out_removes() {
            let held = holdings.values().any(|files| files.contains(&name));
            if !held && self.abandon_remove(&name) {
                report.abandoned += 1;
            }
        }

        let plan = self
            .placement
            .plan_rebalance(&self.index.statuses(), &holdings);
        tracing::info!(
            "Rebalance plan: {} node(s) reporting, ideal {}..={} files each, {} under-replicated, {} over-replicated, {} orphan(s)",
            holdings.len(),
            plan.bounds.0,
            plan.bounds.1,
            plan.under_replicated,
            plan.over_replicated,
            plan.orphans
        );
        for name in &plan.lost {
            tracing::warn!("No reporting node holds {}", name);
        }
        report.lost = plan.lost.len();

        for (node, node_plan) in plan.nodes {
            if self.dispatch(node, node_plan) {
                report.dispatched += 1;
            }
        }
        Some(report)
    }

    /// Ask every node for its file list concurrently, each bounded by the
    /// configured timeout. Nodes that fail to answer are left out.
    async fn probe_nodes(&self) -> BTreeMap<NodeId, BTreeSet<String>> {
        let timeout = self.config.timeout();
        let mut probes = JoinSet::new();
        for node in self.nodes.snapshot() {
            let Some(rx) = self.nodes.begin_probe(&node.id) else {
                tracing::warn!("Could not send LIST to node {}", node.id);
                continue;
            };
            probes.spawn(async move { (node.id, tokio::time::timeout(timeout, rx).await) });
        }

        let mut holdings = BTreeMap::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((node, Ok(Ok(files)))) => {
                    holdings.insert(node, files.into_iter().collect());
                }
                Ok((node, Ok(Err(_)))) => {
                    tracing::warn!("Node {} left or sent an unreadable LIST", node);
                }
                Ok((node, Err(_))) => {
                    tracing::warn!("Node {} did not answer LIST within {:?}", node, timeout);
                }
                Err(e) => tracing::error!("Probe task failed: {}", e),
            }
        }
        holdings
    }

    /// Send one node its plan, dropping push targets that have since left.
    fn dispatch(&self, node: NodeId, plan: NodePlan) -> bool {
        let mut kept = NodePlan {
            deletes: plan.deletes,
            ..Default::default()
        };
        let mut send = Vec::new();
        for (filename, targets) in plan.pushes {
            let live: Vec<_> = targets.iter().filter_map(|t| self.nodes.info(t)).collect();
            if live.is_empty() {
                continue;
            }
            send.push(FileTransfer {
                filename: filename.clone(),
                targets: live.iter().map(|n| n.endpoint()).collect(),
            });
            kept.pushes.push((filename, live.iter().map(|n| n.id).collect()));
        }
        if kept.is_empty() {
            return false;
        }

        let command = NodeCommand::Rebalance {
            send,
            remove: kept.deletes.clone(),
        };
        if !self.nodes.send(&node, &command) {
            tracing::warn!("Node {} unavailable for REBALANCE", node);
            return false;
        }
        tracing::info!(
            "Sent node {} {} push(es) and {} delete(s)",
            node,
            kept.pushes.len(),
            kept.deletes.len()
        );
        self.nodes.set_plan(&node, kept);
        true
    }

    /// Apply the plan `node` just finished to the index.
    pub fn complete_rebalance(&self, node: NodeId) {
        let Some(plan) = self.nodes.take_plan(&node) else {
            tracing::debug!("REBALANCE_COMPLETE from {} with no plan outstanding", node);
            return;
        };

        for (filename, targets) in &plan.pushes {
            self.index.add_replicas(filename, targets);
        }
        for filename in &plan.deletes {
            self.index.drop_replica(filename, node);
            if self.index.status(filename) == Some(FileStatus::RemoveInProgress) {
                self.acknowledge_remove(filename, node);
            }
        }
        tracing::info!("Node {} completed rebalance", node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::state::tests::{client_addr, connect, join, node_addr, state};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Read the node's queue up to the next `LIST` probe and answer it.
    async fn answer(
        state: &ControllerState,
        rx: &mut UnboundedReceiver<String>,
        port: u16,
        files: &[&str],
    ) {
        loop {
            let line = rx.recv().await.unwrap();
            if line == "LIST" {
                break;
            }
        }
        let mut reply = String::from("LIST");
        for file in files {
            reply.push(' ');
            reply.push_str(file);
        }
        state.handle_node_line(node_addr(port), &reply);
    }

    fn stored(state: &ControllerState, name: &str, ports: std::ops::RangeInclusive<u16>) {
        state.store(client_addr(1), name, 7).unwrap();
        for port in ports {
            state.acknowledge_store(name, node_addr(port));
        }
    }

    #[tokio::test]
    async fn test_skips_without_enough_nodes() {
        let state = state(3);
        let _nodes: Vec<_> = (4001..=4002).map(|p| join(&state, p)).collect();
        assert_eq!(state.rebalance_once().await, None);
    }

    #[tokio::test]
    async fn test_restores_replica_on_new_node() {
        let state = state(3);
        let mut nodes: Vec<_> = (4001..=4003).map(|p| join(&state, p)).collect();
        let _client = connect(&state, 1);
        stored(&state, "a.txt", 4001..=4003);

        state.deregister_node(&node_addr(4003));
        nodes.pop();
        let mut newcomer = join(&state, 4004);

        let cycle = tokio::spawn({
            let state = state.clone();
            async move { state.rebalance_once().await }
        });
        answer(&state, &mut nodes[0], 4001, &["a.txt"]).await;
        answer(&state, &mut nodes[1], 4002, &["a.txt"]).await;
        answer(&state, &mut newcomer, 4004, &[]).await;
        let report = cycle.await.unwrap().unwrap();

        assert_eq!(report.probed, 3);
        assert_eq!(report.pruned, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(
            nodes[0].recv().await.unwrap(),
            "REBALANCE 1 a.txt 1 127.0.0.1:4004 0"
        );
        assert!(nodes[1].try_recv().is_err());

        state.handle_node_line(node_addr(4001), "REBALANCE_COMPLETE");
        let replicas = state.index.get("a.txt").unwrap().replicas;
        assert_eq!(
            replicas.into_iter().collect::<Vec<_>>(),
            vec![node_addr(4001), node_addr(4002), node_addr(4004)]
        );
        assert!(state.load(client_addr(1), "a.txt", false).is_ok());
    }

    #[tokio::test]
    async fn test_orphans_are_deleted() {
        let state = state(1);
        let mut node = join(&state, 4001);
        let _client = connect(&state, 1);
        stored(&state, "a.txt", 4001..=4001);

        let cycle = tokio::spawn({
            let state = state.clone();
            async move { state.rebalance_once().await }
        });
        answer(&state, &mut node, 4001, &["a.txt", "stray"]).await;
        cycle.await.unwrap().unwrap();

        assert_eq!(node.recv().await.unwrap(), "REBALANCE 0 1 stray");
        state.handle_node_line(node_addr(4001), "REBALANCE_COMPLETE");
        assert_eq!(state.index.complete_files(), vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_silent_node_contributes_nothing() {
        let state = state(1);
        let mut talker = join(&state, 4001);
        let _silent = join(&state, 4002);
        let _client = connect(&state, 1);
        stored(&state, "a.txt", 4001..=4001);

        let cycle = tokio::spawn({
            let state = state.clone();
            async move { state.rebalance_once().await }
        });
        answer(&state, &mut talker, 4001, &["a.txt"]).await;
        let report = cycle.await.unwrap().unwrap();

        assert_eq!(report.probed, 1);
        assert_eq!(report.dispatched, 0);
    }

    #[tokio::test]
    async fn test_late_reply_is_not_used_by_next_cycle() {
        let state = state(1);
        let mut node = join(&state, 4001);

        // first cycle times out with no answer
        let report = state.rebalance_once().await.unwrap();
        assert_eq!(report.probed, 0);
        assert_eq!(node.recv().await.unwrap(), "LIST");

        let cycle = tokio::spawn({
            let state = state.clone();
            async move { state.rebalance_once().await }
        });
        assert_eq!(node.recv().await.unwrap(), "LIST");

        // the answer to the first LIST arrives, then the current one
        state.handle_node_line(node_addr(4001), "LIST old-stale.dat");
        state.handle_node_line(node_addr(4001), "LIST");
        let report = cycle.await.unwrap().unwrap();

        assert_eq!(report.probed, 1);
        assert_eq!(report.dispatched, 0);
        assert!(node.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreadable_reply_fails_only_its_cycle() {
        let state = state(1);
        let mut node = join(&state, 4001);

        let cycle = tokio::spawn({
            let state = state.clone();
            async move { state.rebalance_once().await }
        });
        assert_eq!(node.recv().await.unwrap(), "LIST");
        state.reject_node_line(node_addr(4001), b"LIST caf\xe9.txt");
        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.probed, 0);
        assert!(state.nodes.contains(&node_addr(4001)));

        // the next cycle is answered normally
        let cycle = tokio::spawn({
            let state = state.clone();
            async move { state.rebalance_once().await }
        });
        answer(&state, &mut node, 4001, &[]).await;
        assert_eq!(cycle.await.unwrap().unwrap().probed, 1);
    }

    #[tokio::test]
    async fn test_stuck_remove_is_reconciled() {
        let state = state(3);
        let mut nodes: Vec<_> = (4001..=4003).map(|p| join(&state, p)).collect();
        let mut client_rx = connect(&state, 1);
        stored(&state, "a.txt", 4001..=4003);
        assert_eq!(client_rx.recv().await.unwrap(), "STORE_COMPLETE");

        state.remove(client_addr(1), "a.txt").unwrap();
        state.acknowledge_remove("a.txt", node_addr(4001));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(state.index.get("a.txt").unwrap().remove_timed_out);

        // 4002 still has its copy; 4003 deleted but its ack was lost
        let cycle = tokio::spawn({
            let state = state.clone();
            async move { state.rebalance_once().await }
        });
        answer(&state, &mut nodes[0], 4001, &[]).await;
        answer(&state, &mut nodes[1], 4002, &["a.txt"]).await;
        answer(&state, &mut nodes[2], 4003, &[]).await;
        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.abandoned, 0);
        assert_eq!(nodes[1].recv().await.unwrap(), "REBALANCE 0 1 a.txt");

        state.handle_node_line(node_addr(4002), "REBALANCE_COMPLETE");
        assert_eq!(state.index.status("a.txt"), Some(FileStatus::RemoveInProgress));

        // the next cycle finds no copy left anywhere
        let cycle = tokio::spawn({
            let state = state.clone();
            async move { state.rebalance_once().await }
        });
        for (rx, port) in nodes.iter_mut().zip(4001..) {
            answer(&state, rx, port, &[]).await;
        }
        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report.abandoned, 1);
        assert!(state.index.get("a.txt").is_none());
        assert!(state.pending_removes.is_empty());
        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsolicited_completion_is_ignored() {
        let state = state(1);
        let _node = join(&state, 4001);
        state.complete_rebalance(node_addr(4001));
        assert!(state.index.is_empty());
    }
}
