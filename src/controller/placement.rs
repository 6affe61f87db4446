//! Placement strategy for new stores and rebalance planning
//!
//! Stores go to the first R joined nodes. Rebalancing compares what each
//! node actually reports holding against the file index and produces, per
//! node, a list of files to push elsewhere and a list of files to delete.

use crate::common::{ideal_bounds, Error, Result};
use crate::controller::index::FileStatus;
use crate::controller::registry::{NodeId, NodeInfo};
use std::collections::{BTreeMap, BTreeSet};

/// Work assigned to one node by a rebalance cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePlan {
    /// Files to push, each with the nodes that should receive a copy
    pub pushes: Vec<(String, Vec<NodeId>)>,
    /// Files to delete locally
    pub deletes: Vec<String>,
}

impl NodePlan {
    pub fn is_empty(&self) -> bool {
        self.pushes.is_empty() && self.deletes.is_empty()
    }
}

/// Output of one planning pass.
#[derive(Debug, Clone, Default)]
pub struct RebalancePlan {
    pub nodes: BTreeMap<NodeId, NodePlan>,
    /// Ideal `(min, max)` files per node
    pub bounds: (usize, usize),
    pub under_replicated: usize,
    pub over_replicated: usize,
    pub orphans: usize,
    /// Complete files no reporting node holds
    pub lost: Vec<String>,
}

impl RebalancePlan {
    fn entry(&mut self, node: NodeId) -> &mut NodePlan {
        self.nodes.entry(node).or_default()
    }
}

/// PlacementManager picks store targets and plans rebalances.
pub struct PlacementManager {
    /// Number of replicas per file
    replicas: usize,
}

impl PlacementManager {
    pub fn new(replicas: usize) -> Self {
        Self { replicas }
    }

    /// Select exactly R nodes for a new file: the first R in join order.
    pub fn select_store_nodes(&self, nodes: &[NodeInfo]) -> Result<Vec<NodeInfo>> {
        if nodes.len() < self.replicas {
            return Err(Error::NotEnoughNodes {
                needed: self.replicas,
                available: nodes.len(),
            });
        }
        Ok(nodes[..self.replicas].to_vec())
    }

    /// Plan pushes and deletes that bring every complete file back to R
    /// copies and purge files the index does not know.
    ///
    /// `holdings` maps each node that answered its probe to the files it
    /// reported. Only those nodes are considered as holders or targets.
    pub fn plan_rebalance(
        &self,
        files: &BTreeMap<String, FileStatus>,
        holdings: &BTreeMap<NodeId, BTreeSet<String>>,
    ) -> RebalancePlan {
        let r = self.replicas;
        let mut plan = RebalancePlan {
            bounds: ideal_bounds(r, files.len(), holdings.len()),
            ..Default::default()
        };
        let (_, max) = plan.bounds;

        let mut load: BTreeMap<NodeId, usize> = holdings
            .iter()
            .map(|(node, held)| {
                let known = held.iter().filter(|f| is_kept(files.get(*f))).count();
                (*node, known)
            })
            .collect();
        let mut sends: BTreeMap<NodeId, usize> = BTreeMap::new();

        for (name, status) in files {
            if *status != FileStatus::StoreComplete {
                continue;
            }
            let holders: Vec<NodeId> = holdings
                .iter()
                .filter(|(_, held)| held.contains(name))
                .map(|(node, _)| *node)
                .collect();

            if holders.len() < r {
                plan.under_replicated += 1;
                if holders.is_empty() {
                    plan.lost.push(name.clone());
                    continue;
                }

                let mut candidates: Vec<NodeId> = holdings
                    .keys()
                    .filter(|n| !holders.contains(n))
                    .copied()
                    .collect();
                candidates.sort_by_key(|n| {
                    let l = load.get(n).copied().unwrap_or_default();
                    (l >= max, l, *n)
                });
                let targets: Vec<NodeId> = candidates.into_iter().take(r - holders.len()).collect();
                if targets.is_empty() {
                    continue;
                }
                for target in &targets {
                    *load.entry(*target).or_default() += 1;
                }

                let Some(source) = holders
                    .iter()
                    .min_by_key(|n| (sends.get(*n).copied().unwrap_or_default(), **n))
                    .copied()
                else {
                    continue;
                };
                *sends.entry(source).or_default() += 1;
                plan.entry(source).pushes.push((name.clone(), targets));
            } else if holders.len() > r {
                plan.over_replicated += 1;
                let mut excess = holders;
                excess.sort_by_key(|n| {
                    let l = load.get(n).copied().unwrap_or_default();
                    (std::cmp::Reverse(l), *n)
                });
                let surplus = excess.len() - r;
                for node in excess.into_iter().take(surplus) {
                    if let Some(l) = load.get_mut(&node) {
                        *l = l.saturating_sub(1);
                    }
                    plan.entry(node).deletes.push(name.clone());
                }
            }
        }

        for (node, held) in holdings {
            for name in held {
                if !is_kept(files.get(name)) {
                    plan.orphans += 1;
                    plan.entry(*node).deletes.push(name.clone());
                }
            }
        }

        plan.nodes.retain(|_, p| !p.is_empty());
        plan
    }
}

/// Files a node may keep: complete ones and stores still in flight.
fn is_kept(status: Option<&FileStatus>) -> bool {
    matches!(
        status,
        Some(FileStatus::StoreComplete) | Some(FileStatus::StoreInProgress)
    )
}
