//! Cluster-wide connectivity merge.
//!
//! Every server owns one slice of the peer table. The merged view of a node
//! folds all slices in ascending `ServerId` order:
//! - mask: OR of every slice's mask
//! - power: lowest non-zero combined power, `Unknown` when none is known
//! - mesh: taken from the last slice that carries the node
//!
//! Each server writes only its own slice; the aggregator reads across them.

use std::collections::{BTreeMap, HashMap};

use meshward_common::{ChannelMask, MeshId, NodeId, NodeState, PowerState, ServerId};

use super::tracker::ConnectivityTable;

/// A node whose merged mask or power changed during a recompute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedChange {
    pub node_id: NodeId,
    /// New merged state. Mask is empty when no server sees the node anymore.
    pub state: NodeState,
}

/// Peer table plus the merged per-node view derived from it
#[derive(Debug, Default)]
pub struct PeerStateAggregator {
    slices: BTreeMap<ServerId, ConnectivityTable>,
    merged: HashMap<NodeId, NodeState>,
}

impl PeerStateAggregator {
    pub fn new(servers: impl IntoIterator<Item = ServerId>) -> Self {
        Self {
            slices: servers
                .into_iter()
                .map(|server| (server, ConnectivityTable::new()))
                .collect(),
            merged: HashMap::new(),
        }
    }

    pub(crate) fn slice_mut(&mut self, server: &ServerId) -> Option<&mut ConnectivityTable> {
        self.slices.get_mut(server)
    }

    pub fn merged(&self, node_id: &NodeId) -> Option<&NodeState> {
        self.merged.get(node_id)
    }

    pub fn merged_len(&self) -> usize {
        self.merged.len()
    }

    /// Fold every slice's entry for `node_id`
    pub fn fold(&self, node_id: &NodeId) -> Option<NodeState> {
        let mut merged: Option<NodeState> = None;

        for entry in self.slices.values().filter_map(|slice| slice.get(node_id)) {
            let power = entry.combined_power();
            match merged.as_mut() {
                None => merged = Some(entry.state()),
                Some(state) => {
                    state.mask |= entry.mask;
                    if power.is_known() && (!state.power.is_known() || power < state.power) {
                        state.power = power;
                    }
                    state.mesh_id = entry.mesh_id.clone();
                }
            }
        }

        merged
    }

    /// Refresh the merged view for `nodes` and report the ones whose mask or power moved
    pub fn recompute<'a>(&mut self, nodes: impl IntoIterator<Item = &'a NodeId>) -> Vec<MergedChange> {
        let mut changes = Vec::new();

        for node_id in nodes {
            let previous = self.merged.get(node_id).cloned();
            let current = self.fold(node_id);

            let change = match (&previous, &current) {
                (None, None) => None,
                (Some(old), Some(new)) if old.mask == new.mask && old.power == new.power => None,
                (_, Some(new)) => Some(new.clone()),
                (Some(old), None) => Some(NodeState {
                    mesh_id: old.mesh_id.clone(),
                    mask: ChannelMask::NONE,
                    power: PowerState::Unknown,
                }),
            };

            match current {
                Some(state) => {
                    self.merged.insert(node_id.clone(), state);
                }
                None => {
                    self.merged.remove(node_id);
                }
            }

            if let Some(state) = change {
                tracing::trace!(
                    node = %node_id,
                    conn = state.mask.bits(),
                    pwr = state.power.value(),
                    "Merged connectivity changed"
                );
                changes.push(MergedChange {
                    node_id: node_id.clone(),
                    state,
                });
            }
        }

        changes
    }

    /// First peer (never `local`) whose slice reaches `node_id` over a channel in `mask`
    pub fn routing_server(
        &self,
        local: &ServerId,
        node_id: &NodeId,
        mask: ChannelMask,
    ) -> Option<(ServerId, MeshId)> {
        self.slices
            .iter()
            .filter(|(server, _)| *server != local)
            .find_map(|(server, slice)| {
                slice
                    .get(node_id)
                    .filter(|entry| entry.mask.intersects(mask))
                    .map(|entry| (server.clone(), entry.mesh_id.clone()))
            })
    }
}
