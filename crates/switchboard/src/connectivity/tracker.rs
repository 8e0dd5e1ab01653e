//! Node connectivity tracking.
//!
//! A [`ConnectivityTable`] holds one server's view of which channels are live
//! for each node. The [`ConnectivityTracker`] owns either a single table
//! (standalone server) or one table per cluster member (through the
//! [`PeerStateAggregator`]).

use std::collections::HashMap;

use meshward_common::{
    ChannelMask, ConnectivityEntry, MeshId, NodeId, NodeState, PowerState, ServerId,
};

use super::aggregator::{MergedChange, PeerStateAggregator};

/// Result of applying a channel change to one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelChange {
    /// State after the change. The mask is empty when the node was dropped.
    pub state: NodeState,
    /// Live channel set changed
    pub mask_changed: bool,
    /// Combined power before the change, `None` when the entry was created
    pub old_power: Option<PowerState>,
}

impl ChannelChange {
    pub fn power_changed(&self) -> bool {
        self.old_power != Some(self.state.power)
    }

    /// Mask or combined power changed, so subscribers need to hear about it
    pub fn is_visible(&self) -> bool {
        self.mask_changed || self.power_changed()
    }
}

/// One server's connectivity entries, keyed by node
#[derive(Debug, Clone, Default)]
pub struct ConnectivityTable {
    entries: HashMap<NodeId, ConnectivityEntry>,
}

impl ConnectivityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&ConnectivityEntry> {
        self.entries.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &ConnectivityEntry)> {
        self.entries.iter()
    }

    /// Mark `mask` live for a node, creating its entry on first sight
    pub fn set(
        &mut self,
        mesh_id: &MeshId,
        node_id: &NodeId,
        mask: ChannelMask,
        power: PowerState,
    ) -> Option<ChannelChange> {
        if mask.is_empty() {
            return None;
        }

        let (old_mask, old_power) = match self.entries.get(node_id) {
            Some(entry) => (entry.mask, Some(entry.combined_power())),
            None => (ChannelMask::NONE, None),
        };

        let entry = self
            .entries
            .entry(node_id.clone())
            .or_insert_with(|| ConnectivityEntry::new(mesh_id.clone()));
        entry.mesh_id = mesh_id.clone();
        entry.connect(mask, power);

        Some(ChannelChange {
            state: entry.state(),
            mask_changed: entry.mask != old_mask,
            old_power,
        })
    }

    /// Drop `mask` from a node's live channels, removing the entry when none remain.
    /// Unknown nodes are ignored.
    pub fn clear(
        &mut self,
        mesh_id: &MeshId,
        node_id: &NodeId,
        mask: ChannelMask,
    ) -> Option<ChannelChange> {
        if mask.is_empty() {
            return None;
        }

        let entry = self.entries.get_mut(node_id)?;
        let old_mask = entry.mask;
        let old_power = entry.combined_power();

        entry.disconnect(mask);
        let state = NodeState {
            mesh_id: mesh_id.clone(),
            mask: entry.mask,
            power: entry.combined_power(),
        };

        if entry.mask.is_empty() {
            self.entries.remove(node_id);
        }

        Some(ChannelChange {
            mask_changed: state.mask != old_mask,
            state,
            old_power: Some(old_power),
        })
    }
}

enum TrackerMode {
    Standalone(ConnectivityTable),
    Clustered(PeerStateAggregator),
}

/// Authoritative connectivity state for this server
pub struct ConnectivityTracker {
    /// This server's identity
    local: ServerId,
    mode: TrackerMode,
}

impl ConnectivityTracker {
    /// Single-server tracker: one authoritative table
    pub fn standalone(local: ServerId) -> Self {
        Self {
            local,
            mode: TrackerMode::Standalone(ConnectivityTable::new()),
        }
    }

    /// Cluster tracker: one slice per known server, including this one
    pub fn clustered(local: ServerId, peers: impl IntoIterator<Item = ServerId>) -> Self {
        let servers = peers.into_iter().chain(std::iter::once(local.clone()));
        Self {
            local,
            mode: TrackerMode::Clustered(PeerStateAggregator::new(servers)),
        }
    }

    pub fn is_clustered(&self) -> bool {
        matches!(self.mode, TrackerMode::Clustered(_))
    }

    /// Table written by `server`; `None` for servers we do not know
    fn table_for(&mut self, server: &ServerId) -> Option<&mut ConnectivityTable> {
        match &mut self.mode {
            TrackerMode::Standalone(table) => (*server == self.local).then_some(table),
            TrackerMode::Clustered(aggregator) => aggregator.slice_mut(server),
        }
    }

    pub fn set(
        &mut self,
        server: &ServerId,
        mesh_id: &MeshId,
        node_id: &NodeId,
        mask: ChannelMask,
        power: PowerState,
    ) -> Option<ChannelChange> {
        self.table_for(server)?.set(mesh_id, node_id, mask, power)
    }

    pub fn clear(
        &mut self,
        server: &ServerId,
        mesh_id: &MeshId,
        node_id: &NodeId,
        mask: ChannelMask,
    ) -> Option<ChannelChange> {
        self.table_for(server)?.clear(mesh_id, node_id, mask)
    }

    /// Current view of a node: the local table when standalone, the merged view when clustered
    pub fn get(&self, node_id: &NodeId) -> Option<NodeState> {
        match &self.mode {
            TrackerMode::Standalone(table) => table.get(node_id).map(ConnectivityEntry::state),
            TrackerMode::Clustered(aggregator) => aggregator.merged(node_id).cloned(),
        }
    }

    /// Refresh the merged view for `nodes`. Always empty when standalone.
    pub fn recompute<'a>(
        &mut self,
        nodes: impl IntoIterator<Item = &'a NodeId>,
    ) -> Vec<MergedChange> {
        match &mut self.mode {
            TrackerMode::Standalone(_) => Vec::new(),
            TrackerMode::Clustered(aggregator) => aggregator.recompute(nodes),
        }
    }

    /// Peer server that can reach `node_id` over any channel in `mask`
    pub fn routing_server(&self, node_id: &NodeId, mask: ChannelMask) -> Option<(ServerId, MeshId)> {
        match &self.mode {
            TrackerMode::Standalone(_) => None,
            TrackerMode::Clustered(aggregator) => {
                aggregator.routing_server(&self.local, node_id, mask)
            }
        }
    }

    /// Nodes currently visible from this server
    pub fn tracked_nodes(&self) -> usize {
        match &self.mode {
            TrackerMode::Standalone(table) => table.len(),
            TrackerMode::Clustered(aggregator) => aggregator.merged_len(),
        }
    }
}
