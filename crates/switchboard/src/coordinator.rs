//! The coordination core.
//!
//! [`Coordinator`] owns the connectivity tables, the subscription registry and
//! the collaborator handles. It is the only writer of that state; callers share
//! it as [`SharedCoordinator`] and take the write lock for every mutation, so
//! each check-then-update runs to completion before the next one starts.
//!
//! ## Flow
//! ```text
//! channel handler ──Set/Clear──▶ Coordinator ──▶ ConnectivityTracker
//!                                    │                 │ (cluster) recompute merged view
//!                                    │                 ▼
//!                                    ├──────────▶ EventBus ──▶ subscribers / store / peers
//!                                    └──raw change──▶ PeerTransport (local origin only)
//! ```

use std::sync::Arc;

use meshward_common::constants::power_markers;
use meshward_common::{
    ChannelMask, DispatchKey, Event, EventFlags, MeshId, NodeId, NodeState, PowerRecord,
    PowerState, ServerId,
};
use tokio::sync::RwLock;

use crate::cluster::{PeerMessage, PeerTransport};
use crate::connectivity::{ChannelChange, ConnectivityTracker};
use crate::events::{EventBus, EventStore};

/// Coordinator shared between request handlers and the peer receiver
pub type SharedCoordinator = Arc<RwLock<Coordinator>>;

/// Where a connectivity change was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A channel handler on this server
    Local,
    /// Relayed by another cluster member
    Peer(ServerId),
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

fn node_keys(mesh_id: &MeshId) -> [DispatchKey; 2] {
    [DispatchKey::wildcard(), DispatchKey::from(mesh_id)]
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct Coordinator {
    server_id: ServerId,
    tracker: ConnectivityTracker,
    bus: EventBus,
}

impl Coordinator {
    /// Standalone server when `peers` is empty, cluster member otherwise
    pub fn new(server_id: ServerId, peers: impl IntoIterator<Item = ServerId>) -> Self {
        let peers: Vec<ServerId> = peers.into_iter().filter(|p| *p != server_id).collect();
        let tracker = if peers.is_empty() {
            ConnectivityTracker::standalone(server_id.clone())
        } else {
            ConnectivityTracker::clustered(server_id.clone(), peers)
        };

        Self {
            server_id,
            tracker,
            bus: EventBus::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.bus.attach_store(store);
        self
    }

    pub fn with_peers(mut self, peers: Arc<dyn PeerTransport>) -> Self {
        self.bus.attach_peers(peers);
        self
    }

    pub fn into_shared(self) -> SharedCoordinator {
        Arc::new(RwLock::new(self))
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn is_clustered(&self) -> bool {
        self.tracker.is_clustered()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn tracked_nodes(&self) -> usize {
        self.tracker.tracked_nodes()
    }

    /// A channel to `node_id` is up
    pub fn set_connectivity_state(
        &mut self,
        mesh_id: &MeshId,
        node_id: &NodeId,
        connect_time: i64,
        mask: ChannelMask,
        power: PowerState,
        origin: Origin,
    ) {
        let server = self.server_for(&origin);
        let Some(change) = self.tracker.set(&server, mesh_id, node_id, mask, power) else {
            tracing::debug!(node = %node_id, server = %server, "Set ignored");
            return;
        };

        tracing::debug!(
            node = %node_id,
            server = %server,
            conn = change.state.mask.bits(),
            pwr = change.state.power.value(),
            "Connectivity set"
        );

        self.publish(node_id, &change, connect_time, Some(connect_time), &origin);

        if self.is_clustered() && origin.is_local() {
            self.forward(PeerMessage::SetConnectivityState {
                mesh_id: mesh_id.clone(),
                node_id: node_id.clone(),
                connect_time,
                mask,
                power,
            });
        }
    }

    /// A channel to `node_id` went down
    pub fn clear_connectivity_state(
        &mut self,
        mesh_id: &MeshId,
        node_id: &NodeId,
        mask: ChannelMask,
        origin: Origin,
    ) {
        let server = self.server_for(&origin);
        let Some(change) = self.tracker.clear(&server, mesh_id, node_id, mask) else {
            tracing::debug!(node = %node_id, server = %server, "Clear ignored");
            return;
        };

        tracing::debug!(
            node = %node_id,
            server = %server,
            conn = change.state.mask.bits(),
            pwr = change.state.power.value(),
            "Connectivity cleared"
        );

        self.publish(node_id, &change, now_ms(), None, &origin);

        if self.is_clustered() && origin.is_local() {
            self.forward(PeerMessage::ClearConnectivityState {
                mesh_id: mesh_id.clone(),
                node_id: node_id.clone(),
                mask,
            });
        }
    }

    /// Current connectivity of a node (merged across the cluster when clustered)
    pub fn get_connectivity_state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.tracker.get(node_id)
    }

    /// Peer server able to reach `node_id` over one of the channels in `mask`
    pub fn get_routing_server_id(
        &self,
        node_id: &NodeId,
        mask: ChannelMask,
    ) -> Option<(ServerId, MeshId)> {
        self.tracker.routing_server(node_id, mask)
    }

    pub fn dispatch(&self, keys: &[DispatchKey], source: &str, event: Event) {
        self.bus.dispatch(keys, source, event, false);
    }

    /// Apply a message relayed by another cluster member
    pub fn apply_peer_message(&mut self, from: &ServerId, message: PeerMessage) {
        if *from == self.server_id {
            return;
        }

        let origin = Origin::Peer(from.clone());
        match message {
            PeerMessage::SetConnectivityState {
                mesh_id,
                node_id,
                connect_time,
                mask,
                power,
            } => self.set_connectivity_state(&mesh_id, &node_id, connect_time, mask, power, origin),
            PeerMessage::ClearConnectivityState {
                mesh_id,
                node_id,
                mask,
            } => self.clear_connectivity_state(&mesh_id, &node_id, mask, origin),
            PeerMessage::Event { ids, source, event } => {
                let event = event.with_flags(EventFlags::SUPPRESSED);
                self.bus.dispatch(&ids, &source, event, true);
            }
        }
    }

    /// Every node's power is unknown until its channels report again
    pub fn server_started(&self) {
        self.record_power(PowerRecord::server_marker(now_ms(), power_markers::SERVER_STARTED));
    }

    pub fn server_stopped(&self) {
        self.dispatch(
            &[DispatchKey::wildcard()],
            self.server_id.as_str(),
            Event::server_stopped(),
        );
        self.record_power(PowerRecord::server_marker(now_ms(), power_markers::SERVER_STOPPED));
    }

    fn server_for(&self, origin: &Origin) -> ServerId {
        match origin {
            Origin::Local => self.server_id.clone(),
            Origin::Peer(server) => server.clone(),
        }
    }

    /// Persist and announce a table change.
    ///
    /// Standalone: one unsuppressed event per visible change.
    /// Clustered: the merged view is recomputed and announces itself; only
    /// local changes are persisted, peers persist their own.
    fn publish(
        &mut self,
        node_id: &NodeId,
        change: &ChannelChange,
        time: i64,
        connect_time: Option<i64>,
        origin: &Origin,
    ) {
        if !self.is_clustered() {
            if change.power_changed() {
                self.record_power(PowerRecord::node(
                    node_id,
                    time,
                    change.state.power,
                    change.old_power,
                ));
            }
            if change.is_visible() {
                let keys = node_keys(&change.state.mesh_id);
                let event = Event::node_connect(node_id, &change.state, connect_time);
                self.bus.dispatch(&keys, self.server_id.as_str(), event, false);
            }
            return;
        }

        if origin.is_local() && change.power_changed() {
            let record = PowerRecord::node(node_id, time, change.state.power, change.old_power)
                .with_server(Some(&self.server_id));
            self.record_power(record);
        }

        for merged in self.tracker.recompute([node_id]) {
            let keys = node_keys(&merged.state.mesh_id);
            let event = Event::node_connect(&merged.node_id, &merged.state, connect_time)
                .with_flags(EventFlags::SUPPRESSED);
            self.bus.dispatch(&keys, self.server_id.as_str(), event, false);
        }
    }

    fn record_power(&self, record: PowerRecord) {
        if let Some(store) = self.bus.store() {
            let record = match self.is_clustered() {
                true if record.server.is_none() => record.with_server(Some(&self.server_id)),
                _ => record,
            };
            store.insert_power_record(record);
        }
    }

    fn forward(&self, message: PeerMessage) {
        if let Some(peers) = self.bus.peers() {
            peers.broadcast(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MemoryEventStore, Target};
    use crate::testing::{RecordingTarget, RecordingTransport};

    struct Harness {
        coordinator: Coordinator,
        store: Arc<MemoryEventStore>,
        peers: Arc<RecordingTransport>,
        events: Arc<RecordingTarget>,
    }

    fn harness(peers: &[&str]) -> Harness {
        let store = Arc::new(MemoryEventStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let events = Arc::new(RecordingTarget::default());

        let mut coordinator = Coordinator::new(
            ServerId::new("a"),
            peers.iter().map(|p| ServerId::new(*p)),
        )
        .with_store(store.clone());
        if !peers.is_empty() {
            coordinator = coordinator.with_peers(transport.clone());
        }

        let target: Target = events.clone();
        coordinator
            .bus_mut()
            .subscribe(&[DispatchKey::wildcard()], &target);

        Harness {
            coordinator,
            store,
            peers: transport,
            events,
        }
    }

    fn mesh() -> MeshId {
        MeshId::parse("mesh//mesh1").unwrap()
    }

    fn node() -> NodeId {
        NodeId::parse("node//nodeA").unwrap()
    }

    #[test]
    fn test_standalone_agent_priority_scenario() {
        let mut h = harness(&[]);
        let t = 1_700_000_000_000;

        h.coordinator.set_connectivity_state(
            &mesh(),
            &node(),
            t,
            ChannelMask::AGENT,
            PowerState::S0,
            Origin::Local,
        );
        h.coordinator.set_connectivity_state(
            &mesh(),
            &node(),
            t,
            ChannelMask::TUNNEL,
            PowerState::Unknown,
            Origin::Local,
        );

        let state = h.coordinator.get_connectivity_state(&node()).unwrap();
        assert_eq!(state.mask.bits(), 3);
        assert_eq!(state.power, PowerState::S0);
        assert_eq!(h.events.count(), 2);

        h.coordinator.clear_connectivity_state(&mesh(), &node(), ChannelMask::AGENT, Origin::Local);

        let state = h.coordinator.get_connectivity_state(&node()).unwrap();
        assert_eq!(state.mask.bits(), 2);
        assert_eq!(state.power, PowerState::Unknown);

        let events = h.events.events();
        assert_eq!(events.len(), 3);
        let last = events[2].node.as_ref().unwrap();
        assert_eq!(last.mask.bits(), 2);
        assert_eq!(last.power, PowerState::Unknown);
        assert!(!events[2].flags.no_log);
        assert_eq!(events[2].ids, vec![DispatchKey::wildcard(), DispatchKey::from(&mesh())]);
    }

    #[test]
    fn test_standalone_power_history() {
        let mut h = harness(&[]);
        h.coordinator.set_connectivity_state(
            &mesh(),
            &node(),
            10,
            ChannelMask::AGENT,
            PowerState::S0,
            Origin::Local,
        );
        h.coordinator.set_connectivity_state(
            &mesh(),
            &node(),
            20,
            ChannelMask::AGENT,
            PowerState::S3,
            Origin::Local,
        );
        h.coordinator.set_connectivity_state(
            &mesh(),
            &node(),
            30,
            ChannelMask::AGENT,
            PowerState::S3,
            Origin::Local,
        );

        let records = h.store.power_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].old_power, None);
        assert_eq!(records[0].time, 10);
        assert_eq!(records[1].power, PowerState::S3);
        assert_eq!(records[1].old_power, Some(PowerState::S0));
        assert!(records[1].server.is_none());

        // Unchanged mask and power: no third event
        assert_eq!(h.events.count(), 2);
        assert!(h.peers.sent().is_empty());
    }

    #[test]
    fn test_clearing_last_channel_removes_node() {
        let mut h = harness(&[]);
        h.coordinator.set_connectivity_state(
            &mesh(),
            &node(),
            1,
            ChannelMask::DIRECT,
            PowerState::S5,
            Origin::Local,
        );
        h.coordinator.clear_connectivity_state(
            &mesh(),
            &node(),
            ChannelMask::DIRECT,
            Origin::Local,
        );

        assert!(h.coordinator.get_connectivity_state(&node()).is_none());
        assert_eq!(h.coordinator.tracked_nodes(), 0);
        let last = h.events.events().pop().unwrap();
        assert_eq!(last.node.unwrap().mask, ChannelMask::NONE);
    }

    #[test]
    fn test_cluster_local_change_forwards_and_suppresses() {
        let mut h = harness(&["b", "c"]);
        h.coordinator.set_connectivity_state(
            &mesh(),
            &node(),
            5,
            ChannelMask::AGENT,
            PowerState::S0,
            Origin::Local,
        );

        let sent = h.peers.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], PeerMessage::SetConnectivityState { .. }));

        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].flags, EventFlags::SUPPRESSED);
        assert!(h.store.events().is_empty());

        let records = h.store.power_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].server, Some(ServerId::new("a")));
    }

    #[test]
    fn test_cluster_merges_peer_slices() {
        let mut h = harness(&["b", "c"]);
        h.coordinator.set_connectivity_state(
            &mesh(),
            &node(),
            1,
            ChannelMask::AGENT,
            PowerState::S4,
            Origin::Local,
        );
        h.coordinator.apply_peer_message(
            &ServerId::new("b"),
            PeerMessage::SetConnectivityState {
                mesh_id: mesh(),
                node_id: node(),
                connect_time: 2,
                mask: ChannelMask::TUNNEL,
                power: PowerState::S2,
            },
        );
        h.coordinator.apply_peer_message(
            &ServerId::new("c"),
            PeerMessage::SetConnectivityState {
                mesh_id: mesh(),
                node_id: node(),
                connect_time: 3,
                mask: ChannelMask::DIRECT,
                power: PowerState::Unknown,
            },
        );

        let state = h.coordinator.get_connectivity_state(&node()).unwrap();
        assert_eq!(state.mask, ChannelMask::ALL);
        assert_eq!(state.power, PowerState::S2);

        // Peer-originated changes are neither forwarded nor persisted here
        assert_eq!(h.peers.sent().len(), 1);
        assert_eq!(h.store.power_records().len(), 1);

        let (server, _) = h
            .coordinator
            .get_routing_server_id(&node(), ChannelMask::TUNNEL)
            .unwrap();
        assert_eq!(server, ServerId::new("b"));
    }

    #[test]
    fn test_unknown_peer_is_ignored() {
        let mut h = harness(&["b"]);
        h.coordinator.apply_peer_message(
            &ServerId::new("intruder"),
            PeerMessage::SetConnectivityState {
                mesh_id: mesh(),
                node_id: node(),
                connect_time: 1,
                mask: ChannelMask::AGENT,
                power: PowerState::S0,
            },
        );

        assert!(h.coordinator.get_connectivity_state(&node()).is_none());
        assert_eq!(h.events.count(), 0);
    }

    #[test]
    fn test_peer_event_is_delivered_but_not_stored_or_forwarded() {
        let mut h = harness(&["b"]);
        h.coordinator.apply_peer_message(
            &ServerId::new("b"),
            PeerMessage::Event {
                ids: vec![DispatchKey::wildcard()],
                source: "b".to_string(),
                event: Event::new("user", "login"),
            },
        );

        assert_eq!(h.events.count(), 1);
        assert!(h.store.events().is_empty());
        assert!(h.peers.sent().is_empty());
    }

    #[test]
    fn test_server_lifecycle_markers() {
        let h = harness(&["b"]);
        h.coordinator.server_started();
        h.coordinator.server_stopped();

        let records = h.store.power_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].marker, Some(power_markers::SERVER_STARTED));
        assert_eq!(records[1].marker, Some(power_markers::SERVER_STOPPED));
        assert_eq!(records[1].node, "*");
        assert_eq!(records[1].server, Some(ServerId::new("a")));

        assert_eq!(h.store.events().len(), 1);
        assert_eq!(h.events.events()[0].action, "stopped");
        assert_eq!(h.peers.sent().len(), 1);
    }
}
