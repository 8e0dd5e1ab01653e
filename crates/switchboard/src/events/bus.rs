//! Event dispatch bus.
//!
//! Subscribers register a target under one or more dispatch keys. A dispatch
//! reaches every target registered under any of the event's keys exactly once,
//! is persisted unless `nolog` is set, and is forwarded to peer servers unless
//! it came from a peer or carries `nopeers`.

use std::collections::HashMap;
use std::sync::Arc;

use meshward_common::{DispatchKey, Event};

use super::store::EventStore;
use crate::cluster::{PeerMessage, PeerTransport};

/// Anything that wants to hear about events
pub trait EventTarget: Send + Sync {
    fn receive(&self, source: &str, event: &Event);
}

/// Shared handle to a subscriber. Identity is the handle's address.
pub type Target = Arc<dyn EventTarget>;

fn same_target(a: &Target, b: &Target) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Subscription registry plus fan-out
#[derive(Default)]
pub struct EventBus {
    subscriptions: HashMap<DispatchKey, Vec<Target>>,
    /// Persistence; dispatch is a no-op until one is attached
    store: Option<Arc<dyn EventStore>>,
    /// Peer forwarding; `None` when not clustered
    peers: Option<Arc<dyn PeerTransport>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_store(&mut self, store: Arc<dyn EventStore>) {
        self.store = Some(store);
    }

    pub fn attach_peers(&mut self, peers: Arc<dyn PeerTransport>) {
        self.peers = Some(peers);
    }

    pub fn store(&self) -> Option<&Arc<dyn EventStore>> {
        self.store.as_ref()
    }

    pub fn peers(&self) -> Option<&Arc<dyn PeerTransport>> {
        self.peers.as_ref()
    }

    /// Register `target` under every key in `keys`
    pub fn subscribe(&mut self, keys: &[DispatchKey], target: &Target) {
        tracing::trace!(keys = ?keys, "Subscribe");
        for key in keys {
            let targets = self.subscriptions.entry(key.clone()).or_default();
            if !targets.iter().any(|t| same_target(t, target)) {
                targets.push(target.clone());
            }
        }
    }

    /// Remove `target` from every key in `keys`
    pub fn unsubscribe(&mut self, keys: &[DispatchKey], target: &Target) {
        tracing::trace!(keys = ?keys, "Unsubscribe");
        for key in keys {
            if let Some(targets) = self.subscriptions.get_mut(key) {
                targets.retain(|t| !same_target(t, target));
                if targets.is_empty() {
                    self.subscriptions.remove(key);
                }
            }
        }
    }

    /// Drop every subscriber of `key`
    pub fn unsubscribe_key(&mut self, key: &DispatchKey) {
        tracing::trace!(key = %key, "Unsubscribe key");
        self.subscriptions.remove(key);
    }

    /// Remove `target` from every key it is registered under
    pub fn unsubscribe_all(&mut self, target: &Target) {
        self.subscriptions.retain(|_, targets| {
            targets.retain(|t| !same_target(t, target));
            !targets.is_empty()
        });
    }

    pub fn subscriber_count(&self, key: &DispatchKey) -> usize {
        self.subscriptions.get(key).map_or(0, Vec::len)
    }

    /// Hand `event` to each distinct target under `keys`, in first-seen order.
    /// Returns how many targets were reached.
    pub fn deliver(&self, keys: &[DispatchKey], source: &str, event: &Event) -> usize {
        let mut delivered: Vec<&Target> = Vec::new();

        for target in keys
            .iter()
            .filter_map(|key| self.subscriptions.get(key))
            .flatten()
        {
            if delivered.iter().any(|t| same_target(t, target)) {
                continue;
            }
            target.receive(source, event);
            delivered.push(target);
        }

        delivered.len()
    }

    /// Persist, fan out, and forward an event
    pub fn dispatch(&self, keys: &[DispatchKey], source: &str, mut event: Event, from_peer: bool) {
        let Some(store) = &self.store else {
            tracing::debug!(action = %event.action, "Event store not ready, dropping event");
            return;
        };

        event.ids = keys.to_vec();
        event.time = chrono::Utc::now().timestamp_millis();

        if !event.flags.no_log {
            store.store_event(keys, source, &event);
        }

        let delivered = self.deliver(keys, source, &event);

        tracing::debug!(
            keys = ?keys,
            action = %event.action,
            delivered = delivered,
            from_peer = from_peer,
            "Dispatched event"
        );

        if from_peer || event.flags.no_peers {
            return;
        }
        if let Some(peers) = &self.peers {
            peers.broadcast(PeerMessage::Event {
                ids: keys.to_vec(),
                source: source.to_string(),
                event,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventStore;
    use crate::testing::{RecordingTarget, RecordingTransport};
    use meshward_common::EventFlags;

    fn mesh_key() -> DispatchKey {
        DispatchKey::new("mesh//m1")
    }

    fn ready_bus() -> (EventBus, Arc<MemoryEventStore>, Arc<RecordingTransport>) {
        let store = Arc::new(MemoryEventStore::new());
        let peers = Arc::new(RecordingTransport::default());
        let mut bus = EventBus::new();
        bus.attach_store(store.clone());
        bus.attach_peers(peers.clone());
        (bus, store, peers)
    }

    #[test]
    fn test_target_on_two_keys_gets_one_delivery() {
        let (mut bus, _, _) = ready_bus();
        let recorder = Arc::new(RecordingTarget::default());
        let target: Target = recorder.clone();
        bus.subscribe(&[DispatchKey::wildcard(), mesh_key()], &target);

        bus.dispatch(
            &[DispatchKey::wildcard(), mesh_key()],
            "server",
            Event::new("node", "test"),
            false,
        );

        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_subscribe_twice_is_a_set() {
        let mut bus = EventBus::new();
        let target: Target = Arc::new(RecordingTarget::default());
        bus.subscribe(&[mesh_key()], &target);
        bus.subscribe(&[mesh_key()], &target);
        assert_eq!(bus.subscriber_count(&mesh_key()), 1);
    }

    #[test]
    fn test_unsubscribe_variants() {
        let mut bus = EventBus::new();
        let a: Target = Arc::new(RecordingTarget::default());
        let b: Target = Arc::new(RecordingTarget::default());
        bus.subscribe(&[DispatchKey::wildcard(), mesh_key()], &a);
        bus.subscribe(&[mesh_key()], &b);

        bus.unsubscribe(&[mesh_key()], &a);
        assert_eq!(bus.subscriber_count(&mesh_key()), 1);
        assert_eq!(bus.subscriber_count(&DispatchKey::wildcard()), 1);

        bus.unsubscribe_all(&a);
        assert_eq!(bus.subscriber_count(&DispatchKey::wildcard()), 0);

        bus.unsubscribe_key(&mesh_key());
        assert_eq!(bus.subscriber_count(&mesh_key()), 0);
    }

    #[test]
    fn test_dispatch_without_store_is_noop() {
        let mut bus = EventBus::new();
        let recorder = Arc::new(RecordingTarget::default());
        let target: Target = recorder.clone();
        bus.subscribe(&[DispatchKey::wildcard()], &target);

        bus.dispatch(&[DispatchKey::wildcard()], "server", Event::new("x", "y"), false);
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn test_dispatch_persists_and_forwards() {
        let (bus, store, peers) = ready_bus();

        bus.dispatch(&[mesh_key()], "server", Event::new("node", "changed"), false);

        let stored = store.events();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].event.ids, vec![mesh_key()]);
        assert!(stored[0].event.time > 0);
        assert_eq!(peers.sent().len(), 1);
    }

    #[test]
    fn test_suppression_flags() {
        let (bus, store, peers) = ready_bus();

        let quiet = Event::new("node", "quiet").with_flags(EventFlags::SUPPRESSED);
        bus.dispatch(&[mesh_key()], "server", quiet, false);
        assert!(store.events().is_empty());
        assert!(peers.sent().is_empty());

        bus.dispatch(&[mesh_key()], "peer-b", Event::new("node", "relayed"), true);
        assert_eq!(store.events().len(), 1);
        assert!(peers.sent().is_empty());
    }
}
