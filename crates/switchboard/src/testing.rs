//! Test doubles shared by unit tests.

use std::sync::Mutex;

use meshward_common::Event;

use crate::cluster::{PeerMessage, PeerTransport};
use crate::events::EventTarget;

/// Remembers every event it receives
#[derive(Default)]
pub struct RecordingTarget {
    received: Mutex<Vec<(String, Event)>>,
}

impl RecordingTarget {
    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<Event> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl EventTarget for RecordingTarget {
    fn receive(&self, source: &str, event: &Event) {
        self.received
            .lock()
            .unwrap()
            .push((source.to_string(), event.clone()));
    }
}

/// Remembers every message broadcast to peers
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<PeerMessage>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<PeerMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl PeerTransport for RecordingTransport {
    fn broadcast(&self, message: PeerMessage) {
        self.sent.lock().unwrap().push(message);
    }
}
