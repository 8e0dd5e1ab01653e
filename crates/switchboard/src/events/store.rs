//! Event and power-history persistence.
//!
//! Writes are fire-and-forget: callers never wait on the store, and failures are
//! logged here instead of travelling back into the mutation path.

use std::sync::Mutex;

use meshward_common::constants::redis_keys;
use meshward_common::{DispatchKey, Event, PowerRecord};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

/// Persistence collaborator used by the dispatch bus and the tracker
pub trait EventStore: Send + Sync {
    fn store_event(&self, keys: &[DispatchKey], source: &str, event: &Event);

    fn insert_power_record(&self, record: PowerRecord);
}

/// Persisted event row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub keys: Vec<DispatchKey>,
    pub source: String,
    pub event: Event,
}

/// Redis-backed store: JSON rows pushed onto capped lists
#[derive(Clone)]
pub struct RedisEventStore {
    redis: ConnectionManager,
}

impl RedisEventStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn push(&self, list: &'static str, row: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(list = list, "No async runtime, dropping store write");
            return;
        };

        let mut conn = self.redis.clone();
        runtime.spawn(async move {
            let result: redis::RedisResult<()> = redis::pipe()
                .lpush(list, row)
                .ignore()
                .ltrim(list, 0, redis_keys::LIST_CAP - 1)
                .ignore()
                .query_async(&mut conn)
                .await;

            if let Err(e) = result {
                tracing::warn!(list = list, error = %e, "Failed to persist row");
            }
        });
    }
}

impl EventStore for RedisEventStore {
    fn store_event(&self, keys: &[DispatchKey], source: &str, event: &Event) {
        let row = StoredEvent {
            keys: keys.to_vec(),
            source: source.to_string(),
            event: event.clone(),
        };
        match serde_json::to_string(&row) {
            Ok(json) => self.push(redis_keys::EVENTS, json),
            Err(e) => tracing::error!(error = %e, "Failed to serialize event"),
        }
    }

    fn insert_power_record(&self, record: PowerRecord) {
        match serde_json::to_string(&record) {
            Ok(json) => self.push(redis_keys::POWER, json),
            Err(e) => tracing::error!(error = %e, "Failed to serialize power record"),
        }
    }
}

/// In-process store, kept in insertion order
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<StoredEvent>>,
    power: Mutex<Vec<PowerRecord>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StoredEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn power_records(&self) -> Vec<PowerRecord> {
        self.power.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventStore for MemoryEventStore {
    fn store_event(&self, keys: &[DispatchKey], source: &str, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StoredEvent {
                keys: keys.to_vec(),
                source: source.to_string(),
                event: event.clone(),
            });
    }

    fn insert_power_record(&self, record: PowerRecord) {
        self.power
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshward_common::{NodeId, PowerState};

    #[test]
    fn test_memory_store_keeps_order() {
        let store = MemoryEventStore::new();
        let node = NodeId::parse("node//n").unwrap();
        store.insert_power_record(PowerRecord::node(&node, 1, PowerState::S0, None));
        store.insert_power_record(PowerRecord::node(&node, 2, PowerState::S5, Some(PowerState::S0)));

        let records = store.power_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].old_power, Some(PowerState::S0));
    }

    #[test]
    fn test_stored_event_row_shape() {
        let row = StoredEvent {
            keys: vec![DispatchKey::wildcard()],
            source: "server-1".to_string(),
            event: Event::server_stopped(),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["keys"][0], "*");
        assert_eq!(json["event"]["action"], "stopped");
    }
}
