//! Event dispatch and persistence.

mod bus;
mod store;
mod targets;

pub use bus::{EventBus, EventTarget, Target};
pub use store::{EventStore, MemoryEventStore, RedisEventStore, StoredEvent};
pub use targets::{ChannelTarget, LogSink};
