//! # Switchboard - Meshward coordination engine
//!
//! Tracks which channels (agent, hardware tunnel, direct hardware link) are
//! live for every managed node, merges the per-server views across a cluster,
//! fans change events out to subscribers, and mints/validates session cookies.
//!
//! ## Architecture
//! ```text
//! channel handlers ──▶ Coordinator ──▶ EventBus ──▶ subscribers
//!                          │    ▲          │
//!                          │    │          └──▶ Redis (events, power history)
//!                          ▼    │
//!                      UDP peer transport ◀──▶ other servers
//! ```

pub mod cluster;
pub mod config;
pub mod connectivity;
pub mod cookie;
pub mod coordinator;
pub mod events;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;
