//! Connectivity tracking module.
//!
//! Tracks which channels are live for every managed node and merges the
//! per-server views when running as part of a cluster.

mod aggregator;
mod tracker;

pub use aggregator::{MergedChange, PeerStateAggregator};
pub use tracker::{ChannelChange, ConnectivityTable, ConnectivityTracker};
