//! Cluster coordination modules.
//!
//! Implements:
//! - Peer wire messages (raw state changes and forwarded events)
//! - UDP peer transport (fire-and-forget broadcast, inbound receiver loop)

mod message;
mod transport;

pub use message::{PeerEnvelope, PeerMessage};
pub use transport::{PeerLink, PeerTransport, UdpPeerTransport};
