//! Events fanned out by the dispatch bus.

use serde::{Deserialize, Serialize};

use crate::constants::{actions, etypes};
use crate::types::{ChannelMask, DispatchKey, MeshId, NodeId, NodeState, PowerState};

/// Suppression flags carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventFlags {
    /// Do not persist this event
    #[serde(rename = "nolog", default, skip_serializing_if = "is_false")]
    pub no_log: bool,

    /// Do not forward this event to peer servers
    #[serde(rename = "nopeers", default, skip_serializing_if = "is_false")]
    pub no_peers: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl EventFlags {
    /// Both persistence and peer forwarding suppressed
    pub const SUPPRESSED: EventFlags = EventFlags {
        no_log: true,
        no_peers: true,
    };
}

/// Payload of a `nodeconnect` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnect {
    #[serde(rename = "meshid")]
    pub mesh_id: MeshId,
    #[serde(rename = "nodeid")]
    pub node_id: NodeId,
    #[serde(rename = "conn")]
    pub mask: ChannelMask,
    #[serde(rename = "pwr")]
    pub power: PowerState,
    /// Connect time (ms) reported by the channel, when known
    #[serde(rename = "ct", default, skip_serializing_if = "Option::is_none")]
    pub connect_time: Option<i64>,
}

/// An observable state change addressed to one or more dispatch keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Keys this event was dispatched to (stamped by the bus)
    #[serde(default)]
    pub ids: Vec<DispatchKey>,

    /// Dispatch time in milliseconds since the Unix epoch (stamped by the bus)
    #[serde(default)]
    pub time: i64,

    pub etype: String,

    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeConnect>,

    #[serde(flatten)]
    pub flags: EventFlags,
}

impl Event {
    pub fn new(etype: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            ids: Vec::new(),
            time: 0,
            etype: etype.into(),
            action: action.into(),
            msg: None,
            node: None,
            flags: EventFlags::default(),
        }
    }

    /// Node connectivity/power change
    pub fn node_connect(node_id: &NodeId, state: &NodeState, connect_time: Option<i64>) -> Self {
        let mut event = Self::new(etypes::NODE, actions::NODE_CONNECT);
        event.node = Some(NodeConnect {
            mesh_id: state.mesh_id.clone(),
            node_id: node_id.clone(),
            mask: state.mask,
            power: state.power,
            connect_time,
        });
        event
    }

    /// Server shutdown notice
    pub fn server_stopped() -> Self {
        Self::new(etypes::SERVER, actions::SERVER_STOPPED).with_msg("Server stopped")
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn with_flags(mut self, flags: EventFlags) -> Self {
        self.flags = flags;
        self
    }
}
