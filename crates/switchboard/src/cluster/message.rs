//! Messages exchanged between cluster members.

use meshward_common::{ChannelMask, DispatchKey, Event, MeshId, NodeId, PowerState, ServerId};
use serde::{Deserialize, Serialize};

/// Raw state change or event forwarded to every peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum PeerMessage {
    /// A channel to `node_id` came up on the sending server
    SetConnectivityState {
        #[serde(rename = "meshid")]
        mesh_id: MeshId,
        #[serde(rename = "nodeid")]
        node_id: NodeId,
        #[serde(rename = "connectTime")]
        connect_time: i64,
        #[serde(rename = "connectType")]
        mask: ChannelMask,
        #[serde(rename = "powerState")]
        power: PowerState,
    },

    /// A channel to `node_id` went down on the sending server
    ClearConnectivityState {
        #[serde(rename = "meshid")]
        mesh_id: MeshId,
        #[serde(rename = "nodeid")]
        node_id: NodeId,
        #[serde(rename = "connectType")]
        mask: ChannelMask,
    },

    /// An event dispatched on the sending server
    #[serde(rename = "event")]
    Event {
        ids: Vec<DispatchKey>,
        source: String,
        event: Event,
    },
}

/// Datagram payload: a message plus the server that sent it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEnvelope {
    pub from: ServerId,
    pub message: PeerMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_message_wire_names() {
        let message = PeerMessage::SetConnectivityState {
            mesh_id: MeshId::parse("mesh//m").unwrap(),
            node_id: NodeId::parse("node//n").unwrap(),
            connect_time: 1_700_000_000_000,
            mask: ChannelMask::TUNNEL,
            power: PowerState::S0,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["action"], "SetConnectivityState");
        assert_eq!(json["nodeid"], "node//n");
        assert_eq!(json["connectType"], 2);
        assert_eq!(json["powerState"], 1);
    }

    #[test]
    fn test_malformed_node_id_is_rejected() {
        let raw = r#"{"from":"b","message":{"action":"ClearConnectivityState","meshid":"mesh//m","nodeid":"bogus","connectType":1}}"#;
        assert!(serde_json::from_str::<PeerEnvelope>(raw).is_err());
    }
}
