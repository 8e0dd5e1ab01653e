//! Core types shared across Meshward components.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::WILDCARD_KEY;
use crate::error::MeshError;

/// Check the `<kind>/<domain>/<id>` shape shared by node, mesh and user ids.
/// The domain may be empty (default domain); the id may not.
fn check_scoped(kind: &str, value: &str) -> Result<(), MeshError> {
    let mut parts = value.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(k), Some(_domain), Some(id), None) if k == kind && !id.is_empty() => Ok(()),
        _ => Err(MeshError::InvalidIdentifier(format!(
            "expected {}/<domain>/<id>, got {:?}",
            kind, value
        ))),
    }
}

macro_rules! scoped_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub const KIND: &'static str = $kind;

            /// Validate and wrap an identifier string
            pub fn parse(value: impl Into<String>) -> Result<Self, MeshError> {
                let value = value.into();
                check_scoped(Self::KIND, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Administrative domain this identifier is scoped to
            pub fn domain(&self) -> &str {
                self.0.split('/').nth(1).unwrap_or_default()
            }
        }

        impl TryFrom<String> for $name {
            type Error = MeshError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl FromStr for $name {
            type Err = MeshError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

scoped_id!(
    /// Managed endpoint identifier (`node/<domain>/<id>`)
    NodeId,
    "node"
);

scoped_id!(
    /// Device group identifier (`mesh/<domain>/<id>`)
    MeshId,
    "mesh"
);

scoped_id!(
    /// Administrator identifier (`user/<domain>/<name>`)
    UserId,
    "user"
);

/// Identity of one member of a server cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a set of event subscribers: `*`, a mesh, a node, or any other key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchKey(String);

impl DispatchKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key every "all events" subscriber registers under
    pub fn wildcard() -> Self {
        Self(WILDCARD_KEY.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DispatchKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<&MeshId> for DispatchKey {
    fn from(id: &MeshId) -> Self {
        Self::new(id.as_str())
    }
}

impl From<&NodeId> for DispatchKey {
    fn from(id: &NodeId) -> Self {
        Self::new(id.as_str())
    }
}

impl From<&UserId> for DispatchKey {
    fn from(id: &UserId) -> Self {
        Self::new(id.as_str())
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single communication channel to a managed node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The node's own software agent link
    Agent,
    /// Firmware-initiated hardware management tunnel
    Tunnel,
    /// Server-initiated in-network hardware management connection
    Direct,
}

impl Channel {
    /// Channels in power-reporting priority order
    pub const PRIORITY: [Channel; 3] = [Channel::Agent, Channel::Tunnel, Channel::Direct];

    pub fn mask(self) -> ChannelMask {
        match self {
            Self::Agent => ChannelMask::AGENT,
            Self::Tunnel => ChannelMask::TUNNEL,
            Self::Direct => ChannelMask::DIRECT,
        }
    }

    /// Slot of this channel in per-channel arrays
    pub fn index(self) -> usize {
        match self {
            Self::Agent => 0,
            Self::Tunnel => 1,
            Self::Direct => 2,
        }
    }
}

/// Bitmask over the three channels (Agent=1, Tunnel=2, Direct=4).
/// Bits outside the three channels are dropped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct ChannelMask(u8);

impl ChannelMask {
    pub const NONE: ChannelMask = ChannelMask(0);
    pub const AGENT: ChannelMask = ChannelMask(1);
    pub const TUNNEL: ChannelMask = ChannelMask(2);
    pub const DIRECT: ChannelMask = ChannelMask(4);
    pub const ALL: ChannelMask = ChannelMask(7);

    pub fn new(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn has(&self, channel: Channel) -> bool {
        self.0 & channel.mask().0 != 0
    }

    pub fn intersects(&self, other: ChannelMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Mask with the bits of `other` removed
    pub fn without(&self, other: ChannelMask) -> Self {
        Self(self.0 & !other.0)
    }

    /// Active channels in priority order
    pub fn channels(self) -> impl Iterator<Item = Channel> {
        Channel::PRIORITY.into_iter().filter(move |c| self.has(*c))
    }
}

impl From<u8> for ChannelMask {
    fn from(bits: u8) -> Self {
        Self::new(bits)
    }
}

impl From<ChannelMask> for u8 {
    fn from(mask: ChannelMask) -> Self {
        mask.0
    }
}

impl From<Channel> for ChannelMask {
    fn from(channel: Channel) -> Self {
        channel.mask()
    }
}

impl BitOr for ChannelMask {
    type Output = ChannelMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChannelMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Last known power state of a node, as reported by one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PowerState {
    #[default]
    Unknown = 0,
    /// Powered on
    S0 = 1,
    /// Sleep
    S1 = 2,
    /// Sleep
    S2 = 3,
    /// Deep sleep
    S3 = 4,
    /// Hibernating
    S4 = 5,
    /// Soft-off
    S5 = 6,
    /// Present, power not reported
    Present = 7,
}

impl PowerState {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl TryFrom<u8> for PowerState {
    type Error = MeshError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Unknown,
            1 => Self::S0,
            2 => Self::S1,
            3 => Self::S2,
            4 => Self::S3,
            5 => Self::S4,
            6 => Self::S5,
            7 => Self::Present,
            other => return Err(MeshError::InvalidPowerState(other)),
        })
    }
}

impl From<PowerState> for u8 {
    fn from(state: PowerState) -> Self {
        state.value()
    }
}

/// Connectivity of one node as seen by one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityEntry {
    /// Mesh the node belongs to (last reported)
    pub mesh_id: MeshId,

    /// Live channels
    pub mask: ChannelMask,

    /// Last power value reported over each channel, indexed by `Channel::index`
    pub channel_power: [PowerState; 3],
}

impl ConnectivityEntry {
    pub fn new(mesh_id: MeshId) -> Self {
        Self {
            mesh_id,
            mask: ChannelMask::NONE,
            channel_power: [PowerState::Unknown; 3],
        }
    }

    /// Power reported by the highest-priority live channel
    pub fn combined_power(&self) -> PowerState {
        self.mask
            .channels()
            .next()
            .map(|c| self.channel_power[c.index()])
            .unwrap_or_default()
    }

    /// Mark `mask` live and record `power` for each of its channels
    pub fn connect(&mut self, mask: ChannelMask, power: PowerState) {
        self.mask |= mask;
        for channel in mask.channels() {
            self.channel_power[channel.index()] = power;
        }
    }

    /// Drop `mask` from the live set and forget its power values
    pub fn disconnect(&mut self, mask: ChannelMask) {
        self.mask = self.mask.without(mask);
        for channel in mask.channels() {
            self.channel_power[channel.index()] = PowerState::Unknown;
        }
    }

    /// Summary view of this entry
    pub fn state(&self) -> NodeState {
        NodeState {
            mesh_id: self.mesh_id.clone(),
            mask: self.mask,
            power: self.combined_power(),
        }
    }
}

/// Connectivity summary of one node: live channels and a single power value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(rename = "meshid")]
    pub mesh_id: MeshId,
    #[serde(rename = "conn")]
    pub mask: ChannelMask,
    #[serde(rename = "pwr")]
    pub power: PowerState,
}

/// Power history row handed to the persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerRecord {
    /// Node id, or `*` for server-wide markers
    pub node: String,

    /// Milliseconds since the Unix epoch
    pub time: i64,

    pub power: PowerState,

    #[serde(rename = "oldPower", default, skip_serializing_if = "Option::is_none")]
    pub old_power: Option<PowerState>,

    /// Server that observed the change (cluster mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerId>,

    /// Server lifecycle marker, see `constants::power_markers`
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<u8>,
}

impl PowerRecord {
    pub fn node(node: &NodeId, time: i64, power: PowerState, old_power: Option<PowerState>) -> Self {
        Self {
            node: node.to_string(),
            time,
            power,
            old_power,
            server: None,
            marker: None,
        }
    }

    /// Server-wide record resetting every node to `Unknown`
    pub fn server_marker(time: i64, marker: u8) -> Self {
        Self {
            node: WILDCARD_KEY.to_string(),
            time,
            power: PowerState::Unknown,
            old_power: None,
            server: None,
            marker: Some(marker),
        }
    }

    pub fn with_server(mut self, server: Option<&ServerId>) -> Self {
        self.server = server.cloned();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh() -> MeshId {
        MeshId::parse("mesh//abc123").unwrap()
    }

    #[test]
    fn test_identifier_validation() {
        let node = NodeId::parse("node/acme/0f1e2d").unwrap();
        assert_eq!(node.domain(), "acme");
        assert!(NodeId::parse("node//0f1e2d").is_ok());
        assert!(NodeId::parse("mesh/acme/0f1e2d").is_err());
        assert!(NodeId::parse("node/acme/").is_err());
        assert!(NodeId::parse("node/acme/a/b").is_err());
        assert!(UserId::parse("user//admin").is_ok());
    }

    #[test]
    fn test_identifier_serde_rejects_malformed() {
        let ok: Result<NodeId, _> = serde_json::from_str("\"node//aa\"");
        assert!(ok.is_ok());
        let bad: Result<NodeId, _> = serde_json::from_str("\"garbage\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_channel_mask_truncates_unknown_bits() {
        assert_eq!(ChannelMask::new(0xFF), ChannelMask::ALL);
        assert_eq!(ChannelMask::new(8), ChannelMask::NONE);
        let mask = ChannelMask::AGENT | ChannelMask::DIRECT;
        assert_eq!(mask.bits(), 5);
        assert_eq!(
            mask.channels().collect::<Vec<_>>(),
            vec![Channel::Agent, Channel::Direct]
        );
        assert_eq!(mask.without(ChannelMask::AGENT), ChannelMask::DIRECT);
    }

    #[test]
    fn test_power_state_range() {
        assert_eq!(PowerState::try_from(7).unwrap(), PowerState::Present);
        assert!(PowerState::try_from(8).is_err());
        assert_eq!(serde_json::to_string(&PowerState::S3).unwrap(), "4");
    }

    #[test]
    fn test_combined_power_follows_channel_priority() {
        let mut entry = ConnectivityEntry::new(mesh());
        entry.connect(ChannelMask::DIRECT, PowerState::S5);
        assert_eq!(entry.combined_power(), PowerState::S5);

        entry.connect(ChannelMask::TUNNEL, PowerState::S3);
        assert_eq!(entry.combined_power(), PowerState::S3);

        entry.connect(ChannelMask::AGENT, PowerState::S0);
        assert_eq!(entry.combined_power(), PowerState::S0);

        entry.disconnect(ChannelMask::AGENT);
        assert_eq!(entry.combined_power(), PowerState::S3);
        assert_eq!(entry.channel_power[Channel::Agent.index()], PowerState::Unknown);

        entry.disconnect(ChannelMask::TUNNEL | ChannelMask::DIRECT);
        assert!(entry.mask.is_empty());
        assert_eq!(entry.combined_power(), PowerState::Unknown);
    }

    #[test]
    fn test_power_record_wire_names() {
        let node = NodeId::parse("node//aa").unwrap();
        let record = PowerRecord::node(&node, 1000, PowerState::S0, Some(PowerState::Unknown))
            .with_server(Some(&ServerId::new("east")));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["oldPower"], 0);
        assert_eq!(json["server"], "east");
        assert!(json.get("s").is_none());

        let marker = PowerRecord::server_marker(5, 1);
        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["node"], "*");
        assert_eq!(json["s"], 1);
    }
}
