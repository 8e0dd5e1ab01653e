//! Peer transport (UDP)
//!
//! Forwards raw connectivity changes and events to every other cluster member
//! as small JSON datagrams, and feeds datagrams from peers back into the local
//! coordinator tagged with the sending server.
//!
//! Sends are fire-and-forget: `broadcast` queues the message and returns, a
//! background task does the socket I/O. Nothing is retried.
//!
//! A datagram is only accepted when its source IP matches one of the
//! addresses the claimed sender is configured under. Senders use an
//! ephemeral port, so only the IP is compared.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use meshward_common::ServerId;
use meshward_common::constants::MAX_PEER_DATAGRAM;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use super::message::{PeerEnvelope, PeerMessage};
use crate::config::ClusterConfig;
use crate::coordinator::SharedCoordinator;

/// Outbound side of the cluster link
pub trait PeerTransport: Send + Sync {
    fn broadcast(&self, message: PeerMessage);
}

/// Queues outbound messages for [`PeerLink::run_sender`]
pub struct UdpPeerTransport {
    server_id: ServerId,
    outbound: mpsc::UnboundedSender<PeerEnvelope>,
}

impl UdpPeerTransport {
    pub fn new(server_id: ServerId) -> (Self, mpsc::UnboundedReceiver<PeerEnvelope>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { server_id, outbound }, rx)
    }
}

impl PeerTransport for UdpPeerTransport {
    fn broadcast(&self, message: PeerMessage) {
        let envelope = PeerEnvelope {
            from: self.server_id.clone(),
            message,
        };
        if self.outbound.send(envelope).is_err() {
            tracing::warn!("Peer sender stopped, message dropped");
        }
    }
}

/// Resolved source IPs per configured peer
type PeerIps = HashMap<ServerId, Vec<IpAddr>>;

/// Socket loops for one cluster member
pub struct PeerLink {
    config: ClusterConfig,
    server_id: ServerId,
}

impl PeerLink {
    pub fn new(config: ClusterConfig, server_id: ServerId) -> Self {
        Self { config, server_id }
    }

    /// Resolve every configured peer address to the IPs it may send from
    async fn resolve_peers(&self) -> PeerIps {
        let mut resolved = PeerIps::new();
        for (server, addr) in &self.config.peers {
            match tokio::net::lookup_host(addr.as_str()).await {
                Ok(addrs) => {
                    let ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                    tracing::debug!(peer = %server, ips = ?ips, "Resolved peer address");
                    resolved.insert(ServerId::new(server.as_str()), ips);
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %server,
                        addr = %addr,
                        error = %e,
                        "Failed to resolve peer, its messages will be ignored"
                    );
                }
            }
        }
        resolved
    }

    /// Drain queued messages and send each one to every peer
    pub async fn run_sender(
        &self,
        mut outbound: mpsc::UnboundedReceiver<PeerEnvelope>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("Failed to bind peer sender socket")?;

        let peers: Vec<_> = self.config.peers.keys().collect();
        tracing::info!(peers = ?peers, "Peer sender started");

        loop {
            tokio::select! {
                envelope = outbound.recv() => {
                    let Some(envelope) = envelope else { break };
                    self.send_envelope(&socket, &envelope).await;
                }
                _ = shutdown.recv() => {
                    // Flush whatever was queued before shutdown, e.g. the stop event
                    while let Ok(envelope) = outbound.try_recv() {
                        self.send_envelope(&socket, &envelope).await;
                    }
                    tracing::info!("Peer sender shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn send_envelope(&self, socket: &UdpSocket, envelope: &PeerEnvelope) {
        let bytes = match serde_json::to_vec(envelope) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize peer message");
                return;
            }
        };
        if bytes.len() > MAX_PEER_DATAGRAM {
            tracing::warn!(size = bytes.len(), "Peer message too large, dropped");
            return;
        }

        for (server, addr) in &self.config.peers {
            if let Err(e) = socket.send_to(&bytes, addr).await {
                tracing::warn!(peer = %server, addr = %addr, error = %e, "Failed to send to peer");
            }
        }
    }

    /// Receive peer datagrams and apply them to the coordinator
    pub async fn run_receiver(
        &self,
        coordinator: SharedCoordinator,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let socket = UdpSocket::bind(&self.config.bind_addr)
            .await
            .context("Failed to bind peer receiver socket")?;

        let peer_ips = self.resolve_peers().await;
        let mut buf = vec![0u8; MAX_PEER_DATAGRAM];

        tracing::info!(addr = %self.config.bind_addr, "Peer receiver started");

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            let envelope = self.parse_datagram(&buf[..len], addr, &peer_ips);
                            if let Some(envelope) = envelope {
                                coordinator
                                    .write()
                                    .await
                                    .apply_peer_message(&envelope.from, envelope.message);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Peer receive error");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Peer receiver shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Decode a datagram, dropping our own echoes, unconfigured senders and
    /// senders whose source IP does not belong to the peer they claim to be
    fn parse_datagram(
        &self,
        data: &[u8],
        addr: SocketAddr,
        peer_ips: &PeerIps,
    ) -> Option<PeerEnvelope> {
        let envelope: PeerEnvelope = match serde_json::from_slice(data) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "Invalid peer message");
                return None;
            }
        };

        if envelope.from == self.server_id {
            return None;
        }

        let Some(ips) = peer_ips.get(&envelope.from) else {
            tracing::warn!(
                addr = %addr,
                server = %envelope.from,
                "Message from unknown server ignored"
            );
            return None;
        };

        if !ips.contains(&addr.ip()) {
            tracing::warn!(
                addr = %addr,
                server = %envelope.from,
                "Message from wrong address ignored"
            );
            return None;
        }

        tracing::trace!(server = %envelope.from, "Received peer message");
        Some(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshward_common::{ChannelMask, MeshId, NodeId};
    use std::collections::BTreeMap;

    fn link() -> PeerLink {
        let config = ClusterConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            peers: BTreeMap::from([("b".to_string(), "127.0.0.1:9001".to_string())]),
        };
        PeerLink::new(config, ServerId::new("a"))
    }

    fn datagram(from: &str) -> Vec<u8> {
        let envelope = PeerEnvelope {
            from: ServerId::new(from),
            message: PeerMessage::ClearConnectivityState {
                mesh_id: MeshId::parse("mesh//m").unwrap(),
                node_id: NodeId::parse("node//n").unwrap(),
                mask: ChannelMask::AGENT,
            },
        };
        serde_json::to_vec(&envelope).unwrap()
    }

    #[tokio::test]
    async fn test_parse_datagram_filters_senders() {
        let link = link();
        let peer_ips = link.resolve_peers().await;
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();

        assert!(link.parse_datagram(&datagram("b"), addr, &peer_ips).is_some());
        assert!(link.parse_datagram(&datagram("a"), addr, &peer_ips).is_none());
        assert!(link.parse_datagram(&datagram("z"), addr, &peer_ips).is_none());
        assert!(link.parse_datagram(b"not json", addr, &peer_ips).is_none());
    }

    #[tokio::test]
    async fn test_parse_datagram_checks_source_ip() {
        let link = link();
        let peer_ips = link.resolve_peers().await;
        assert_eq!(
            peer_ips.get(&ServerId::new("b")),
            Some(&vec!["127.0.0.1".parse::<IpAddr>().unwrap()])
        );

        // Ephemeral sender port is fine
        let same_host: SocketAddr = "127.0.0.1:53211".parse().unwrap();
        assert!(link.parse_datagram(&datagram("b"), same_host, &peer_ips).is_some());

        // Anyone else claiming to be "b" is not
        let spoofed: SocketAddr = "10.9.9.9:9001".parse().unwrap();
        assert!(link.parse_datagram(&datagram("b"), spoofed, &peer_ips).is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_peer_is_ignored() {
        let config = ClusterConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            peers: BTreeMap::from([("c".to_string(), "not an address".to_string())]),
        };
        let link = PeerLink::new(config, ServerId::new("a"));
        let peer_ips = link.resolve_peers().await;

        let addr: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        assert!(peer_ips.is_empty());
        assert!(link.parse_datagram(&datagram("c"), addr, &peer_ips).is_none());
    }

    #[tokio::test]
    async fn test_broadcast_queues_envelope() {
        let (transport, mut rx) = UdpPeerTransport::new(ServerId::new("a"));
        transport.broadcast(PeerMessage::ClearConnectivityState {
            mesh_id: MeshId::parse("mesh//m").unwrap(),
            node_id: NodeId::parse("node//n").unwrap(),
            mask: ChannelMask::TUNNEL,
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.from, ServerId::new("a"));
    }
}
