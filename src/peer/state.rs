//! Peer state module
//!
//! Peer addresses and the per-connection protocol state machine.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use crate::error::TorrentError;

/// Size of one compact peer record (4-byte IPv4 + 2-byte port)
pub const COMPACT_PEER_LEN: usize = 6;

/// Where a connection sits in the handshake / bitfield / unchoke sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// TCP connected, nothing exchanged yet
    #[default]
    Connected,
    /// Handshakes exchanged and validated
    Handshaken,
    /// Waiting for the peer's bitfield
    AwaitingBitfield,
    /// Interested sent
    Interested,
    /// Waiting for the peer to unchoke us
    AwaitingUnchoke,
    /// Block requests may be issued
    Ready,
}

impl ConnectionState {
    /// Check if block requests may be sent
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Check if the handshake has completed
    pub fn is_handshaken(&self) -> bool {
        !matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Handshaken => "handshaken",
            ConnectionState::AwaitingBitfield => "awaiting bitfield",
            ConnectionState::Interested => "interested",
            ConnectionState::AwaitingUnchoke => "awaiting unchoke",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// IPv4 peer address as handed out by a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl PeerAddress {
    /// Create a new peer address
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Decode one 6-byte compact record
    pub fn from_compact(record: &[u8; COMPACT_PEER_LEN]) -> Self {
        Self {
            ip: Ipv4Addr::new(record[0], record[1], record[2], record[3]),
            port: u16::from_be_bytes([record[4], record[5]]),
        }
    }

    /// Socket address to dial
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = TorrentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr = SocketAddrV4::from_str(s).map_err(|e| {
            TorrentError::config_error_with_field(
                format!("'{}' is not an ipv4 address with port: {}", s, e),
                "peer",
            )
        })?;
        Ok(Self::new(*addr.ip(), addr.port()))
    }
}

impl From<PeerAddress> for SocketAddr {
    fn from(addr: PeerAddress) -> Self {
        addr.socket_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_compact() {
        let addr = PeerAddress::from_compact(&[192, 168, 1, 1, 0x1A, 0xE1]);
        assert_eq!(addr.ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(addr.port, 6881);
        assert_eq!(addr.to_string(), "192.168.1.1:6881");
    }

    #[test]
    fn test_parse_address() {
        let addr: PeerAddress = "10.0.0.2:51413".parse().unwrap();
        assert_eq!(addr, PeerAddress::new(Ipv4Addr::new(10, 0, 0, 2), 51413));
        assert_eq!(SocketAddr::from(addr).port(), 51413);
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!("10.0.0.2".parse::<PeerAddress>().is_err());
        assert!("host:80".parse::<PeerAddress>().is_err());
        assert!("10.0.0.2:99999".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_state_helpers() {
        assert_eq!(ConnectionState::default(), ConnectionState::Connected);
        assert!(!ConnectionState::Connected.is_handshaken());
        assert!(ConnectionState::Handshaken.is_handshaken());
        assert!(ConnectionState::Ready.is_ready());
        assert!(!ConnectionState::AwaitingUnchoke.is_ready());
        assert_eq!(ConnectionState::AwaitingBitfield.to_string(), "awaiting bitfield");
    }
}
