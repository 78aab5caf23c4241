//! Error types for the BitTorrent client
//!
//! Every fallible library call returns a typed [`TorrentError`] so callers
//! can decide whether to retry against another peer, retry the piece, or
//! give up on the whole download.

use std::fmt;

use crate::bencode::BencodeError;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, TorrentError>;

/// Error type for client operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentError {
    /// Malformed bencode input
    Bencode(BencodeError),

    /// Torrent metainfo is structurally invalid
    InvalidMetainfo { message: String },

    /// Tracker peer list could not be decoded
    InvalidPeerList { message: String },

    /// Tracker request failed or the tracker reported a failure
    Tracker {
        message: String,
        source: Option<String>,
    },

    /// The handshake could not be completed
    HandshakeFailed {
        message: String,
        peer: Option<String>,
    },

    /// A message arrived that the connection state does not allow
    UnexpectedMessage { expected: String, received: String },

    /// The peer broke the wire protocol
    Protocol { message: String },

    /// The peer did not answer within the configured timeout
    PeerTimeout { peer: String, operation: String },

    /// The connection was cancelled by its owner
    Cancelled,

    /// Transport level failure (connect, read, write)
    Network {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Requested piece does not exist in the torrent
    PieceIndexOutOfRange { index: u64, count: usize },

    /// The peer's bitfield does not advertise the piece
    PieceUnavailable { index: u32, peer: String },

    /// Assembled piece does not match its expected SHA-1
    PieceHashMismatch { index: u32 },

    /// Every known peer failed
    NoPeersAvailable,

    /// File I/O errors
    Storage {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Invalid configuration value
    Config {
        message: String,
        field: Option<String>,
    },
}

impl TorrentError {
    /// Create a new InvalidMetainfo error
    pub fn invalid_metainfo(message: impl Into<String>) -> Self {
        TorrentError::InvalidMetainfo {
            message: message.into(),
        }
    }

    /// Create a new InvalidPeerList error
    pub fn invalid_peer_list(message: impl Into<String>) -> Self {
        TorrentError::InvalidPeerList {
            message: message.into(),
        }
    }

    /// Create a new Tracker error
    pub fn tracker_error(message: impl Into<String>) -> Self {
        TorrentError::Tracker {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new Tracker error with source
    pub fn tracker_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::Tracker {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new HandshakeFailed error
    pub fn handshake_failed(message: impl Into<String>) -> Self {
        TorrentError::HandshakeFailed {
            message: message.into(),
            peer: None,
        }
    }

    /// Create a new HandshakeFailed error with peer address
    pub fn handshake_failed_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::HandshakeFailed {
            message: message.into(),
            peer: Some(peer.into()),
        }
    }

    /// Create a new UnexpectedMessage error
    pub fn unexpected_message(expected: impl Into<String>, received: impl Into<String>) -> Self {
        TorrentError::UnexpectedMessage {
            expected: expected.into(),
            received: received.into(),
        }
    }

    /// Create a new Protocol error
    pub fn protocol_error(message: impl Into<String>) -> Self {
        TorrentError::Protocol {
            message: message.into(),
        }
    }

    /// Create a new PeerTimeout error
    pub fn peer_timeout(peer: impl Into<String>, operation: impl Into<String>) -> Self {
        TorrentError::PeerTimeout {
            peer: peer.into(),
            operation: operation.into(),
        }
    }

    /// Create a new Network error with address and source
    pub fn network_error_full(
        message: impl Into<String>,
        address: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::Network {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new Storage error with path and source
    pub fn storage_error_full(
        message: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        TorrentError::Storage {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new Config error with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether the operation may succeed if tried again, possibly on another peer
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TorrentError::Network { .. }
                | TorrentError::PeerTimeout { .. }
                | TorrentError::HandshakeFailed { .. }
                | TorrentError::PieceHashMismatch { .. }
                | TorrentError::PieceUnavailable { .. }
                | TorrentError::UnexpectedMessage { .. }
                | TorrentError::Protocol { .. }
        )
    }

    /// Whether the connection that produced this error can no longer be used
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            TorrentError::Network { .. }
                | TorrentError::PeerTimeout { .. }
                | TorrentError::HandshakeFailed { .. }
                | TorrentError::UnexpectedMessage { .. }
                | TorrentError::Protocol { .. }
                | TorrentError::Cancelled
        )
    }
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentError::Bencode(err) => write!(f, "Bencode error: {}", err),
            TorrentError::InvalidMetainfo { message } => {
                write!(f, "Invalid metainfo: {}", message)
            }
            TorrentError::InvalidPeerList { message } => {
                write!(f, "Invalid peer list: {}", message)
            }
            TorrentError::Tracker { message, source } => {
                if let Some(src) = source {
                    write!(f, "Tracker error: {} (source: {})", message, src)
                } else {
                    write!(f, "Tracker error: {}", message)
                }
            }
            TorrentError::HandshakeFailed { message, peer } => {
                if let Some(p) = peer {
                    write!(f, "Handshake failed: {} (peer: {})", message, p)
                } else {
                    write!(f, "Handshake failed: {}", message)
                }
            }
            TorrentError::UnexpectedMessage { expected, received } => {
                write!(f, "Unexpected message: expected {}, received {}", expected, received)
            }
            TorrentError::Protocol { message } => write!(f, "Protocol error: {}", message),
            TorrentError::PeerTimeout { peer, operation } => {
                write!(f, "Peer timeout: {} timed out (peer: {})", operation, peer)
            }
            TorrentError::Cancelled => write!(f, "Connection cancelled"),
            TorrentError::Network {
                message,
                address,
                source,
            } => match (address, source) {
                (Some(a), Some(s)) => {
                    write!(f, "Network error: {} (address: {}, source: {})", message, a, s)
                }
                (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                (None, None) => write!(f, "Network error: {}", message),
            },
            TorrentError::PieceIndexOutOfRange { index, count } => {
                write!(f, "Piece index {} out of range (torrent has {} pieces)", index, count)
            }
            TorrentError::PieceUnavailable { index, peer } => {
                write!(f, "Piece {} not available from peer {}", index, peer)
            }
            TorrentError::PieceHashMismatch { index } => {
                write!(f, "Piece {} failed hash verification", index)
            }
            TorrentError::NoPeersAvailable => write!(f, "No peers available"),
            TorrentError::Storage {
                message,
                path,
                source,
            } => match (path, source) {
                (Some(p), Some(s)) => {
                    write!(f, "Storage error: {} (path: {}, source: {})", message, p, s)
                }
                (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                (None, None) => write!(f, "Storage error: {}", message),
            },
            TorrentError::Config { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for TorrentError {}

impl From<BencodeError> for TorrentError {
    fn from(err: BencodeError) -> Self {
        TorrentError::Bencode(err)
    }
}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::Network {
            message: err.to_string(),
            address: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<url::ParseError> for TorrentError {
    fn from(err: url::ParseError) -> Self {
        TorrentError::tracker_error_with_source("Invalid announce URL", err.to_string())
    }
}

impl From<reqwest::Error> for TorrentError {
    fn from(err: reqwest::Error) -> Self {
        TorrentError::tracker_error_with_source("Tracker request failed", err.to_string())
    }
}
