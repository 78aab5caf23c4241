//! bitclient
//!
//! A BitTorrent client core: bencode codec, metainfo parsing, tracker peer
//! lists, the peer wire protocol and a verifying piece downloader.

pub mod bencode;
pub mod cli;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod torrent;
pub mod tracker;

pub use error::{Result, TorrentError};

pub use bencode::{BencodeError, BencodeValue};
pub use cli::{CliArgs, Command, Config};
pub use peer::{ConnectionState, PeerAddress, PeerConnection};
pub use protocol::{Handshake, Message, MessageId};
pub use storage::{download_piece, Downloader, PieceBuffer, PieceTarget};
pub use torrent::{InfoDict, Metainfo, TorrentParser};
pub use tracker::{TrackerClient, TrackerResponse};
