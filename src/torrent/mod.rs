//! Torrent file handling module
//!
//! Parses `.torrent` metainfo and derives the info hash.

pub mod info;
pub mod parser;

pub use info::{InfoDict, Metainfo};
pub use parser::TorrentParser;
