//! Torrent metainfo structures
//!
//! Provides the parsed, immutable view of a single-file `.torrent`.

use sha1::{Digest, Sha1};

use crate::error::{Result, TorrentError};
use crate::storage::piece::{self, PieceTarget};

/// Length of a SHA-1 digest
pub const HASH_LEN: usize = 20;

/// Parsed `.torrent` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    /// Tracker announce URL
    pub announce: String,
    /// The info dictionary
    pub info: InfoDict,
}

/// Contents of the `info` dictionary plus its hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoDict {
    /// Total file size in bytes
    pub length: u64,
    /// Suggested file name
    pub name: String,
    /// Nominal size of each piece in bytes
    pub piece_length: u64,
    /// One SHA-1 per piece, in piece order
    pub pieces: Vec<[u8; HASH_LEN]>,
    /// SHA-1 of the bencoded info dictionary
    pub info_hash: [u8; HASH_LEN],
}

impl Metainfo {
    /// Number of pieces in the torrent
    pub fn piece_count(&self) -> usize {
        self.info.pieces.len()
    }

    /// Info hash as a lowercase hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info.info_hash)
    }

    /// Expected hash for piece `index`
    pub fn piece_hash(&self, index: usize) -> Option<[u8; HASH_LEN]> {
        self.info.pieces.get(index).copied()
    }

    /// Effective length of piece `index`; the last piece may be short
    pub fn piece_length(&self, index: usize) -> Option<u64> {
        if index >= self.piece_count() {
            return None;
        }
        Some(piece::piece_length(
            self.info.length,
            self.info.piece_length,
            index as u64,
        ))
    }

    /// Everything the downloader needs to fetch piece `index`
    pub fn piece_target(&self, index: u64) -> Result<PieceTarget> {
        let count = self.piece_count();
        let hash = usize::try_from(index)
            .ok()
            .and_then(|i| self.piece_hash(i))
            .ok_or(TorrentError::PieceIndexOutOfRange { index, count })?;

        Ok(PieceTarget {
            // the parser rejects torrents with more than u32::MAX pieces
            index: index as u32,
            total_length: self.info.length,
            nominal_length: self.info.piece_length,
            piece_count: count,
            expected_hash: hash,
        })
    }
}

/// SHA-1 over arbitrary bytes
pub fn sha1_digest(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Split the concatenated `pieces` field into 20-byte hashes
pub fn parse_piece_hashes(pieces_bytes: &[u8]) -> Result<Vec<[u8; HASH_LEN]>> {
    if pieces_bytes.len() % HASH_LEN != 0 {
        return Err(TorrentError::invalid_metainfo(format!(
            "pieces field length must be a multiple of 20, got {}",
            pieces_bytes.len()
        )));
    }

    Ok(pieces_bytes
        .chunks_exact(HASH_LEN)
        .map(|chunk| {
            let mut hash = [0u8; HASH_LEN];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}
