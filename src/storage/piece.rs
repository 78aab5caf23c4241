//! Piece storage module
//!
//! Piece geometry (effective length, block plan) and the in-flight buffer
//! that assembles and verifies one piece.

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::{Result, TorrentError};

/// Size of one block request
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Effective length of piece `index`.
///
/// Every piece is `nominal` bytes except the last, which holds whatever
/// remains of `total`.
pub fn piece_length(total: u64, nominal: u64, index: u64) -> u64 {
    let start = index.saturating_mul(nominal);
    nominal.min(total.saturating_sub(start))
}

/// One block request inside a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    /// Offset within the piece
    pub begin: u32,
    /// Number of bytes requested
    pub length: u32,
}

/// Requests covering a piece of `piece_len` bytes: full blocks first, then
/// one short block for the remainder if there is one.
pub fn block_plan(piece_len: u32) -> Vec<BlockRequest> {
    let full_blocks = piece_len / BLOCK_SIZE;
    let remainder = piece_len % BLOCK_SIZE;

    let mut plan: Vec<BlockRequest> = (0..full_blocks)
        .map(|n| BlockRequest {
            begin: n * BLOCK_SIZE,
            length: BLOCK_SIZE,
        })
        .collect();
    if remainder > 0 {
        plan.push(BlockRequest {
            begin: full_blocks * BLOCK_SIZE,
            length: remainder,
        });
    }
    plan
}

/// Everything needed to fetch and verify a single piece
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceTarget {
    /// Piece index
    pub index: u32,
    /// Total length of the torrent content
    pub total_length: u64,
    /// Nominal piece length from the metainfo
    pub nominal_length: u64,
    /// Number of pieces in the torrent
    pub piece_count: usize,
    /// Expected SHA1 hash
    pub expected_hash: [u8; 20],
}

impl PieceTarget {
    /// Length of this piece, accounting for a short final piece
    pub fn effective_length(&self) -> u64 {
        piece_length(self.total_length, self.nominal_length, self.index as u64)
    }

    /// Fail unless the index names a piece of the torrent
    pub fn check_range(&self) -> Result<()> {
        if (self.index as usize) >= self.piece_count {
            return Err(TorrentError::PieceIndexOutOfRange {
                index: self.index as u64,
                count: self.piece_count,
            });
        }
        Ok(())
    }

    /// Block requests for this piece
    pub fn blocks(&self) -> Result<Vec<BlockRequest>> {
        let len = u32::try_from(self.effective_length()).map_err(|_| {
            TorrentError::invalid_metainfo(format!(
                "piece {} is too large to request",
                self.index
            ))
        })?;
        Ok(block_plan(len))
    }
}

/// Buffer that grows block by block for one piece
#[derive(Debug)]
pub struct PieceBuffer {
    index: u32,
    expected_len: usize,
    data: Vec<u8>,
}

impl PieceBuffer {
    /// Create an empty buffer for a piece of `expected_len` bytes
    pub fn new(index: u32, expected_len: usize) -> Self {
        Self {
            index,
            expected_len,
            data: Vec::with_capacity(expected_len),
        }
    }

    /// Append the block starting at `begin`; blocks must arrive in order
    pub fn append(&mut self, begin: u32, block: &[u8]) -> Result<()> {
        if begin as usize != self.data.len() {
            return Err(TorrentError::protocol_error(format!(
                "block for piece {} at offset {} but {} bytes assembled",
                self.index,
                begin,
                self.data.len()
            )));
        }
        if self.data.len() + block.len() > self.expected_len {
            return Err(TorrentError::protocol_error(format!(
                "block overruns piece {} ({} bytes)",
                self.index, self.expected_len
            )));
        }
        self.data.extend_from_slice(block);
        Ok(())
    }

    /// Number of bytes assembled so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether every byte of the piece has arrived
    pub fn is_complete(&self) -> bool {
        self.data.len() == self.expected_len
    }

    /// Check the assembled bytes against `expected` and hand them over
    pub fn verify(self, expected: &[u8; 20]) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(TorrentError::protocol_error(format!(
                "piece {} incomplete: {} of {} bytes",
                self.index,
                self.data.len(),
                self.expected_len
            )));
        }

        let mut hasher = Sha1::new();
        hasher.update(&self.data);
        let actual: [u8; 20] = hasher.finalize().into();

        if &actual != expected {
            warn!(
                "Piece {} hash mismatch: expected {}, got {}",
                self.index,
                hex::encode(expected),
                hex::encode(actual)
            );
            return Err(TorrentError::PieceHashMismatch { index: self.index });
        }

        debug!("Piece {} verified ({} bytes)", self.index, self.data.len());
        Ok(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::info::sha1_digest;

    #[test]
    fn test_piece_length_formula() {
        assert_eq!(piece_length(92063, 32768, 0), 32768);
        assert_eq!(piece_length(92063, 32768, 1), 32768);
        assert_eq!(piece_length(92063, 32768, 2), 26527);
        assert_eq!(piece_length(65536, 32768, 1), 32768);
        assert_eq!(piece_length(100, 32768, 5), 0);
    }

    #[test]
    fn test_block_plan_exact() {
        let plan = block_plan(32768);
        assert_eq!(
            plan,
            vec![
                BlockRequest { begin: 0, length: 16384 },
                BlockRequest { begin: 16384, length: 16384 },
            ]
        );
    }

    #[test]
    fn test_block_plan_short_final_block() {
        let plan = block_plan(26527);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], BlockRequest { begin: 0, length: 16384 });
        assert_eq!(plan[1], BlockRequest { begin: 16384, length: 10143 });
    }

    #[test]
    fn test_block_plan_small_piece() {
        assert_eq!(block_plan(10), vec![BlockRequest { begin: 0, length: 10 }]);
        assert!(block_plan(0).is_empty());
    }

    #[test]
    fn test_target_range_check() {
        let target = PieceTarget {
            index: 3,
            total_length: 92063,
            nominal_length: 32768,
            piece_count: 3,
            expected_hash: [0u8; 20],
        };
        assert_eq!(
            target.check_range(),
            Err(TorrentError::PieceIndexOutOfRange { index: 3, count: 3 })
        );
    }

    #[test]
    fn test_buffer_verifies() {
        let data = vec![7u8; 20000];
        let mut buffer = PieceBuffer::new(0, data.len());
        buffer.append(0, &data[..16384]).unwrap();
        assert!(!buffer.is_complete());
        buffer.append(16384, &data[16384..]).unwrap();
        assert!(buffer.is_complete());
        assert_eq!(buffer.verify(&sha1_digest(&data)).unwrap(), data);
    }

    #[test]
    fn test_buffer_detects_corruption() {
        let data = vec![7u8; 100];
        let mut corrupted = data.clone();
        corrupted[42] ^= 0xff;

        let mut buffer = PieceBuffer::new(4, corrupted.len());
        buffer.append(0, &corrupted).unwrap();
        assert_eq!(
            buffer.verify(&sha1_digest(&data)),
            Err(TorrentError::PieceHashMismatch { index: 4 })
        );
    }

    #[test]
    fn test_buffer_rejects_out_of_order_and_overrun() {
        let mut buffer = PieceBuffer::new(0, 10);
        assert!(buffer.append(5, &[0u8; 5]).is_err());
        assert!(buffer.append(0, &[0u8; 11]).is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_incomplete_buffer_does_not_verify() {
        let mut buffer = PieceBuffer::new(0, 10);
        buffer.append(0, &[0u8; 5]).unwrap();
        assert_eq!(buffer.len(), 5);
        assert!(buffer.verify(&[0u8; 20]).is_err());
    }
}
