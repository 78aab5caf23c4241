//! Storage module
//!
//! Piece geometry and verification, the piece downloader, and file I/O.

pub mod download;
pub mod file;
pub mod piece;

pub use download::{download_piece, Downloader};
pub use piece::{BlockRequest, PieceBuffer, PieceTarget, BLOCK_SIZE};
