//! BitTorrent peer wire protocol
//!
//! Handshake layout, message framing, and async stream helpers.

pub mod handshake;
pub mod message;
pub mod wire;

pub use handshake::Handshake;
pub use message::{Message, MessageId};
