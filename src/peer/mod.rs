//! Peer module
//!
//! Peer addresses, connection state, and the owned peer connection.

pub mod connection;
pub mod state;

pub use connection::PeerConnection;
pub use state::{ConnectionState, PeerAddress};
