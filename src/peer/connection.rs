//! Peer connection module
//!
//! One exclusively owned stream to one peer, driven through the
//! handshake, bitfield, interested and unchoke steps before blocks can be
//! requested. Every read is bounded by the read timeout and aborted by
//! the connection's cancellation token.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::cli::Config;
use crate::error::{Result, TorrentError};
use crate::peer::state::{ConnectionState, PeerAddress};
use crate::protocol::message::{has_piece, set_piece};
use crate::protocol::{wire, Handshake, Message};

/// Represents a connected peer
#[derive(Debug)]
pub struct PeerConnection<S> {
    stream: S,
    /// Label used in logs and errors, usually `ip:port`
    peer: String,
    state: ConnectionState,
    remote_peer_id: Option<[u8; 20]>,
    bitfield: Option<Vec<u8>>,
    read_timeout: Duration,
    cancel: CancellationToken,
}

impl PeerConnection<TcpStream> {
    /// Dial `addr` under the configured connect timeout
    pub async fn connect(
        addr: PeerAddress,
        config: &Config,
        cancel: CancellationToken,
    ) -> Result<Self> {
        info!("Connecting to peer: {}", addr);
        let label = addr.to_string();

        let dial = async {
            TcpStream::connect(addr.socket_addr()).await.map_err(|e| {
                error!("Failed to connect to {}: {}", addr, e);
                TorrentError::network_error_full("Failed to connect", label.clone(), e.to_string())
            })
        };
        let stream = guard(&cancel, config.connect_timeout, &label, "connect", dial).await?;

        debug!("Connected to peer: {}", addr);
        Ok(Self::new(stream, label, config.read_timeout, cancel))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerConnection<S> {
    /// Wrap an already connected stream
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        read_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            state: ConnectionState::Connected,
            remote_peer_id: None,
            bitfield: None,
            read_timeout,
            cancel,
        }
    }

    /// Current protocol state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Peer label (address)
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Peer id the remote sent in its handshake
    pub fn remote_peer_id(&self) -> Option<[u8; 20]> {
        self.remote_peer_id
    }

    /// Bitfield as last updated by Bitfield/Have messages
    pub fn bitfield(&self) -> Option<&[u8]> {
        self.bitfield.as_deref()
    }

    /// Whether the peer advertised piece `index`
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield
            .as_deref()
            .is_some_and(|bits| has_piece(bits, index))
    }

    /// Exchange handshakes and return the remote peer id.
    ///
    /// The peer must echo our info hash.
    pub async fn handshake(&mut self, info_hash: [u8; 20], peer_id: [u8; 20]) -> Result<[u8; 20]> {
        self.require(ConnectionState::Connected, "handshake")?;
        info!("Performing handshake with peer: {}", self.peer);

        let ours = Handshake::new(info_hash, peer_id);
        debug!("Sending handshake to peer: {}", self.peer);
        guard(
            &self.cancel,
            self.read_timeout,
            &self.peer,
            "handshake",
            wire::write_handshake(&mut self.stream, &ours),
        )
        .await?;

        debug!("Reading handshake from peer: {}", self.peer);
        let theirs = guard(
            &self.cancel,
            self.read_timeout,
            &self.peer,
            "handshake",
            wire::read_handshake(&mut self.stream),
        )
        .await?;

        if !theirs.validate(&info_hash) {
            error!("Handshake validation failed with peer {}: info hash mismatch", self.peer);
            return Err(TorrentError::handshake_failed_with_peer(
                "info hash mismatch",
                self.peer.clone(),
            ));
        }

        self.remote_peer_id = Some(theirs.peer_id);
        self.state = ConnectionState::Handshaken;
        debug!(
            "Handshake completed with peer {} (peer id {})",
            self.peer,
            hex::encode(theirs.peer_id)
        );
        Ok(theirs.peer_id)
    }

    /// Wait for the peer's bitfield; nothing else may arrive first
    pub async fn await_bitfield(&mut self) -> Result<()> {
        self.require(ConnectionState::Handshaken, "await bitfield")?;
        self.state = ConnectionState::AwaitingBitfield;

        match self.receive_message().await? {
            Message::Bitfield { bitfield } => {
                debug!("Peer {} sent a {} byte bitfield", self.peer, bitfield.len());
                self.bitfield = Some(bitfield);
                Ok(())
            }
            other => {
                warn!("Peer {} sent {} before its bitfield", self.peer, other.name());
                Err(TorrentError::unexpected_message("bitfield", other.name()))
            }
        }
    }

    /// Tell the peer we want data
    pub async fn send_interested(&mut self) -> Result<()> {
        if self.state != ConnectionState::AwaitingBitfield || self.bitfield.is_none() {
            return Err(self.out_of_order("send interested"));
        }
        debug!("Sending Interested to peer: {}", self.peer);
        self.send_message(&Message::Interested).await?;
        self.state = ConnectionState::Interested;
        Ok(())
    }

    /// Wait until the peer unchokes us
    pub async fn await_unchoke(&mut self) -> Result<()> {
        self.require(ConnectionState::Interested, "await unchoke")?;
        self.state = ConnectionState::AwaitingUnchoke;

        loop {
            match self.receive_message().await? {
                Message::Unchoke => {
                    debug!("Peer {} unchoked us", self.peer);
                    self.state = ConnectionState::Ready;
                    return Ok(());
                }
                Message::Have { piece_index } => self.record_have(piece_index)?,
                Message::Choke | Message::Interested | Message::NotInterested => {
                    trace!("Ignoring state message from {} while choked", self.peer);
                }
                other => {
                    warn!("Peer {} sent {} while we wait for unchoke", self.peer, other.name());
                    return Err(TorrentError::unexpected_message("unchoke", other.name()));
                }
            }
        }
    }

    /// Bitfield, interested and unchoke, in order
    pub async fn prepare(&mut self) -> Result<()> {
        self.await_bitfield().await?;
        self.send_interested().await?;
        self.await_unchoke().await
    }

    /// Request one block and wait for exactly that block to come back
    pub async fn request_block(&mut self, index: u32, begin: u32, length: u32) -> Result<Vec<u8>> {
        if !self.state.is_ready() {
            return Err(self.out_of_order("request block"));
        }
        trace!(
            "Requesting piece {} block {} ({} bytes) from peer: {}",
            index,
            begin,
            length,
            self.peer
        );
        self.send_message(&Message::Request {
            index,
            begin,
            length,
        })
        .await?;

        loop {
            match self.receive_message().await? {
                Message::Piece {
                    index: got_index,
                    begin: got_begin,
                    block,
                } => {
                    if got_index != index || got_begin != begin || block.len() != length as usize {
                        error!(
                            "Peer {} answered piece {} offset {} ({} bytes) to a request for piece {} offset {} ({} bytes)",
                            self.peer,
                            got_index,
                            got_begin,
                            block.len(),
                            index,
                            begin,
                            length
                        );
                        return Err(TorrentError::protocol_error(format!(
                            "wrong block: requested {}/{}+{}, got {}/{}+{}",
                            index,
                            begin,
                            length,
                            got_index,
                            got_begin,
                            block.len()
                        )));
                    }
                    return Ok(block);
                }
                Message::Have { piece_index } => self.record_have(piece_index)?,
                Message::Unchoke => trace!("Peer {} repeated unchoke", self.peer),
                Message::Choke => {
                    warn!("Peer {} choked us with a request outstanding", self.peer);
                    self.state = ConnectionState::AwaitingUnchoke;
                    return Err(TorrentError::protocol_error("choked while a block was requested"));
                }
                other => {
                    warn!("Peer {} sent {} while we wait for a block", self.peer, other.name());
                    return Err(TorrentError::unexpected_message("piece", other.name()));
                }
            }
        }
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        if !self.state.is_handshaken() {
            return Err(self.out_of_order("send message"));
        }
        trace!("Sending {} message to peer: {}", message.name(), self.peer);
        guard(
            &self.cancel,
            self.read_timeout,
            &self.peer,
            "send message",
            wire::write_message(&mut self.stream, message),
        )
        .await
    }

    /// Receive the next non keep-alive message from the peer
    pub async fn receive_message(&mut self) -> Result<Message> {
        if !self.state.is_handshaken() {
            return Err(self.out_of_order("receive message"));
        }

        loop {
            let message = guard(
                &self.cancel,
                self.read_timeout,
                &self.peer,
                "receive message",
                wire::read_message(&mut self.stream),
            )
            .await?;

            if message == Message::KeepAlive {
                trace!("Keep-alive from peer: {}", self.peer);
                continue;
            }
            debug!("Received {} message from peer: {}", message.name(), self.peer);
            return Ok(message);
        }
    }

    /// Shut the stream down and release it
    pub async fn close(mut self) -> Result<()> {
        info!("Closing connection to peer: {}", self.peer);
        self.stream.shutdown().await.map_err(|e| {
            TorrentError::network_error_full("Failed to close", self.peer.clone(), e.to_string())
        })
    }

    // The bitfield arrives before any Have we act on and fixes the piece range.
    fn record_have(&mut self, piece_index: u32) -> Result<()> {
        let recorded = self
            .bitfield
            .as_deref_mut()
            .is_some_and(|bits| set_piece(bits, piece_index));
        if !recorded {
            error!(
                "Peer {} announced piece {} outside its {} byte bitfield",
                self.peer,
                piece_index,
                self.bitfield.as_ref().map_or(0, Vec::len)
            );
            return Err(TorrentError::protocol_error(format!(
                "have for piece {} is outside the advertised bitfield",
                piece_index
            )));
        }
        trace!("Peer {} now has piece {}", self.peer, piece_index);
        Ok(())
    }

    fn require(&self, expected: ConnectionState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(self.out_of_order(operation));
        }
        Ok(())
    }

    fn out_of_order(&self, operation: &str) -> TorrentError {
        error!("Cannot {} with peer {} in state {}", operation, self.peer, self.state);
        TorrentError::protocol_error(format!("cannot {} in state {}", operation, self.state))
    }
}

/// Run `fut` unless the token fires or `limit` elapses first
async fn guard<T>(
    cancel: &CancellationToken,
    limit: Duration,
    peer: &str,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("{} with peer {} cancelled", operation, peer);
            Err(TorrentError::Cancelled)
        }
        outcome = timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out for peer {}", operation, peer);
                Err(TorrentError::peer_timeout(peer, operation))
            }
        },
    }
}
