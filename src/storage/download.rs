//! Download manager module
//!
//! Fetches pieces block by block over a ready peer connection and walks
//! the peer list when a peer fails.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::cli::Config;
use crate::error::{Result, TorrentError};
use crate::peer::{PeerAddress, PeerConnection};
use crate::storage::piece::{PieceBuffer, PieceTarget};
use crate::torrent::Metainfo;

/// Download and verify one piece over `conn`.
///
/// Blocks are requested one at a time; each request waits for its block
/// before the next goes out.
pub async fn download_piece<S>(conn: &mut PeerConnection<S>, target: &PieceTarget) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    target.check_range()?;
    if !conn.has_piece(target.index) {
        warn!("Peer {} does not have piece {}", conn.peer(), target.index);
        return Err(TorrentError::PieceUnavailable {
            index: target.index,
            peer: conn.peer().to_string(),
        });
    }

    let blocks = target.blocks()?;
    let length = target.effective_length() as usize;
    debug!(
        "Downloading piece {} ({} bytes, {} blocks) from {}",
        target.index,
        length,
        blocks.len(),
        conn.peer()
    );

    let mut buffer = PieceBuffer::new(target.index, length);
    for block in blocks {
        let data = conn.request_block(target.index, block.begin, block.length).await?;
        trace!("Piece {} block at {} received", target.index, block.begin);
        buffer.append(block.begin, &data)?;
    }

    buffer.verify(&target.expected_hash)
}

/// How a single peer session ended without a fatal error
#[derive(Debug)]
enum SessionOutcome {
    /// Every pending piece was downloaded
    Finished,
    /// The peer is unusable; move on with the pieces still pending
    PeerFailed(TorrentError),
}

/// Downloads pieces of one torrent from a list of peers, one peer at a time
#[derive(Debug, Clone)]
pub struct Downloader {
    metainfo: Metainfo,
    peers: Vec<PeerAddress>,
    config: Config,
    cancel: CancellationToken,
}

impl Downloader {
    /// Create a new downloader
    pub fn new(
        metainfo: Metainfo,
        peers: Vec<PeerAddress>,
        config: Config,
        cancel: CancellationToken,
    ) -> Self {
        info!(
            "Creating downloader for {} with {} peers",
            metainfo.info.name,
            peers.len()
        );
        Self {
            metainfo,
            peers,
            config,
            cancel,
        }
    }

    /// Download and verify a single piece
    pub async fn download_piece(&self, index: u64) -> Result<Vec<u8>> {
        let target = self.metainfo.piece_target(index)?;
        let mut pieces = self.fetch(vec![target]).await?;
        pieces.pop().ok_or(TorrentError::NoPeersAvailable)
    }

    /// Download every piece and return the assembled file
    pub async fn download_all(&self) -> Result<Vec<u8>> {
        let targets = (0..self.metainfo.piece_count() as u64)
            .map(|index| self.metainfo.piece_target(index))
            .collect::<Result<Vec<_>>>()?;

        let pieces = self.fetch(targets).await?;
        let data = pieces.concat();
        info!("Downloaded {} ({} bytes)", self.metainfo.info.name, data.len());
        Ok(data)
    }

    async fn fetch(&self, targets: Vec<PieceTarget>) -> Result<Vec<Vec<u8>>> {
        let mut done = Vec::with_capacity(targets.len());
        let mut attempts = vec![0usize; targets.len()];

        for &peer in &self.peers {
            if done.len() == targets.len() {
                break;
            }
            if self.cancel.is_cancelled() {
                return Err(TorrentError::Cancelled);
            }

            match self.session(peer, &targets, &mut done, &mut attempts).await? {
                SessionOutcome::Finished => {}
                SessionOutcome::PeerFailed(err) => {
                    warn!("Giving up on peer {}: {}", peer, err);
                }
            }
        }

        if done.len() < targets.len() {
            error!(
                "Ran out of peers with {} of {} pieces downloaded",
                done.len(),
                targets.len()
            );
            return Err(TorrentError::NoPeersAvailable);
        }
        Ok(done)
    }

    /// Download pending pieces from one peer.
    ///
    /// `Err` means the whole download must stop: the error is not retryable
    /// or the piece ran out of attempts. Errors that keep the connection
    /// usable are retried on it.
    async fn session(
        &self,
        peer: PeerAddress,
        targets: &[PieceTarget],
        done: &mut Vec<Vec<u8>>,
        attempts: &mut [usize],
    ) -> Result<SessionOutcome> {
        let mut conn = match self.open(peer).await {
            Ok(conn) => conn,
            Err(err) if err.is_retryable() => return Ok(SessionOutcome::PeerFailed(err)),
            Err(err) => return Err(err),
        };

        while let Some(target) = targets.get(done.len()) {
            let slot = done.len();
            if !conn.has_piece(target.index) {
                return Ok(SessionOutcome::PeerFailed(TorrentError::PieceUnavailable {
                    index: target.index,
                    peer: peer.to_string(),
                }));
            }

            attempts[slot] += 1;
            match download_piece(&mut conn, target).await {
                Ok(data) => {
                    info!("Piece {} verified from {}", target.index, peer);
                    done.push(data);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempts[slot] >= self.config.max_piece_attempts => {
                    error!(
                        "Piece {} failed {} times, last error: {}",
                        target.index, attempts[slot], err
                    );
                    return Err(err);
                }
                Err(err) if err.closes_connection() => {
                    return Ok(SessionOutcome::PeerFailed(err));
                }
                Err(err) => warn!("{}; retrying on the same connection", err),
            }
        }

        if let Err(err) = conn.close().await {
            debug!("Closing {} failed: {}", peer, err);
        }
        Ok(SessionOutcome::Finished)
    }

    /// Connect, handshake and wait until the peer lets us request blocks
    async fn open(&self, peer: PeerAddress) -> Result<PeerConnection<TcpStream>> {
        let mut conn = PeerConnection::connect(peer, &self.config, self.cancel.clone()).await?;
        conn.handshake(self.metainfo.info.info_hash, self.config.peer_id)
            .await?;
        conn.prepare().await?;
        Ok(conn)
    }
}
