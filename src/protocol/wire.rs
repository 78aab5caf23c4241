//! Wire protocol utilities
//!
//! Async helpers that move handshakes and framed messages over any
//! `AsyncRead`/`AsyncWrite` stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, trace};

use super::handshake::HANDSHAKE_LEN;
use super::message::LENGTH_PREFIX_LEN;
use super::{Handshake, Message};
use crate::error::{Result, TorrentError};

/// Largest frame we accept; a block is 16 KiB and bitfields stay far below this
pub const MAX_MESSAGE_LEN: usize = 2 * 1024 * 1024;

/// Read a complete message from the stream
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut length_buf = [0u8; LENGTH_PREFIX_LEN];
    reader.read_exact(&mut length_buf).await?;
    let length = u32::from_be_bytes(length_buf) as usize;

    if length == 0 {
        return Ok(Message::KeepAlive);
    }
    if length > MAX_MESSAGE_LEN {
        error!("Peer announced a {} byte frame", length);
        return Err(TorrentError::protocol_error(format!(
            "frame of {} bytes exceeds the {} byte limit",
            length, MAX_MESSAGE_LEN
        )));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    trace!("Read {} byte frame", length);

    Message::from_frame(&payload)
}

/// Write a message to the stream
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let serialized = message.serialize();
    writer.write_all(&serialized).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one 68-byte handshake from the stream
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake> {
    let mut buf = [0u8; HANDSHAKE_LEN];
    reader.read_exact(&mut buf).await.map_err(|e| {
        error!("Failed to read handshake: {}", e);
        TorrentError::handshake_failed(format!("could not read handshake: {}", e))
    })?;
    Handshake::deserialize(&buf)
}

/// Write a handshake to the stream
pub async fn write_handshake<W: AsyncWrite + Unpin>(
    writer: &mut W,
    handshake: &Handshake,
) -> Result<()> {
    let serialized = handshake.serialize();
    let sent = async {
        writer.write_all(&serialized).await?;
        writer.flush().await
    };
    sent.await.map_err(|e| {
        error!("Failed to send handshake: {}", e);
        TorrentError::handshake_failed(format!("could not send handshake: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let msg = Message::Request {
            index: 3,
            begin: 16384,
            length: 100,
        };
        write_message(&mut client, &msg).await.unwrap();
        write_message(&mut client, &Message::KeepAlive).await.unwrap();

        assert_eq!(read_message(&mut server).await.unwrap(), msg);
        assert_eq!(read_message(&mut server).await.unwrap(), Message::KeepAlive);
    }

    #[tokio::test]
    async fn test_read_message_rejects_huge_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, TorrentError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_read_message_eof_is_network_error() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, TorrentError::Network { .. }));
    }

    #[tokio::test]
    async fn test_handshake_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let handshake = Handshake::new([9u8; 20], [8u8; 20]);
        write_handshake(&mut client, &handshake).await.unwrap();
        assert_eq!(read_handshake(&mut server).await.unwrap(), handshake);
    }

    #[tokio::test]
    async fn test_truncated_handshake() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let bytes = Handshake::new([9u8; 20], [8u8; 20]).serialize();
        client.write_all(&bytes[..30]).await.unwrap();
        drop(client);
        let err = read_handshake(&mut server).await.unwrap_err();
        assert!(matches!(err, TorrentError::HandshakeFailed { .. }));
    }
}
