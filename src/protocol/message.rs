//! BitTorrent protocol messages
//!
//! Every message after the handshake is framed as a 4-byte big-endian
//! length, a 1-byte id and an id-specific payload. A zero length is a
//! keep-alive and carries no id.

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, error, trace};

use crate::error::{Result, TorrentError};

/// Size of the length prefix in front of every message
pub const LENGTH_PREFIX_LEN: usize = 4;

/// BitTorrent message IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = TorrentError;

    fn try_from(value: u8) -> Result<Self> {
        trace!("Converting byte to MessageId: {}", value);
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            _ => {
                error!("Invalid message ID: {}", value);
                Err(TorrentError::protocol_error(format!(
                    "unknown message id {}",
                    value
                )))
            }
        }
    }
}

/// BitTorrent protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece_index: u32 },
    Bitfield { bitfield: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// Get the message ID (returns None for KeepAlive)
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield { .. } => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
            Message::KeepAlive => None,
        }
    }

    /// Short name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep-alive",
            Message::Choke => "choke",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::NotInterested => "not interested",
            Message::Have { .. } => "have",
            Message::Bitfield { .. } => "bitfield",
            Message::Request { .. } => "request",
            Message::Piece { .. } => "piece",
            Message::Cancel { .. } => "cancel",
        }
    }

    /// Get the message length (excluding the length prefix)
    pub fn length(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have { .. } => 5,
            Message::Bitfield { bitfield } => 1 + bitfield.len() as u32,
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len() as u32,
        }
    }

    /// Serialize the message to bytes (including length prefix)
    pub fn serialize(&self) -> Vec<u8> {
        trace!("Serializing {} message", self.name());
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + self.length() as usize);

        buf.put_u32(self.length());
        if let Some(id) = self.message_id() {
            buf.put_u8(id as u8);
        }

        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {}
            Message::Have { piece_index } => buf.put_u32(*piece_index),
            Message::Bitfield { bitfield } => buf.put_slice(bitfield),
            Message::Request { index, begin, length } | Message::Cancel { index, begin, length } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
        }

        trace!("Message serialized: {} bytes", buf.len());
        buf.to_vec()
    }

    /// Decode a frame body: the id byte and payload, without the length prefix.
    /// An empty body is a keep-alive.
    pub fn from_frame(mut buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            trace!("Received KeepAlive message");
            return Ok(Message::KeepAlive);
        }

        let message_id = MessageId::try_from(buf.get_u8())?;
        debug!("Message ID: {:?}, payload {} bytes", message_id, buf.remaining());

        let message = match message_id {
            MessageId::Choke => {
                expect_payload(message_id, buf, 0)?;
                Message::Choke
            }
            MessageId::Unchoke => {
                expect_payload(message_id, buf, 0)?;
                Message::Unchoke
            }
            MessageId::Interested => {
                expect_payload(message_id, buf, 0)?;
                Message::Interested
            }
            MessageId::NotInterested => {
                expect_payload(message_id, buf, 0)?;
                Message::NotInterested
            }
            MessageId::Have => {
                expect_payload(message_id, buf, 4)?;
                Message::Have {
                    piece_index: buf.get_u32(),
                }
            }
            MessageId::Bitfield => Message::Bitfield {
                bitfield: buf.to_vec(),
            },
            MessageId::Request => {
                expect_payload(message_id, buf, 12)?;
                Message::Request {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                }
            }
            MessageId::Piece => {
                if buf.remaining() < 8 {
                    error!("Piece message too short: {} bytes", buf.remaining());
                    return Err(TorrentError::protocol_error(format!(
                        "piece message needs an 8 byte header, got {} bytes",
                        buf.remaining()
                    )));
                }
                let index = buf.get_u32();
                let begin = buf.get_u32();
                Message::Piece {
                    index,
                    begin,
                    block: buf.to_vec(),
                }
            }
            MessageId::Cancel => {
                expect_payload(message_id, buf, 12)?;
                Message::Cancel {
                    index: buf.get_u32(),
                    begin: buf.get_u32(),
                    length: buf.get_u32(),
                }
            }
        };

        Ok(message)
    }
}

fn expect_payload(id: MessageId, buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() != expected {
        error!(
            "{:?} message payload: expected {} bytes, got {}",
            id,
            expected,
            buf.len()
        );
        return Err(TorrentError::protocol_error(format!(
            "{:?} payload must be {} bytes, got {}",
            id,
            expected,
            buf.len()
        )));
    }
    Ok(())
}

/// Whether bit `index` is set in a peer bitfield (high bit of byte 0 is piece 0)
pub fn has_piece(bitfield: &[u8], index: u32) -> bool {
    let byte = (index / 8) as usize;
    let bit = 7 - (index % 8);
    bitfield.get(byte).is_some_and(|b| (b >> bit) & 1 == 1)
}

/// Set bit `index`. Returns `false`, leaving the bitfield untouched, when
/// `index` lies past its end.
pub fn set_piece(bitfield: &mut [u8], index: u32) -> bool {
    let byte = (index / 8) as usize;
    match bitfield.get_mut(byte) {
        Some(bits) => {
            *bits |= 1 << (7 - (index % 8));
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_conversion() {
        assert_eq!(MessageId::try_from(0).unwrap(), MessageId::Choke);
        assert_eq!(MessageId::try_from(5).unwrap(), MessageId::Bitfield);
        assert_eq!(MessageId::try_from(8).unwrap(), MessageId::Cancel);
        assert!(MessageId::try_from(9).is_err());
        assert!(MessageId::try_from(20).is_err());
    }

    #[test]
    fn test_serialize_interested() {
        assert_eq!(Message::Interested.serialize(), vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_serialize_keep_alive() {
        assert_eq!(Message::KeepAlive.serialize(), vec![0, 0, 0, 0]);
        assert_eq!(Message::from_frame(&[]).unwrap(), Message::KeepAlive);
    }

    #[test]
    fn test_serialize_request_layout() {
        let msg = Message::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        };
        assert_eq!(
            msg.serialize(),
            vec![0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
        );
    }

    #[test]
    fn test_from_frame_piece() {
        let data = vec![7, 0, 0, 0, 2, 0, 0, 0, 0, 0xde, 0xad, 0xbe];
        let msg = Message::from_frame(&data).unwrap();
        assert_eq!(
            msg,
            Message::Piece {
                index: 2,
                begin: 0,
                block: vec![0xde, 0xad, 0xbe],
            }
        );
    }

    #[test]
    fn test_from_frame_have_and_bitfield() {
        let have = Message::Have { piece_index: 7 };
        assert_eq!(Message::from_frame(&have.serialize()[4..]).unwrap(), have);

        let bitfield = Message::Bitfield {
            bitfield: vec![0b1010_0000, 0xff],
        };
        assert_eq!(Message::from_frame(&bitfield.serialize()[4..]).unwrap(), bitfield);
    }

    #[test]
    fn test_from_frame_rejects_bad_bodies() {
        // unknown id
        assert!(Message::from_frame(&[9]).is_err());
        // have without its index
        assert!(Message::from_frame(&[4, 0, 0]).is_err());
        // request with a trailing byte
        assert!(Message::from_frame(&[6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0]).is_err());
        // piece without a full header
        assert!(Message::from_frame(&[7, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn test_choke_with_payload_is_rejected() {
        let err = Message::from_frame(&[0, 1]).unwrap_err();
        assert!(matches!(err, TorrentError::Protocol { .. }));
    }

    #[test]
    fn test_length_matches_serialized_size() {
        let msg = Message::Piece {
            index: 0,
            begin: 0,
            block: vec![1; 100],
        };
        assert_eq!(msg.serialize().len(), 4 + msg.length() as usize);
    }

    #[test]
    fn test_bitfield_helpers() {
        let mut bitfield = vec![0b1000_0001];
        assert!(has_piece(&bitfield, 0));
        assert!(!has_piece(&bitfield, 1));
        assert!(has_piece(&bitfield, 7));
        assert!(!has_piece(&bitfield, 8));

        assert!(set_piece(&mut bitfield, 1));
        assert_eq!(bitfield, vec![0b1100_0001]);
        assert!(has_piece(&bitfield, 1));
    }

    #[test]
    fn test_set_piece_never_grows() {
        let mut bitfield = vec![0u8; 2];
        assert!(!set_piece(&mut bitfield, 16));
        assert!(!set_piece(&mut bitfield, u32::MAX));
        assert_eq!(bitfield, vec![0, 0]);
    }
}
