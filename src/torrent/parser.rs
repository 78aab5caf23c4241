//! Torrent file parser
//!
//! Turns raw `.torrent` bytes into a [`Metainfo`].

use std::ops::Range;

use tracing::{debug, error, info, trace, warn};

use crate::bencode::{self, BencodeValue, Dictionary};
use crate::error::{Result, TorrentError};
use crate::torrent::info::{parse_piece_hashes, sha1_digest, InfoDict, Metainfo};

/// Parser for .torrent files
pub struct TorrentParser;

impl TorrentParser {
    /// Parse a .torrent file from bytes
    pub fn parse_bytes(data: &[u8]) -> Result<Metainfo> {
        info!("Parsing torrent file from {} bytes", data.len());
        trace!("Torrent data (first 100 bytes): {:?}", &data[..data.len().min(100)]);

        let root = bencode::from_bytes(data)?;
        let root_dict = root
            .as_dict()
            .ok_or_else(|| TorrentError::invalid_metainfo("root must be a dictionary"))?;

        let announce = root_dict
            .get(b"announce".as_slice())
            .and_then(BencodeValue::as_str)
            .ok_or_else(|| TorrentError::invalid_metainfo("missing or invalid announce"))?
            .to_string();

        let info_dict = root_dict
            .get(b"info".as_slice())
            .and_then(BencodeValue::as_dict)
            .ok_or_else(|| TorrentError::invalid_metainfo("missing info dictionary"))?;

        let length = get_u64(info_dict, "length")?;
        let piece_length = get_u64(info_dict, "piece length")?;
        if piece_length == 0 {
            return Err(TorrentError::invalid_metainfo("piece length must be positive"));
        }

        let name = get_bytes(info_dict, "name")?;
        let name = String::from_utf8_lossy(name).into_owned();

        let pieces = parse_piece_hashes(get_bytes(info_dict, "pieces")?)?;
        let expected_pieces = length.div_ceil(piece_length);
        if pieces.len() as u64 != expected_pieces {
            error!(
                "Torrent declares {} piece hashes but {} bytes need {}",
                pieces.len(),
                length,
                expected_pieces
            );
            return Err(TorrentError::invalid_metainfo(format!(
                "expected {} piece hashes, found {}",
                expected_pieces,
                pieces.len()
            )));
        }
        if pieces.len() > u32::MAX as usize {
            return Err(TorrentError::invalid_metainfo("too many pieces"));
        }

        let info_hash = Self::info_hash(data)?;
        debug!("Info hash: {}", hex::encode(info_hash));

        info!("Successfully parsed torrent: {} ({} pieces)", name, pieces.len());
        Ok(Metainfo {
            announce,
            info: InfoDict {
                length,
                name,
                piece_length,
                pieces,
                info_hash,
            },
        })
    }

    /// SHA-1 over the exact bytes of the `info` value as they appear in
    /// `data`, so non-canonical files still hash the way trackers expect.
    fn info_hash(data: &[u8]) -> Result<[u8; 20]> {
        let span = Self::info_span(data)?
            .ok_or_else(|| TorrentError::invalid_metainfo("missing info dictionary"))?;
        let raw = &data[span];

        let (decoded, _) = bencode::decode(raw, 0)?;
        if bencode::encode(&decoded) != raw {
            warn!("Info dictionary is not canonically encoded; hashing the original bytes");
        }

        Ok(sha1_digest(raw))
    }

    /// Byte range of the value stored under `info` in the root dictionary
    fn info_span(data: &[u8]) -> Result<Option<Range<usize>>> {
        let mut span = None;
        let mut idx = 1; // skip root 'd'
        while data.get(idx).is_some_and(|&b| b != b'e') {
            let (key, value_start) = bencode::decode(data, idx)?;
            let (_, value_end) = bencode::decode(data, value_start)?;
            if key.as_bytes() == Some(b"info".as_slice()) {
                // the decoded dictionary keeps the last duplicate, so does this
                span = Some(value_start..value_end);
            }
            idx = value_end;
        }
        Ok(span)
    }
}

fn get_bytes<'a>(dict: &'a Dictionary, key: &str) -> Result<&'a [u8]> {
    dict.get(key.as_bytes())
        .and_then(BencodeValue::as_bytes)
        .ok_or_else(|| TorrentError::invalid_metainfo(format!("missing or invalid {}", key)))
}

fn get_u64(dict: &Dictionary, key: &str) -> Result<u64> {
    let value = dict
        .get(key.as_bytes())
        .and_then(BencodeValue::as_int)
        .ok_or_else(|| TorrentError::invalid_metainfo(format!("missing or invalid {}", key)))?;
    u64::try_from(value)
        .map_err(|_| TorrentError::invalid_metainfo(format!("{} must not be negative", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent_bytes(info: &[u8]) -> Vec<u8> {
        let mut data = b"d8:announce31:http://tracker.example.com/anno4:info".to_vec();
        data.extend_from_slice(info);
        data.push(b'e');
        data
    }

    fn info_bytes(length: u64, piece_length: u64, hashes: usize) -> Vec<u8> {
        let mut info = format!(
            "d6:lengthi{}e4:name10:sample.txt12:piece lengthi{}e6:pieces{}:",
            length,
            piece_length,
            hashes * 20
        )
        .into_bytes();
        info.extend((0..hashes * 20).map(|i| i as u8));
        info.push(b'e');
        info
    }

    #[test]
    fn test_parse_valid_torrent() {
        let info = info_bytes(92063, 32768, 3);
        let metainfo = TorrentParser::parse_bytes(&torrent_bytes(&info)).unwrap();

        assert_eq!(metainfo.announce, "http://tracker.example.com/anno");
        assert_eq!(metainfo.info.length, 92063);
        assert_eq!(metainfo.info.name, "sample.txt");
        assert_eq!(metainfo.info.piece_length, 32768);
        assert_eq!(metainfo.piece_count(), 3);
        assert_eq!(metainfo.info.pieces[1][0], 20);
        assert_eq!(metainfo.info.info_hash, sha1_digest(&info));
    }

    #[test]
    fn test_info_hash_is_deterministic() {
        let data = torrent_bytes(&info_bytes(92063, 32768, 3));
        let first = TorrentParser::parse_bytes(&data).unwrap();
        for _ in 0..10 {
            let again = TorrentParser::parse_bytes(&data).unwrap();
            assert_eq!(again.info.info_hash, first.info.info_hash);
        }
    }

    #[test]
    fn test_info_hash_matches_canonical_encoding() {
        let data = torrent_bytes(&info_bytes(92063, 32768, 3));
        let metainfo = TorrentParser::parse_bytes(&data).unwrap();

        let root = bencode::from_bytes(&data).unwrap();
        let reencoded = bencode::encode(root.get(b"info").unwrap());
        assert_eq!(metainfo.info.info_hash, sha1_digest(&reencoded));
    }

    #[test]
    fn test_info_hash_uses_original_bytes_for_unsorted_info() {
        let mut info = b"d4:name10:sample.txt6:lengthi10e12:piece lengthi16e6:pieces20:".to_vec();
        info.extend_from_slice(&[7u8; 20]);
        info.push(b'e');
        let metainfo = TorrentParser::parse_bytes(&torrent_bytes(&info)).unwrap();
        assert_eq!(metainfo.info.info_hash, sha1_digest(&info));
    }

    #[test]
    fn test_root_must_be_dictionary() {
        let err = TorrentParser::parse_bytes(b"l4:spame").unwrap_err();
        assert!(matches!(err, TorrentError::InvalidMetainfo { .. }));
    }

    #[test]
    fn test_missing_info() {
        let err = TorrentParser::parse_bytes(b"d8:announce3:urle").unwrap_err();
        assert!(matches!(err, TorrentError::InvalidMetainfo { .. }));
    }

    #[test]
    fn test_info_not_dictionary() {
        let err = TorrentParser::parse_bytes(&torrent_bytes(b"i3e")).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidMetainfo { .. }));
    }

    #[test]
    fn test_missing_length() {
        let info = b"d4:name1:a12:piece lengthi16e6:pieces0:e";
        let err = TorrentParser::parse_bytes(&torrent_bytes(info)).unwrap_err();
        assert_eq!(err, TorrentError::invalid_metainfo("missing or invalid length"));
    }

    #[test]
    fn test_mistyped_piece_length() {
        let info = b"d6:lengthi0e4:name1:a12:piece length2:166:pieces0:e";
        let err = TorrentParser::parse_bytes(&torrent_bytes(info)).unwrap_err();
        assert_eq!(err, TorrentError::invalid_metainfo("missing or invalid piece length"));
    }

    #[test]
    fn test_pieces_not_multiple_of_20() {
        let mut info = b"d6:lengthi10e4:name1:a12:piece lengthi16e6:pieces21:".to_vec();
        info.extend_from_slice(&[0u8; 21]);
        info.push(b'e');
        let err = TorrentParser::parse_bytes(&torrent_bytes(&info)).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidMetainfo { .. }));
    }

    #[test]
    fn test_piece_count_mismatch() {
        let info = info_bytes(92063, 32768, 2);
        let err = TorrentParser::parse_bytes(&torrent_bytes(&info)).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidMetainfo { .. }));
    }

    #[test]
    fn test_negative_length() {
        let info = b"d6:lengthi-1e4:name1:a12:piece lengthi16e6:pieces0:e";
        let err = TorrentParser::parse_bytes(&torrent_bytes(info)).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidMetainfo { .. }));
    }

    #[test]
    fn test_malformed_bencode() {
        let err = TorrentParser::parse_bytes(b"d8:announce").unwrap_err();
        assert!(matches!(err, TorrentError::Bencode(_)));
    }
}
