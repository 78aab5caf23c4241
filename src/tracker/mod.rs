//! HTTP tracker client
//!
//! Builds the announce URL, performs the GET and decodes the compact peer
//! list from the bencoded answer.

use reqwest::Client;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::bencode::{self, BencodeValue, Dictionary};
use crate::cli::Config;
use crate::error::{Result, TorrentError};
use crate::peer::state::{PeerAddress, COMPACT_PEER_LEN};
use crate::torrent::Metainfo;

/// Decoded announce response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Seconds the tracker asks us to wait before announcing again
    pub interval: Option<u64>,
    /// Peers, in the order the tracker listed them
    pub peers: Vec<PeerAddress>,
}

/// Announces to the torrent's HTTP tracker
#[derive(Debug, Clone)]
pub struct TrackerClient {
    client: Client,
    peer_id: [u8; 20],
    port: u16,
}

impl TrackerClient {
    /// Create a client using the configured peer id, port and tracker timeout
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.tracker_timeout).build()?;
        Ok(Self {
            client,
            peer_id: config.peer_id,
            port: config.port,
        })
    }

    /// Announce and return the tracker's peer list
    pub async fn announce(&self, metainfo: &Metainfo) -> Result<TrackerResponse> {
        let url = announce_url(metainfo, &self.peer_id, self.port)?;
        info!("Announcing to tracker: {}", metainfo.announce);
        debug!("Announce URL: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            error!("Tracker answered with HTTP {}", status);
            return Err(TorrentError::tracker_error_with_source(
                "Tracker returned an error status",
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let body = response.bytes().await?;
        debug!("Tracker response: {} bytes", body.len());
        parse_response(&body)
    }
}

/// Announce URL with every query parameter the tracker expects
pub fn announce_url(metainfo: &Metainfo, peer_id: &[u8; 20], port: u16) -> Result<Url> {
    let base = metainfo.announce.as_str();
    let separator = if base.contains('?') { '&' } else { '?' };
    let full = format!(
        "{}{}info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        base,
        separator,
        urlencoding::encode_binary(&metainfo.info.info_hash),
        urlencoding::encode_binary(peer_id),
        port,
        metainfo.info.length
    );
    Ok(Url::parse(&full)?)
}

/// Decode a full announce response body
pub fn parse_response(body: &[u8]) -> Result<TrackerResponse> {
    let dict = response_dict(body)?;

    if let Some(reason) = dict.get(b"failure reason".as_slice()) {
        let reason = reason
            .as_bytes()
            .map(|r| String::from_utf8_lossy(r).into_owned())
            .unwrap_or_else(|| format!("non-string failure reason ({})", reason.kind()));
        warn!("Tracker refused announce: {}", reason);
        return Err(TorrentError::tracker_error(reason));
    }

    let interval = dict
        .get(b"interval".as_slice())
        .and_then(BencodeValue::as_int)
        .and_then(|i| u64::try_from(i).ok());

    let peers = peers_from_dict(&dict)?;
    info!("Tracker returned {} peers", peers.len());
    Ok(TrackerResponse { interval, peers })
}

/// Decode the compact `peers` string of a tracker response
pub fn decode_peers(body: &[u8]) -> Result<Vec<PeerAddress>> {
    peers_from_dict(&response_dict(body)?)
}

fn response_dict(body: &[u8]) -> Result<Dictionary> {
    match bencode::from_bytes(body)? {
        BencodeValue::Dictionary(dict) => Ok(dict),
        other => Err(TorrentError::invalid_peer_list(format!(
            "tracker response is a {}, not a dictionary",
            other.kind()
        ))),
    }
}

fn peers_from_dict(dict: &Dictionary) -> Result<Vec<PeerAddress>> {
    let peers = dict
        .get(b"peers".as_slice())
        .and_then(BencodeValue::as_bytes)
        .ok_or_else(|| TorrentError::invalid_peer_list("missing compact peers string"))?;

    if peers.len() % COMPACT_PEER_LEN != 0 {
        return Err(TorrentError::invalid_peer_list(format!(
            "peers length {} is not a multiple of 6",
            peers.len()
        )));
    }

    Ok(peers
        .chunks_exact(COMPACT_PEER_LEN)
        .map(|chunk| {
            let mut record = [0u8; COMPACT_PEER_LEN];
            record.copy_from_slice(chunk);
            PeerAddress::from_compact(&record)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::InfoDict;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn metainfo(announce: &str) -> Metainfo {
        Metainfo {
            announce: announce.to_string(),
            info: InfoDict {
                length: 92063,
                name: "sample.txt".to_string(),
                piece_length: 32768,
                pieces: vec![[0u8; 20]; 3],
                info_hash: [
                    0xd6, 0x9f, 0x91, 0xe6, 0xb2, 0xae, 0x4c, 0x54, 0x24, 0x68, 0xd1, 0x07, 0x3a,
                    0x71, 0xd4, 0xea, 0x13, 0x87, 0x9a, 0x7f,
                ],
            },
        }
    }

    fn body_with_peers(peers: &[u8]) -> Vec<u8> {
        let mut body = format!("d8:intervali60e5:peers{}:", peers.len()).into_bytes();
        body.extend_from_slice(peers);
        body.push(b'e');
        body
    }

    #[test]
    fn test_decode_single_peer() {
        let peers = decode_peers(&body_with_peers(&[192, 168, 1, 1, 0x1A, 0xE1])).unwrap();
        assert_eq!(peers, vec![PeerAddress::new(Ipv4Addr::new(192, 168, 1, 1), 6881)]);
    }

    #[test]
    fn test_decode_multiple_peers_in_order() {
        let raw = [10, 0, 0, 1, 0, 80, 10, 0, 0, 2, 0x1F, 0x90];
        let peers = decode_peers(&body_with_peers(&raw)).unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].to_string(), "10.0.0.1:80");
        assert_eq!(peers[1].to_string(), "10.0.0.2:8080");
    }

    #[test]
    fn test_decode_peers_bad_length() {
        let err = decode_peers(&body_with_peers(&[1, 2, 3, 4, 5])).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidPeerList { .. }));
    }

    #[test]
    fn test_decode_peers_not_dictionary() {
        let err = decode_peers(b"l5:peerse").unwrap_err();
        assert!(matches!(err, TorrentError::InvalidPeerList { .. }));
    }

    #[test]
    fn test_decode_peers_missing() {
        let err = decode_peers(b"d8:intervali60ee").unwrap_err();
        assert!(matches!(err, TorrentError::InvalidPeerList { .. }));
    }

    #[test]
    fn test_decode_peers_malformed_bencode() {
        let err = decode_peers(b"d5:peers").unwrap_err();
        assert!(matches!(err, TorrentError::Bencode(_)));
    }

    #[test]
    fn test_parse_response_interval() {
        let response = parse_response(&body_with_peers(&[127, 0, 0, 1, 0x1A, 0xE1])).unwrap();
        assert_eq!(response.interval, Some(60));
        assert_eq!(response.peers.len(), 1);
    }

    #[test]
    fn test_parse_response_failure_reason() {
        let err = parse_response(b"d14:failure reason12:unregisterede").unwrap_err();
        assert_eq!(err, TorrentError::tracker_error("unregistered"));
    }

    #[test]
    fn test_announce_url() {
        let url = announce_url(
            &metainfo("http://tracker.example.com/announce"),
            b"00112233445566778899",
            6881,
        )
        .unwrap();
        let url = url.as_str();
        assert!(url.starts_with("http://tracker.example.com/announce?info_hash=%D6%9F%91%E6%B2%AELT%24h%D1%07%3Aq%D4%EA%13%87%9A%7F&"));
        assert!(url.contains("&peer_id=00112233445566778899&"));
        assert!(url.contains("&port=6881&"));
        assert!(url.contains("&uploaded=0&downloaded=0&left=92063&compact=1"));
    }

    #[test]
    fn test_announce_url_keeps_existing_query() {
        let url = announce_url(
            &metainfo("http://tracker.example.com/announce?passkey=abc"),
            b"00112233445566778899",
            6881,
        )
        .unwrap();
        assert!(url.as_str().contains("?passkey=abc&info_hash="));
    }

    #[test]
    fn test_announce_url_invalid() {
        let err = announce_url(&metainfo("not a url"), b"00112233445566778899", 6881).unwrap_err();
        assert!(matches!(err, TorrentError::Tracker { .. }));
    }

    async fn serve_once(status: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
        });
        format!("http://{}/announce", addr)
    }

    #[tokio::test]
    async fn test_announce_against_local_tracker() {
        let announce = serve_once("200 OK", body_with_peers(&[127, 0, 0, 1, 0x1A, 0xE1])).await;
        let client = TrackerClient::new(&Config::default()).unwrap();
        let response = client.announce(&metainfo(&announce)).await.unwrap();
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse::<PeerAddress>().unwrap()]);
    }

    #[tokio::test]
    async fn test_announce_http_error() {
        let announce = serve_once("500 Internal Server Error", Vec::new()).await;
        let client = TrackerClient::new(&Config::default()).unwrap();
        let err = client.announce(&metainfo(&announce)).await.unwrap_err();
        assert!(matches!(err, TorrentError::Tracker { .. }));
    }
}
