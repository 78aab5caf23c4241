//! CLI configuration module
//!
//! Runtime settings shared by the tracker client, peer connections and
//! the downloader.

use std::time::Duration;

use crate::cli::args::CliArgs;
use crate::error::{Result, TorrentError};
use crate::protocol::Handshake;

/// Peer id sent when no random id is requested
pub const DEFAULT_PEER_ID: [u8; 20] = *b"00112233445566778899";

/// Configuration for the client
#[derive(Debug, Clone)]
pub struct Config {
    /// Our peer id
    pub peer_id: [u8; 20],
    /// Port announced to the tracker
    pub port: u16,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Timeout for any single peer read
    pub read_timeout: Duration,
    /// Tracker HTTP timeout
    pub tracker_timeout: Duration,
    /// Attempts per piece before giving up
    pub max_piece_attempts: usize,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: DEFAULT_PEER_ID,
            port: 6881,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            tracker_timeout: Duration::from_secs(15),
            max_piece_attempts: 5,
            verbose: false,
            quiet: false,
        }
    }
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        let peer_id = if args.random_peer_id {
            Handshake::generate_peer_id()
        } else {
            DEFAULT_PEER_ID
        };

        Self {
            peer_id,
            port: args.port,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            read_timeout: Duration::from_secs(args.read_timeout),
            tracker_timeout: Duration::from_secs(args.tracker_timeout),
            max_piece_attempts: args.max_piece_attempts,
            verbose: args.verbose,
            quiet: args.quiet,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(TorrentError::config_error_with_field("Port cannot be 0", "port"));
        }

        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("tracker_timeout", self.tracker_timeout),
        ] {
            if value.is_zero() {
                return Err(TorrentError::config_error_with_field(
                    "timeout must be non-zero",
                    field,
                ));
            }
        }

        if self.max_piece_attempts == 0 {
            return Err(TorrentError::config_error_with_field(
                "max_piece_attempts must be at least 1",
                "max_piece_attempts",
            ));
        }

        if self.verbose && self.quiet {
            return Err(TorrentError::config_error_with_field(
                "verbose and quiet are mutually exclusive",
                "verbose",
            ));
        }

        Ok(())
    }
}
