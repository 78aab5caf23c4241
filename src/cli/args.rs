//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the client
#[derive(Debug, Parser)]
#[command(name = "bitclient")]
#[command(about = "A small BitTorrent client", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Port announced to the tracker
    #[arg(short, long, global = true, default_value_t = 6881)]
    pub port: u16,

    /// Use a random peer id instead of the fixed default
    #[arg(long, global = true)]
    pub random_peer_id: bool,

    /// Seconds to wait for a TCP connection to a peer
    #[arg(long, global = true, value_name = "SECS", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Seconds to wait for any single read from a peer
    #[arg(long, global = true, value_name = "SECS", default_value_t = 30)]
    pub read_timeout: u64,

    /// Seconds to wait for the tracker to answer
    #[arg(long, global = true, value_name = "SECS", default_value_t = 15)]
    pub tracker_timeout: u64,

    /// Attempts per piece before the download gives up
    #[arg(long, global = true, default_value_t = 5)]
    pub max_piece_attempts: usize,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode {
        /// Bencoded input, e.g. "d3:foo3:bare"
        value: String,
    },
    /// Print the tracker, length, info hash and piece hashes of a torrent
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
    /// Ask the tracker for peers
    Peers {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
    /// Handshake with one peer and print its peer id
    Handshake {
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Peer address as ip:port
        peer: String,
    },
    /// Download and verify a single piece
    #[command(name = "download_piece")]
    DownloadPiece {
        /// Where to write the piece
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Zero-based piece index
        index: u64,
    },
    /// Download the whole file
    Download {
        /// Where to write the file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
    },
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::WARN
        }
    }
}
