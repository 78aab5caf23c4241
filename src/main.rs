//! bitclient - Main entry point

use std::path::Path;

use anyhow::{Context, Result};
use bitclient::storage::file::{load_metainfo, write_output};
use bitclient::{
    bencode, CliArgs, Command, Config, Downloader, Metainfo, PeerAddress, PeerConnection,
    TrackerClient,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args);
    config.validate().context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match args.command {
        Command::Decode { value } => decode(&value),
        Command::Info { torrent } => info(&torrent).await,
        Command::Peers { torrent } => peers(&torrent, &config).await,
        Command::Handshake { torrent, peer } => handshake(&torrent, &peer, &config, cancel).await,
        Command::DownloadPiece {
            output,
            torrent,
            index,
        } => {
            let metainfo = load(&torrent).await?;
            let downloader = downloader(metainfo, &config, cancel).await?;
            let piece = downloader
                .download_piece(index)
                .await
                .with_context(|| format!("Failed to download piece {}", index))?;
            write_output(&output, &piece)
                .await
                .context("Failed to write piece")?;
            println!("Piece {} downloaded to {}.", index, output.display());
            Ok(())
        }
        Command::Download { output, torrent } => {
            let metainfo = load(&torrent).await?;
            let downloader = downloader(metainfo, &config, cancel).await?;
            let data = downloader.download_all().await.context("Download failed")?;
            write_output(&output, &data)
                .await
                .context("Failed to write file")?;
            println!("Downloaded {} to {}.", torrent.display(), output.display());
            Ok(())
        }
    }
}

/// Initialize logging; log lines go to stderr so stdout only carries results
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    debug!("Logging initialized with level: {:?}", level);
}

/// Cancel in-flight peer I/O on Ctrl-C
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

async fn load(path: &Path) -> Result<Metainfo> {
    load_metainfo(path)
        .await
        .with_context(|| format!("Failed to load torrent file {}", path.display()))
}

fn decode(value: &str) -> Result<()> {
    let decoded = bencode::from_bytes(value.as_bytes()).context("Failed to decode value")?;
    println!("{}", serde_json::to_string(&decoded)?);
    Ok(())
}

async fn info(path: &Path) -> Result<()> {
    let metainfo = load(path).await?;
    println!("Tracker URL: {}", metainfo.announce);
    println!("Length: {}", metainfo.info.length);
    println!("Info Hash: {}", metainfo.info_hash_hex());
    println!("Piece Length: {}", metainfo.info.piece_length);
    println!("Piece Hashes:");
    for hash in &metainfo.info.pieces {
        println!("{}", hex::encode(hash));
    }
    Ok(())
}

async fn announce(metainfo: &Metainfo, config: &Config) -> Result<Vec<PeerAddress>> {
    let client = TrackerClient::new(config).context("Failed to create tracker client")?;
    let response = client
        .announce(metainfo)
        .await
        .context("Tracker announce failed")?;
    info!("Tracker returned {} peers", response.peers.len());
    Ok(response.peers)
}

async fn peers(path: &Path, config: &Config) -> Result<()> {
    let metainfo = load(path).await?;
    for peer in announce(&metainfo, config).await? {
        println!("{}", peer);
    }
    Ok(())
}

async fn handshake(path: &Path, peer: &str, config: &Config, cancel: CancellationToken) -> Result<()> {
    let metainfo = load(path).await?;
    let addr: PeerAddress = peer.parse().context("Invalid peer address")?;

    let mut conn = PeerConnection::connect(addr, config, cancel)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    let peer_id = conn
        .handshake(metainfo.info.info_hash, config.peer_id)
        .await
        .context("Handshake failed")?;
    println!("Peer ID: {}", hex::encode(peer_id));

    if let Err(e) = conn.close().await {
        debug!("Closing {} failed: {}", addr, e);
    }
    Ok(())
}

async fn downloader(metainfo: Metainfo, config: &Config, cancel: CancellationToken) -> Result<Downloader> {
    let peers = announce(&metainfo, config).await?;
    Ok(Downloader::new(metainfo, peers, config.clone(), cancel))
}
