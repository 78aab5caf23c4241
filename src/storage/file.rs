//! File storage module
//!
//! Reads `.torrent` files and writes downloaded bytes to disk.

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::error::{Result, TorrentError};
use crate::torrent::{Metainfo, TorrentParser};

/// Read a whole `.torrent` file
pub async fn read_torrent(path: &Path) -> Result<Vec<u8>> {
    info!("Loading torrent file from: {}", path.display());
    let data = fs::read(path).await.map_err(|e| {
        error!("Failed to read torrent file '{}': {}", path.display(), e);
        TorrentError::storage_error_full(
            "Failed to read torrent file",
            path.display().to_string(),
            e.to_string(),
        )
    })?;
    debug!("Read {} bytes from torrent file", data.len());
    Ok(data)
}

/// Read and parse a `.torrent` file
pub async fn load_metainfo(path: &Path) -> Result<Metainfo> {
    let data = read_torrent(path).await?;
    TorrentParser::parse_bytes(&data)
}

/// Write `data` to `path`, creating parent directories and replacing any
/// existing file
pub async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            debug!("Creating directory: {}", parent.display());
            fs::create_dir_all(parent).await.map_err(|e| {
                error!("Failed to create directory '{}': {}", parent.display(), e);
                TorrentError::storage_error_full(
                    "Failed to create directory",
                    parent.display().to_string(),
                    e.to_string(),
                )
            })?;
        }
    }

    let storage_error = |message: &str, e: std::io::Error| {
        error!("{} '{}': {}", message, path.display(), e);
        TorrentError::storage_error_full(message, path.display().to_string(), e.to_string())
    };

    let mut file = fs::File::create(path)
        .await
        .map_err(|e| storage_error("Failed to create file", e))?;
    file.write_all(data)
        .await
        .map_err(|e| storage_error("Failed to write to file", e))?;
    file.flush()
        .await
        .map_err(|e| storage_error("Failed to flush file", e))?;

    info!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_output_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/piece-0");

        write_output(&path, b"piece bytes").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"piece bytes");
    }

    #[tokio::test]
    async fn test_write_output_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"a much longer previous file").unwrap();

        write_output(&path, b"new").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_write_output_into_a_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let err = write_output(&blocker.join("out.bin"), b"data").await.unwrap_err();
        assert!(matches!(err, TorrentError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_read_missing_torrent() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_torrent(&dir.path().join("missing.torrent")).await.unwrap_err();
        assert!(matches!(err, TorrentError::Storage { path: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_load_metainfo() {
        let mut data = b"d8:announce20:http://t.example/ann4:infod6:lengthi3e4:name1:a12:piece lengthi16e6:pieces20:".to_vec();
        data.extend_from_slice(&[3u8; 20]);
        data.extend_from_slice(b"ee");

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), &data).unwrap();

        let metainfo = load_metainfo(file.path()).await.unwrap();
        assert_eq!(metainfo.announce, "http://t.example/ann");
        assert_eq!(metainfo.info.length, 3);
        assert_eq!(metainfo.piece_count(), 1);
    }
}
