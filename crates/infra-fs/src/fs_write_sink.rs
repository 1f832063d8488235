// Filesystem write sink
use async_trait::async_trait;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use stowage_core::domain::ByteStream;
use stowage_core::port::WriteSink;

/// Writes uploads to the local filesystem
///
/// Files are created (or truncated) at the resolved path. With `durable`
/// set, file data is synced to disk before the write is reported done.
#[derive(Debug, Clone, Default)]
pub struct FsWriteSink {
    durable: bool,
}

impl FsWriteSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sync file data before reporting a write as complete
    pub fn durable() -> Self {
        Self { durable: true }
    }

    async fn finish(&self, mut file: File) -> std::io::Result<()> {
        file.flush().await?;
        if self.durable {
            file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl WriteSink for FsWriteSink {
    async fn ensure_dir(&self, dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir).await.map_err(|e| {
            warn!(dir = %dir.display(), error = %e, "Failed to create directory");
            e
        })
    }

    async fn write_buffer(&self, path: &Path, data: &[u8]) -> std::io::Result<u64> {
        let mut file = File::create(path).await?;
        file.write_all(data).await?;
        self.finish(file).await?;

        debug!(path = %path.display(), bytes = data.len(), "Buffer written");
        Ok(data.len() as u64)
    }

    async fn write_stream(&self, path: &Path, stream: &mut ByteStream) -> std::io::Result<u64> {
        let mut file = File::create(path).await?;
        let written = tokio::io::copy(stream, &mut file).await?;
        self.finish(file).await?;

        debug!(path = %path.display(), bytes = written, "Stream written");
        Ok(written)
    }

    async fn remove(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_file(path).await
    }
}
