// Write Sink Port (Interface)
// Where admitted uploads end up: directory creation, writes and deletes

use crate::domain::ByteStream;
use async_trait::async_trait;
use std::path::Path;

/// Durable storage for uploaded files
///
/// Implementations:
/// - FsWriteSink (stowage-infra-fs): local filesystem via tokio::fs
/// - MemorySink (mocks): in-memory, with gating for concurrency tests
#[async_trait]
pub trait WriteSink: Send + Sync {
    /// Create `dir` and any missing parents
    async fn ensure_dir(&self, dir: &Path) -> std::io::Result<()>;

    /// Write a fully buffered payload to `path`, returning bytes written
    async fn write_buffer(&self, path: &Path, data: &[u8]) -> std::io::Result<u64>;

    /// Copy a byte stream to `path` until EOF, returning bytes written
    async fn write_stream(&self, path: &Path, stream: &mut ByteStream) -> std::io::Result<u64>;

    /// Delete the file at `path`
    async fn remove(&self, path: &Path) -> std::io::Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::io::{Error, ErrorKind};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;
    use tokio::sync::Semaphore;

    /// In-memory sink recording every write.
    ///
    /// A gated sink holds each write until `release` hands out a permit, so
    /// tests can observe how many writes are in flight at once.
    #[derive(Default)]
    pub struct MemorySink {
        files: Mutex<HashMap<PathBuf, Vec<u8>>>,
        dirs: Mutex<HashSet<PathBuf>>,
        started: Mutex<Vec<PathBuf>>,
        failing: Mutex<HashSet<PathBuf>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn gated() -> Self {
            Self {
                gate: Some(Arc::new(Semaphore::new(0))),
                ..Self::default()
            }
        }

        /// Let `n` held writes complete
        pub fn release(&self, n: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(n);
            }
        }

        /// Make every write or mkdir at `path` fail with PermissionDenied
        pub fn fail_on(&self, path: impl Into<PathBuf>) {
            self.failing.lock().unwrap().insert(path.into());
        }

        pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(path.as_ref()).cloned()
        }

        pub fn has_dir(&self, dir: impl AsRef<Path>) -> bool {
            self.dirs.lock().unwrap().contains(dir.as_ref())
        }

        pub fn file_count(&self) -> usize {
            self.files.lock().unwrap().len()
        }

        /// Paths in the order their writes began
        pub fn started_order(&self) -> Vec<PathBuf> {
            self.started.lock().unwrap().clone()
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        async fn store(&self, path: &Path, data: Vec<u8>) -> std::io::Result<u64> {
            self.started.lock().unwrap().push(path.to_path_buf());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = self.complete(path, data).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn complete(&self, path: &Path, data: Vec<u8>) -> std::io::Result<u64> {
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|_| Error::new(ErrorKind::Interrupted, "sink gate closed"))?
                    .forget();
            }
            if self.failing.lock().unwrap().contains(path) {
                return Err(Error::new(ErrorKind::PermissionDenied, "mock write refused"));
            }
            let len = data.len() as u64;
            self.files.lock().unwrap().insert(path.to_path_buf(), data);
            Ok(len)
        }
    }

    #[async_trait]
    impl WriteSink for MemorySink {
        async fn ensure_dir(&self, dir: &Path) -> std::io::Result<()> {
            if self.failing.lock().unwrap().contains(dir) {
                return Err(Error::new(ErrorKind::PermissionDenied, "mock mkdir refused"));
            }
            self.dirs.lock().unwrap().insert(dir.to_path_buf());
            Ok(())
        }

        async fn write_buffer(&self, path: &Path, data: &[u8]) -> std::io::Result<u64> {
            self.store(path, data.to_vec()).await
        }

        async fn write_stream(&self, path: &Path, stream: &mut ByteStream) -> std::io::Result<u64> {
            let mut data = Vec::new();
            stream.read_to_end(&mut data).await?;
            self.store(path, data).await
        }

        async fn remove(&self, path: &Path) -> std::io::Result<()> {
            match self.files.lock().unwrap().remove(path) {
                Some(_) => Ok(()),
                None => Err(Error::new(ErrorKind::NotFound, "no such file")),
            }
        }
    }
}
