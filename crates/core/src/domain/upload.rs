// Upload Domain Model - inbound descriptors and the stored-file result

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::queue_item::ItemId;

/// Readable byte stream supplied by the calling framework
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Opaque description of the inbound request (JSON serializable).
///
/// The queue never interprets it; computed path policies may.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta(serde_json::Value);

impl RequestMeta {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Convenience lookup of a top-level string field
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

/// File metadata reported by the uploader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub original_name: String,
    pub mime_type: String,
}

impl FileMeta {
    pub fn new(original_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Upload contents: either fully in memory or still arriving
pub enum Payload {
    Buffer(Vec<u8>),
    Stream(ByteStream),
}

impl Payload {
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Payload::Stream(Box::new(reader))
    }

    /// Drain the payload fully into memory
    pub async fn into_buffer(self) -> std::io::Result<Vec<u8>> {
        match self {
            Payload::Buffer(data) => Ok(data),
            Payload::Stream(mut stream) => {
                let mut data = Vec::new();
                stream.read_to_end(&mut data).await?;
                Ok(data)
            }
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Buffer(data) => write!(f, "Buffer({} bytes)", data.len()),
            Payload::Stream(_) => write!(f, "Stream"),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Buffer(data)
    }
}

/// One inbound file: metadata plus contents
#[derive(Debug)]
pub struct UploadFile {
    pub meta: FileMeta,
    pub payload: Payload,
}

impl UploadFile {
    pub fn new(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            meta: FileMeta::new(original_name, mime_type),
            payload: payload.into(),
        }
    }

    pub fn from_reader(
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            meta: FileMeta::new(original_name, mime_type),
            payload: Payload::from_reader(reader),
        }
    }
}

/// Result descriptor of a successful write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub upload_id: ItemId,
    pub original_name: String,
    pub destination: Option<String>,
    pub filename: Option<String>,
    pub full_path: Option<PathBuf>,
    /// Bytes written to the sink
    pub size: u64,
}

impl StoredFile {
    /// Descriptor for a file written outside the queue (e.g. removal by path)
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            upload_id: String::new(),
            original_name: String::new(),
            destination: path.parent().map(|p| p.display().to_string()),
            filename: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            full_path: Some(path),
            size: 0,
        }
    }

    /// Clear destination, filename and path, returning the path that was set
    pub fn clear_location(&mut self) -> Option<PathBuf> {
        self.destination = None;
        self.filename = None;
        self.full_path.take()
    }
}
