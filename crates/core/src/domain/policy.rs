// Path Policy - how destination directories and filenames are chosen

use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::UploadError;
use super::upload::{FileMeta, RequestMeta};

/// Boxed error returned by computed policies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Computed policy: a function of the request and the buffered item
pub type PolicyFn =
    Arc<dyn Fn(&RequestMeta, &ItemContext<'_>) -> Result<String, BoxError> + Send + Sync>;

/// Extension used when the mime type has no known extension
pub const FALLBACK_EXTENSION: &str = "bin";

/// What a computed policy sees of the item being resolved
#[derive(Debug, Clone, Copy)]
pub struct ItemContext<'a> {
    pub id: &'a str,
    pub file: &'a FileMeta,
    /// Fully buffered payload
    pub buffer: &'a [u8],
}

/// Destination or filename policy
#[derive(Clone)]
pub enum PathPolicy {
    /// Same value for every upload
    Fixed(String),
    /// Evaluated per upload after buffering
    Computed(PolicyFn),
    /// `<sha256>_<len>.<ext>` of the buffered contents
    ContentHash,
}

impl PathPolicy {
    pub fn fixed(value: impl Into<String>) -> Self {
        PathPolicy::Fixed(value.into())
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&RequestMeta, &ItemContext<'_>) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        PathPolicy::Computed(Arc::new(f))
    }

    /// Anything but a fixed value may depend on the contents
    pub fn needs_buffer(&self) -> bool {
        !matches!(self, PathPolicy::Fixed(_))
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, PathPolicy::Computed(_))
    }

    pub fn fixed_value(&self) -> Option<&str> {
        match self {
            PathPolicy::Fixed(value) => Some(value),
            _ => None,
        }
    }

    /// Evaluate the policy for one buffered item
    pub fn resolve(
        &self,
        request: &RequestMeta,
        ctx: &ItemContext<'_>,
    ) -> Result<String, UploadError> {
        match self {
            PathPolicy::Fixed(value) => Ok(value.clone()),
            PathPolicy::Computed(f) => f(request, ctx).map_err(UploadError::resolution),
            PathPolicy::ContentHash => Ok(content_hash_filename(ctx.buffer, &ctx.file.mime_type)),
        }
    }
}

impl std::fmt::Debug for PathPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathPolicy::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            PathPolicy::Computed(_) => write!(f, "Computed(..)"),
            PathPolicy::ContentHash => write!(f, "ContentHash"),
        }
    }
}

/// Deterministic filename from content: `<sha256 hex>_<byte len>.<ext>`
pub fn content_hash_filename(buffer: &[u8], mime_type: &str) -> String {
    let digest = Sha256::digest(buffer);
    format!(
        "{}_{}.{}",
        hex::encode(digest),
        buffer.len(),
        extension_for(mime_type)
    )
}

/// Conventional extension for a mime type.
///
/// Common types map to their usual extension. Anything else takes the first
/// extension `mime_guess` knows, then `FALLBACK_EXTENSION`.
pub fn extension_for(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "text/plain" => "txt",
        "text/html" => "html",
        "text/css" => "css",
        "text/csv" => "csv",
        "text/markdown" => "md",
        "text/javascript" | "application/javascript" => "js",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" => "gz",
        "application/octet-stream" => FALLBACK_EXTENSION,
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first().copied())
            .unwrap_or(FALLBACK_EXTENSION),
    }
}
