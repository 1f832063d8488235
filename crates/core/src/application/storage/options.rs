// Storage Options - what a StorageEngine is configured with

use crate::domain::{AdmissionCeiling, PathPolicy, QueueConfig};
use crate::error::{AppError, Result};
use std::time::Duration;

/// Engine configuration
///
/// `max_concurrent` and `poll_interval_ms` are raw: non-positive or missing
/// values fall back to the queue defaults when applied.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub destination: PathPolicy,
    pub filename: PathPolicy,
    pub max_concurrent: Option<i64>,
    pub poll_interval_ms: Option<i64>,
    pub ceiling: AdmissionCeiling,
    /// Optional deadline per admitted write
    pub item_timeout_ms: Option<u64>,
}

impl StorageOptions {
    /// Options writing into `destination` with content-hash filenames
    pub fn new(destination: PathPolicy) -> Self {
        Self {
            destination,
            filename: PathPolicy::ContentHash,
            max_concurrent: None,
            poll_interval_ms: None,
            ceiling: AdmissionCeiling::default(),
            item_timeout_ms: None,
        }
    }

    pub fn with_filename(mut self, filename: PathPolicy) -> Self {
        self.filename = filename;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: i64) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: i64) -> Self {
        self.poll_interval_ms = Some(poll_interval_ms);
        self
    }

    pub fn with_ceiling(mut self, ceiling: AdmissionCeiling) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_item_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.item_timeout_ms = Some(timeout_ms);
        self
    }

    /// Sanitized queue configuration
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::from_raw(self.max_concurrent, self.poll_interval_ms).with_ceiling(self.ceiling)
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn needs_buffer(&self) -> bool {
        self.destination.needs_buffer() || self.filename.needs_buffer()
    }
}

/// Reject options that can never produce a path
pub fn validate_options(options: &StorageOptions) -> Result<()> {
    if options.destination.fixed_value() == Some("") {
        return Err(AppError::Config("destination must not be empty".to_string()));
    }
    if options.filename.fixed_value() == Some("") {
        return Err(AppError::Config("filename must not be empty".to_string()));
    }
    Ok(())
}
