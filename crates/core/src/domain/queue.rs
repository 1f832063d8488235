// Queue Domain Model

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default ceiling on concurrent in-flight writes
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Default admission pass interval (100ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// How the admission pass compares its running count against `max_concurrent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionCeiling {
    /// Admit while `admitted < max_concurrent`: at most `max_concurrent` in flight
    #[default]
    Exact,
    /// Admit while `admitted <= max_concurrent`: up to `max_concurrent + 1` in flight
    Lenient,
}

impl AdmissionCeiling {
    /// Whether one more item may start, given the count already holding a slot
    pub fn admits(&self, admitted: usize, max_concurrent: usize) -> bool {
        match self {
            AdmissionCeiling::Exact => admitted < max_concurrent,
            AdmissionCeiling::Lenient => admitted <= max_concurrent,
        }
    }
}

/// Queue configuration shared by every engine bound to the same queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub poll_interval_ms: u64,
    pub ceiling: AdmissionCeiling,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            ceiling: AdmissionCeiling::Exact,
        }
    }
}

impl QueueConfig {
    pub fn new(max_concurrent: usize, poll_interval_ms: u64) -> Self {
        Self::from_raw(
            i64::try_from(max_concurrent).ok(),
            i64::try_from(poll_interval_ms).ok(),
        )
    }

    /// Build from raw numbers; non-positive or missing values fall back to defaults.
    pub fn from_raw(max_concurrent: Option<i64>, poll_interval_ms: Option<i64>) -> Self {
        Self {
            max_concurrent: positive_or(max_concurrent, DEFAULT_MAX_CONCURRENT as i64) as usize,
            poll_interval_ms: positive_or(poll_interval_ms, DEFAULT_POLL_INTERVAL_MS as i64) as u64,
            ceiling: AdmissionCeiling::default(),
        }
    }

    pub fn with_ceiling(mut self, ceiling: AdmissionCeiling) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Returns `raw` when it is a positive number, `default` otherwise
pub fn positive_or(raw: Option<i64>, default: i64) -> i64 {
    match raw {
        Some(value) if value > 0 => value,
        _ => default,
    }
}

/// Parse a textual integer; anything non-numeric yields `None`
pub fn parse_number(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
}
