// Queue Item Domain Model

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::sync::oneshot;
use tracing::debug;

use super::error::{DomainError, UploadError};
use super::upload::{FileMeta, Payload, RequestMeta, StoredFile, UploadFile};

/// Queue item ID (`<epoch ms>-<n>`, unique among live items)
pub type ItemId = String;

/// Outcome delivered to the uploader
pub type UploadOutcome = std::result::Result<StoredFile, UploadError>;

/// One-shot completion channel back to the uploader
pub type Completion = oneshot::Sender<UploadOutcome>;

/// Queue item state. Ordering follows the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemState {
    Pending,
    Started,
    Processing,
    Finished,
}

impl QueueItemState {
    /// Holds a concurrency slot
    pub fn is_in_flight(&self) -> bool {
        matches!(self, QueueItemState::Started | QueueItemState::Processing)
    }
}

impl std::fmt::Display for QueueItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueItemState::Pending => write!(f, "PENDING"),
            QueueItemState::Started => write!(f, "STARTED"),
            QueueItemState::Processing => write!(f, "PROCESSING"),
            QueueItemState::Finished => write!(f, "FINISHED"),
        }
    }
}

/// Queue Item Entity
#[derive(Debug)]
pub struct QueueItem {
    pub id: ItemId,
    pub request: RequestMeta,
    pub file: FileMeta,

    state: QueueItemState,
    destination: Option<String>,
    filename: Option<String>,
    full_path: Option<PathBuf>,
    buffered_len: Option<usize>,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    result: Option<UploadOutcome>,
    payload: Option<Payload>,
    completion: Option<Completion>,
}

impl QueueItem {
    /// Create a new Pending item
    ///
    /// # Arguments
    ///
    /// * `id` - Item ID (injected, collision-checked by the queue)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `request` - Inbound request metadata
    /// * `upload` - File metadata and payload
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        request: RequestMeta,
        upload: UploadFile,
    ) -> Self {
        Self {
            id: id.into(),
            request,
            file: upload.meta,
            state: QueueItemState::Pending,
            destination: None,
            filename: None,
            full_path: None,
            buffered_len: None,
            created_at,
            started_at: None,
            finished_at: None,
            result: None,
            payload: Some(upload.payload),
            completion: None,
        }
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn state(&self) -> QueueItemState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == QueueItemState::Finished
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn full_path(&self) -> Option<&Path> {
        self.full_path.as_deref()
    }

    pub fn buffered_len(&self) -> Option<usize> {
        self.buffered_len
    }

    pub fn result(&self) -> Option<&UploadOutcome> {
        self.result.as_ref()
    }

    /// Set destination and filename, recomputing the full path
    pub fn set_paths(&mut self, destination: Option<String>, filename: Option<String>) {
        self.destination = destination;
        self.filename = filename;
        self.full_path = produce_full_path(self.destination.as_deref(), self.filename.as_deref());
    }

    /// Transition Pending -> Started and hand out the payload.
    ///
    /// Returns `None` for any other state, so a second admission is a no-op.
    pub fn begin(&mut self, now_millis: i64) -> Option<Payload> {
        if self.state != QueueItemState::Pending {
            return None;
        }
        let payload = self.payload.take()?;
        self.state = QueueItemState::Started;
        self.started_at = Some(now_millis);
        Some(payload)
    }

    /// Transition Started -> Processing once the payload is fully buffered
    pub fn mark_processing(&mut self, buffered_len: usize) -> crate::domain::error::Result<()> {
        if self.state != QueueItemState::Started {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: QueueItemState::Processing.to_string(),
            });
        }
        self.state = QueueItemState::Processing;
        self.buffered_len = Some(buffered_len);
        Ok(())
    }

    /// Transition to Finished and answer the uploader (exactly once)
    pub fn finish(
        &mut self,
        now_millis: i64,
        outcome: UploadOutcome,
    ) -> crate::domain::error::Result<()> {
        if !self.state.is_in_flight() {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: QueueItemState::Finished.to_string(),
            });
        }
        self.state = QueueItemState::Finished;
        self.finished_at = Some(now_millis);
        self.result = Some(outcome.clone());

        if let Some(completion) = self.completion.take() {
            if completion.send(outcome).is_err() {
                debug!(upload_id = %self.id, "Uploader stopped waiting for the result");
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id.clone(),
            state: self.state,
            original_name: self.file.original_name.clone(),
            full_path: self.full_path.clone(),
        }
    }
}

/// Read-only view of an item, for introspection and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub state: QueueItemState,
    pub original_name: String,
    pub full_path: Option<PathBuf>,
}

/// Join destination and filename in normalized form.
///
/// `None` unless both parts are non-empty. The filename is always appended
/// under the destination, even when it carries a leading separator.
pub fn produce_full_path(destination: Option<&str>, filename: Option<&str>) -> Option<PathBuf> {
    let destination = destination.filter(|d| !d.is_empty())?;
    let filename = filename.filter(|f| !f.is_empty())?;

    let mut joined = PathBuf::new();
    for component in Path::new(destination).components() {
        push_normalized(&mut joined, component);
    }
    for component in Path::new(filename).components() {
        if matches!(component, Component::RootDir | Component::Prefix(_)) {
            continue;
        }
        push_normalized(&mut joined, component);
    }
    Some(joined)
}

fn push_normalized(path: &mut PathBuf, component: Component<'_>) {
    match component {
        Component::CurDir => {}
        Component::ParentDir => {
            let ends_in_normal =
                matches!(path.components().next_back(), Some(Component::Normal(_)));
            if ends_in_normal {
                path.pop();
            } else if !path.has_root() {
                path.push("..");
            }
        }
        other => path.push(other.as_os_str()),
    }
}
