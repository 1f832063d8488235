// Write Task - performs one admitted upload off the scheduler task

use crate::application::scheduler::QueueEvent;
use crate::domain::queue_item::produce_full_path;
use crate::domain::{
    FileMeta, ItemContext, ItemId, PathPolicy, Payload, QueueItem, RequestMeta, StoredFile,
    UploadError, UploadOutcome,
};
use crate::port::WriteSink;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Everything an engine decided about how its uploads are written
pub struct WritePlan {
    pub destination: PathPolicy,
    pub filename: PathPolicy,
    pub needs_buffer: bool,
    pub item_timeout: Option<Duration>,
    pub sink: Arc<dyn WriteSink>,
}

impl WritePlan {
    pub fn new(
        destination: PathPolicy,
        filename: PathPolicy,
        item_timeout: Option<Duration>,
        sink: Arc<dyn WriteSink>,
    ) -> Self {
        let needs_buffer = destination.needs_buffer() || filename.needs_buffer();
        Self {
            destination,
            filename,
            needs_buffer,
            item_timeout,
            sink,
        }
    }

    /// Paths known before any content arrives (fixed policies only)
    pub fn initial_paths(&self) -> (Option<String>, Option<String>) {
        (
            self.destination.fixed_value().map(str::to_owned),
            self.filename.fixed_value().map(str::to_owned),
        )
    }
}

/// One admitted upload, detached from the queue
pub(crate) struct WriteJob {
    id: ItemId,
    request: RequestMeta,
    file: FileMeta,
    payload: Payload,
    destination: Option<String>,
    filename: Option<String>,
    plan: Arc<WritePlan>,
    events: UnboundedSender<QueueEvent>,
}

impl WriteJob {
    pub fn new(
        item: &QueueItem,
        plan: &Arc<WritePlan>,
        payload: Payload,
        events: UnboundedSender<QueueEvent>,
    ) -> Self {
        Self {
            id: item.id.clone(),
            request: item.request.clone(),
            file: item.file.clone(),
            payload,
            destination: item.destination().map(str::to_owned),
            filename: item.filename().map(str::to_owned),
            plan: Arc::clone(plan),
            events,
        }
    }

    /// Run the write in its own task and report `Finished` back to the scheduler.
    ///
    /// The write itself runs in an inner task so a panic (e.g. inside a
    /// computed policy) surfaces as a JoinError instead of losing the item.
    pub fn spawn(self) {
        let id = self.id.clone();
        let events = self.events.clone();
        let item_timeout = self.plan.item_timeout;

        tokio::spawn(async move {
            let mut handle = tokio::spawn(self.perform());

            let outcome = match item_timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        handle.abort();
                        let timeout_ms = limit.as_millis() as u64;
                        warn!(upload_id = %id, timeout_ms, "Upload write timed out");
                        Err(UploadError::TimedOut(timeout_ms))
                    }
                },
                None => flatten(handle.await),
            };

            match &outcome {
                Ok(stored) => info!(upload_id = %id, size = stored.size, "Upload stored"),
                Err(e) => warn!(upload_id = %id, error = %e, "Upload failed"),
            }

            if events.send(QueueEvent::Finished { id: id.clone(), outcome }).is_err() {
                error!(upload_id = %id, "Scheduler gone before write finished");
            }
        });
    }

    async fn perform(self) -> UploadOutcome {
        let WriteJob {
            id,
            request,
            file,
            payload,
            destination,
            filename,
            plan,
            events,
        } = self;
        let sink = plan.sink.as_ref();

        if !plan.needs_buffer {
            // Unbuffered: paths were fixed at creation, stream straight to the sink
            let path = require_path(destination.as_deref(), filename.as_deref())?;
            debug!(upload_id = %id, path = %path.display(), "Writing upload unbuffered");
            let size = match payload {
                Payload::Buffer(data) => sink.write_buffer(&path, &data).await,
                Payload::Stream(mut stream) => sink.write_stream(&path, &mut stream).await,
            }
            .map_err(|e| UploadError::io(&path, e))?;
            return Ok(stored(id, &file, destination, filename, path, size));
        }

        // Buffered: drain, then resolve paths from the contents
        let buffer = payload.into_buffer().await.map_err(UploadError::stream)?;
        let _ = events.send(QueueEvent::Processing {
            id: id.clone(),
            buffered_len: buffer.len(),
        });

        let ctx = ItemContext {
            id: &id,
            file: &file,
            buffer: &buffer,
        };
        let destination = plan.destination.resolve(&request, &ctx)?;
        if plan.destination.is_computed() && !destination.is_empty() {
            let dir = Path::new(&destination);
            sink.ensure_dir(dir)
                .await
                .map_err(|e| UploadError::io(dir, e))?;
        }
        let filename = plan.filename.resolve(&request, &ctx)?;

        let _ = events.send(QueueEvent::Resolved {
            id: id.clone(),
            destination: destination.clone(),
            filename: filename.clone(),
        });

        let path = require_path(Some(&destination), Some(&filename))?;
        debug!(
            upload_id = %id,
            path = %path.display(),
            bytes = buffer.len(),
            "Writing buffered upload"
        );
        let size = sink
            .write_buffer(&path, &buffer)
            .await
            .map_err(|e| UploadError::io(&path, e))?;

        Ok(stored(id, &file, Some(destination), Some(filename), path, size))
    }
}

fn require_path(destination: Option<&str>, filename: Option<&str>) -> Result<PathBuf, UploadError> {
    produce_full_path(destination, filename).ok_or_else(|| {
        UploadError::InvalidPath(format!(
            "destination {:?} and filename {:?} must both be non-empty",
            destination.unwrap_or_default(),
            filename.unwrap_or_default()
        ))
    })
}

fn stored(
    id: ItemId,
    file: &FileMeta,
    destination: Option<String>,
    filename: Option<String>,
    path: PathBuf,
    size: u64,
) -> StoredFile {
    StoredFile {
        upload_id: id,
        original_name: file.original_name.clone(),
        destination,
        filename,
        full_path: Some(path),
        size,
    }
}

fn flatten(joined: Result<UploadOutcome, tokio::task::JoinError>) -> UploadOutcome {
    match joined {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            error!(panic_msg = %message, "Upload write task panicked");
            Err(UploadError::Panicked(message))
        }
        Err(_) => Err(UploadError::Panicked("write task cancelled".to_string())),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
