// Storage Engine - entry point for persisting uploads through the shared queue

pub mod options;

pub use options::{validate_options, StorageOptions};

use crate::application::scheduler::{NewUpload, UploadQueue};
use crate::application::write_task::WritePlan;
use crate::domain::{RequestMeta, StoredFile, UploadError, UploadFile, UploadOutcome};
use crate::error::{AppError, Result};
use crate::port::WriteSink;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Completion handle for one submitted upload
#[derive(Debug)]
pub struct PendingUpload {
    rx: oneshot::Receiver<UploadOutcome>,
}

impl PendingUpload {
    /// Wait for the write to finish (successfully or not)
    pub async fn wait(self) -> UploadOutcome {
        self.rx.await.unwrap_or(Err(UploadError::QueueClosed))
    }
}

/// Storage Engine
pub struct StorageEngine {
    queue: Arc<UploadQueue>,
    plan: Arc<WritePlan>,
    options: StorageOptions,
}

impl StorageEngine {
    /// Validate options, apply the queue settings and install the path policies.
    ///
    /// A fixed destination is created here; failing to create it is fatal.
    pub async fn configure(
        options: StorageOptions,
        queue: Arc<UploadQueue>,
        sink: Arc<dyn WriteSink>,
    ) -> Result<Self> {
        validate_options(&options)?;

        if let Some(dir) = options.destination.fixed_value() {
            sink.ensure_dir(Path::new(dir)).await.map_err(|e| {
                AppError::Config(format!("cannot create destination {dir}: {e}"))
            })?;
        }

        Self::attach(options, queue, sink)
    }

    /// Like `configure`, but never touches the sink.
    ///
    /// For callers that only remove files, or whose fixed destination is
    /// known to exist.
    pub fn attach(
        options: StorageOptions,
        queue: Arc<UploadQueue>,
        sink: Arc<dyn WriteSink>,
    ) -> Result<Self> {
        validate_options(&options)?;
        queue.configure(options.queue_config());

        let plan = Arc::new(WritePlan::new(
            options.destination.clone(),
            options.filename.clone(),
            options.item_timeout(),
            sink,
        ));

        info!(
            destination = ?options.destination,
            filename = ?options.filename,
            needs_buffer = plan.needs_buffer,
            "Storage engine configured"
        );

        Ok(Self {
            queue,
            plan,
            options,
        })
    }

    /// Enqueue an upload and trigger an immediate admission pass
    pub fn submit(&self, request: RequestMeta, file: UploadFile) -> Result<PendingUpload> {
        let (completion, rx) = oneshot::channel();
        self.queue.enqueue(NewUpload {
            request,
            file,
            plan: Arc::clone(&self.plan),
            completion,
        })?;
        Ok(PendingUpload { rx })
    }

    /// Enqueue an upload and wait for its result
    pub async fn store(&self, request: RequestMeta, file: UploadFile) -> Result<StoredFile> {
        let stored = self.submit(request, file)?.wait().await?;
        Ok(stored)
    }

    /// Enqueue an upload; `callback` runs exactly once, on a spawned task
    pub fn store_with_callback<F>(
        &self,
        request: RequestMeta,
        file: UploadFile,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(UploadOutcome) + Send + 'static,
    {
        let pending = self.submit(request, file)?;
        tokio::spawn(async move {
            callback(pending.wait().await);
        });
        Ok(())
    }

    /// Delete a stored file directly, bypassing the queue.
    ///
    /// Location fields on `file` are cleared before the delete is attempted.
    pub async fn remove(&self, file: &mut StoredFile) -> Result<()> {
        let path = file.clear_location().ok_or_else(|| {
            UploadError::InvalidPath(format!("upload {:?} has no stored path", file.upload_id))
        })?;

        match self.plan.sink.remove(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Stored file removed");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove stored file");
                Err(UploadError::io(&path, e).into())
            }
        }
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn needs_buffer(&self) -> bool {
        self.plan.needs_buffer
    }

    pub fn queue(&self) -> &Arc<UploadQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdmissionCeiling, PathPolicy, QueueConfig, QueueItemState};
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use crate::port::timer::mocks::ManualTimerFactory;
    use crate::port::write_sink::mocks::MemorySink;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Harness {
        engine: StorageEngine,
        queue: Arc<UploadQueue>,
        sink: Arc<MemorySink>,
        timers: Arc<ManualTimerFactory>,
        clock: Arc<FixedTimeProvider>,
    }

    async fn harness(options: StorageOptions, sink: MemorySink) -> Harness {
        let timers = Arc::new(ManualTimerFactory::new());
        let clock = Arc::new(FixedTimeProvider::new(1_000));
        let queue =
            Arc::new(UploadQueue::new(QueueConfig::default(), timers.clone(), clock.clone()));
        let sink = Arc::new(sink);
        let engine = StorageEngine::configure(options, queue.clone(), sink.clone())
            .await
            .unwrap();
        Harness {
            engine,
            queue,
            sink,
            timers,
            clock,
        }
    }

    fn fixed(name: &str) -> StorageOptions {
        StorageOptions::new(PathPolicy::fixed("/tmp/up")).with_filename(PathPolicy::fixed(name))
    }

    /// Filename taken from the upload's original name (forces buffering)
    fn by_original_name(max_concurrent: i64) -> StorageOptions {
        StorageOptions::new(PathPolicy::fixed("/tmp/up"))
            .with_filename(PathPolicy::computed(|_, item| {
                Ok(item.file.original_name.clone())
            }))
            .with_max_concurrent(max_concurrent)
    }

    fn upload(name: &str, data: &[u8]) -> UploadFile {
        UploadFile::new(name, "text/plain", data.to_vec())
    }

    async fn states(queue: &UploadQueue) -> Vec<QueueItemState> {
        queue.snapshot().await.into_iter().map(|s| s.state).collect()
    }

    async fn wait_for_states(queue: &UploadQueue, expected: &[QueueItemState]) {
        for _ in 0..400 {
            if states(queue).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never reached {:?}, last seen {:?}", expected, states(queue).await);
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_round_trip_fixed_paths_then_remove() {
        let h = harness(fixed("a.txt"), MemorySink::new()).await;
        assert!(h.sink.has_dir("/tmp/up"), "fixed destination created at configure");
        assert!(!h.engine.needs_buffer());

        let mut stored = h
            .engine
            .store(RequestMeta::default(), upload("a.txt", b"hello"))
            .await
            .unwrap();

        assert_eq!(stored.destination.as_deref(), Some("/tmp/up"));
        assert_eq!(stored.filename.as_deref(), Some("a.txt"));
        assert_eq!(stored.full_path, Some(PathBuf::from("/tmp/up/a.txt")));
        assert_eq!(stored.size, 5);
        assert_eq!(h.sink.contents("/tmp/up/a.txt"), Some(b"hello".to_vec()));

        h.engine.remove(&mut stored).await.unwrap();
        assert!(h.sink.contents("/tmp/up/a.txt").is_none());
        assert!(stored.destination.is_none());
        assert!(stored.filename.is_none());
        assert!(stored.full_path.is_none());
    }

    #[tokio::test]
    async fn test_attach_creates_no_directories() {
        let sink = Arc::new(MemorySink::new());
        let queue = Arc::new(UploadQueue::default());
        let engine = StorageEngine::attach(fixed("a.txt"), queue, sink.clone()).unwrap();
        assert!(!sink.has_dir("/tmp/up"));

        let mut stored = StoredFile::from_path("/tmp/up/a.txt");
        let err = engine.remove(&mut stored).await.unwrap_err();
        assert!(matches!(err, AppError::Upload(UploadError::Io { .. })));
        assert!(!sink.has_dir("/tmp/up"));
    }

    #[tokio::test]
    async fn test_remove_without_path_is_invalid() {
        let h = harness(fixed("a.txt"), MemorySink::new()).await;
        let mut stored = StoredFile::from_path("/tmp/up/a.txt");
        stored.clear_location();

        let err = h.engine.remove(&mut stored).await.unwrap_err();
        assert!(matches!(err, AppError::Upload(UploadError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_remove_missing_file_reports_io_error_and_still_clears() {
        let h = harness(fixed("a.txt"), MemorySink::new()).await;
        let mut stored = StoredFile::from_path("/tmp/up/never-written.txt");

        let err = h.engine.remove(&mut stored).await.unwrap_err();
        assert!(matches!(err, AppError::Upload(UploadError::Io { .. })));
        assert!(stored.full_path.is_none());
    }

    #[tokio::test]
    async fn test_stream_payload_written_unbuffered() {
        let h = harness(fixed("s.bin"), MemorySink::new()).await;
        let file = UploadFile::from_reader("s.bin", "application/octet-stream", &b"streamed"[..]);

        let stored = h.engine.store(RequestMeta::default(), file).await.unwrap();
        assert_eq!(stored.size, 8);
        assert_eq!(h.sink.contents("/tmp/up/s.bin"), Some(b"streamed".to_vec()));
    }

    #[tokio::test]
    async fn test_exact_ceiling_never_exceeded() {
        let h = harness(by_original_name(2), MemorySink::gated()).await;

        let pending: Vec<_> = (0..5)
            .map(|i| {
                h.engine
                    .submit(RequestMeta::default(), upload(&format!("f{i}.txt"), b"x"))
                    .unwrap()
            })
            .collect();

        let sink = h.sink.clone();
        wait_until(move || sink.in_flight() == 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.sink.in_flight(), 2);

        use QueueItemState::*;
        wait_for_states(&h.queue, &[Processing, Processing, Pending, Pending, Pending]).await;

        // Finishing frees slots, but only the next tick admits
        h.sink.release(2);
        wait_for_states(&h.queue, &[Finished, Finished, Pending, Pending, Pending]).await;

        h.timers.fire();
        wait_for_states(&h.queue, &[Processing, Processing, Pending]).await;

        h.sink.release(3);
        wait_for_states(&h.queue, &[Finished, Finished, Pending]).await;
        // One permit is left over for the last upload
        h.timers.fire();
        wait_for_states(&h.queue, &[Finished]).await;

        for p in pending {
            p.wait().await.unwrap();
        }
        assert_eq!(h.sink.max_in_flight(), 2);
        assert_eq!(h.sink.file_count(), 5);
    }

    #[tokio::test]
    async fn test_lenient_ceiling_allows_one_extra() {
        let options = by_original_name(2).with_ceiling(AdmissionCeiling::Lenient);
        let h = harness(options, MemorySink::gated()).await;

        for i in 0..5 {
            h.engine
                .submit(RequestMeta::default(), upload(&format!("f{i}.txt"), b"x"))
                .unwrap();
        }

        let sink = h.sink.clone();
        wait_until(move || sink.in_flight() == 3).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.sink.max_in_flight(), 3);
        h.sink.release(5);
    }

    #[tokio::test]
    async fn test_fifo_admission_order() {
        let h = harness(by_original_name(1), MemorySink::gated()).await;

        for name in ["a.txt", "b.txt", "c.txt"] {
            h.engine
                .submit(RequestMeta::default(), upload(name, b"x"))
                .unwrap();
        }

        use QueueItemState::*;
        let after_each: [&[QueueItemState]; 3] =
            [&[Finished, Pending, Pending], &[Finished, Pending], &[Finished]];
        for (round, expected) in after_each.iter().enumerate() {
            let sink = h.sink.clone();
            wait_until(move || sink.started_order().len() == round + 1).await;
            h.sink.release(1);
            wait_for_states(&h.queue, expected).await;
            h.timers.fire();
        }

        assert_eq!(
            h.sink.started_order(),
            vec![
                PathBuf::from("/tmp/up/a.txt"),
                PathBuf::from("/tmp/up/b.txt"),
                PathBuf::from("/tmp/up/c.txt"),
            ]
        );
        assert_eq!(h.sink.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_resolver_failure_is_isolated() {
        let options = StorageOptions::new(PathPolicy::fixed("/tmp/up")).with_filename(
            PathPolicy::computed(|_, item| {
                if item.file.original_name == "b.txt" {
                    return Err("no name for b".into());
                }
                Ok(item.file.original_name.clone())
            }),
        );
        let h = harness(options, MemorySink::new()).await;

        let a = h.engine.submit(RequestMeta::default(), upload("a.txt", b"aaa")).unwrap();
        let b = h.engine.submit(RequestMeta::default(), upload("b.txt", b"bbb")).unwrap();

        let a = a.wait().await.unwrap();
        assert_eq!(a.full_path, Some(PathBuf::from("/tmp/up/a.txt")));

        let b = b.wait().await.unwrap_err();
        assert!(matches!(b, UploadError::Resolution(ref msg) if msg == "no name for b"));
        assert_eq!(h.sink.file_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_resolver_finishes_item() {
        let options = StorageOptions::new(PathPolicy::fixed("/tmp/up")).with_filename(
            PathPolicy::computed(|_, _| panic!("resolver exploded")),
        );
        let h = harness(options.with_max_concurrent(1), MemorySink::new()).await;

        let err = h
            .engine
            .submit(RequestMeta::default(), upload("a.txt", b"a"))
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Panicked(ref msg) if msg.contains("resolver exploded")));

        // The slot is released like any other failure
        h.timers.fire();
        let queue = h.queue.clone();
        wait_until(move || !queue.is_running()).await;
    }

    #[tokio::test]
    async fn test_sink_failure_reported_with_cause() {
        let sink = MemorySink::new();
        sink.fail_on("/tmp/up/a.txt");
        let h = harness(fixed("a.txt"), sink).await;

        let err = h
            .engine
            .store(RequestMeta::default(), upload("a.txt", b"a"))
            .await
            .unwrap_err();
        match err {
            AppError::Upload(UploadError::Io { path, source }) => {
                assert_eq!(path, "/tmp/up/a.txt");
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_resolved_filename_is_invalid_path() {
        let options = StorageOptions::new(PathPolicy::fixed("/tmp/up"))
            .with_filename(PathPolicy::computed(|_, _| Ok(String::new())));
        let h = harness(options, MemorySink::new()).await;

        let err = h
            .engine
            .submit(RequestMeta::default(), upload("a.txt", b"a"))
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidPath(_)));
        assert_eq!(h.sink.file_count(), 0);
    }

    #[tokio::test]
    async fn test_configure_fails_when_destination_cannot_be_created() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_on("/tmp/up");
        let queue = Arc::new(UploadQueue::default());

        let result = StorageEngine::configure(fixed("a.txt"), queue, sink).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_content_hash_names_identical_content_identically() {
        let options = StorageOptions::new(PathPolicy::fixed("/tmp/up"));
        let h = harness(options, MemorySink::new()).await;
        assert!(h.engine.needs_buffer());

        let first = h
            .engine
            .store(
                RequestMeta::default(),
                UploadFile::new("one.png", "image/png", b"pixels".to_vec()),
            )
            .await
            .unwrap();
        let second = h
            .engine
            .store(
                RequestMeta::default(),
                UploadFile::new("two.png", "image/png", b"pixels".to_vec()),
            )
            .await
            .unwrap();

        assert_eq!(first.filename, second.filename);
        assert!(first.filename.as_deref().unwrap().ends_with("_6.png"));
        assert_ne!(first.upload_id, second.upload_id);
    }

    #[tokio::test]
    async fn test_computed_destination_is_created_per_upload() {
        let options = StorageOptions::new(PathPolicy::computed(|req, _| {
            let user = req.str_field("user").ok_or("anonymous upload")?;
            Ok(format!("/tmp/up/{user}"))
        }))
        .with_filename(PathPolicy::fixed("avatar.png"));
        let h = harness(options, MemorySink::new()).await;

        let request = RequestMeta::new(serde_json::json!({"user": "alice"}));
        let stored = h
            .engine
            .store(request, upload("me.png", b"img"))
            .await
            .unwrap();

        assert!(h.sink.has_dir("/tmp/up/alice"));
        assert_eq!(stored.full_path, Some(PathBuf::from("/tmp/up/alice/avatar.png")));
    }

    #[tokio::test]
    async fn test_processing_state_exposes_resolved_path() {
        let h = harness(by_original_name(1), MemorySink::gated()).await;
        let pending = h
            .engine
            .submit(RequestMeta::default(), upload("held.txt", b"x"))
            .unwrap();

        let sink = h.sink.clone();
        wait_until(move || sink.in_flight() == 1).await;
        let snapshot = h.queue.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, QueueItemState::Processing);
        assert_eq!(snapshot[0].full_path, Some(PathBuf::from("/tmp/up/held.txt")));

        h.sink.release(1);
        pending.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_item_deadline_frees_the_slot() {
        let options = by_original_name(1).with_item_timeout_ms(30);
        let h = harness(options, MemorySink::gated()).await;

        let stalled = h
            .engine
            .submit(RequestMeta::default(), upload("stalled.txt", b"x"))
            .unwrap();
        let next = h
            .engine
            .submit(RequestMeta::default(), upload("next.txt", b"y"))
            .unwrap();

        let err = stalled.wait().await.unwrap_err();
        assert!(matches!(err, UploadError::TimedOut(30)));

        h.timers.fire();
        let sink = h.sink.clone();
        wait_until(move || sink.started_order().len() == 2).await;
        h.sink.release(1);
        let stored = next.wait().await.unwrap();
        assert_eq!(stored.filename.as_deref(), Some("next.txt"));
    }

    #[tokio::test]
    async fn test_ids_never_repeat_on_a_live_queue() {
        let h = harness(by_original_name(8), MemorySink::new()).await;

        let mut ids = Vec::new();
        for i in 0..3 {
            let stored = h
                .engine
                .store(RequestMeta::default(), upload(&format!("f{i}.txt"), b"x"))
                .await
                .unwrap();
            ids.push(stored.upload_id);
        }
        // Same clock reading for all three, even though each enqueue evicts the
        // previous finished item
        assert_eq!(ids, vec!["1000-1", "1000-2", "1000-3"]);

        h.clock.advance(1);
        let later = h
            .engine
            .store(RequestMeta::default(), upload("later.txt", b"x"))
            .await
            .unwrap();
        assert_eq!(later.upload_id, "1001-1");
    }

    #[tokio::test]
    async fn test_queue_retires_and_recreates_lazily() {
        let h = harness(fixed("a.txt"), MemorySink::new()).await;
        assert!(!h.queue.is_running());

        h.engine
            .store(RequestMeta::default(), upload("a.txt", b"one"))
            .await
            .unwrap();
        assert!(h.queue.is_running());
        assert_eq!(h.queue.generations(), 1);

        h.timers.fire();
        let queue = h.queue.clone();
        wait_until(move || !queue.is_running()).await;
        assert!(h.queue.snapshot().await.is_empty());

        let stored = h
            .engine
            .store(RequestMeta::default(), upload("a.txt", b"two"))
            .await
            .unwrap();
        assert_eq!(stored.size, 3);
        assert_eq!(h.queue.generations(), 2);
        assert_eq!(h.timers.timers_started(), 2);
        // Ids restart once the old items are gone
        assert_eq!(stored.upload_id, "1000-1");
    }

    #[tokio::test]
    async fn test_callback_invoked_exactly_once() {
        let h = harness(fixed("cb.txt"), MemorySink::new()).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let counter = calls.clone();
        h.engine
            .store_with_callback(RequestMeta::default(), upload("cb.txt", b"cb"), move |outcome| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(outcome);
            })
            .unwrap();

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.unwrap().size, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_engines_share_one_ceiling() {
        let timers = Arc::new(ManualTimerFactory::new());
        let queue = Arc::new(UploadQueue::new(
            QueueConfig::default(),
            timers.clone(),
            Arc::new(FixedTimeProvider::new(1_000)),
        ));
        let sink = Arc::new(MemorySink::gated());

        let first = StorageEngine::configure(by_original_name(1), queue.clone(), sink.clone())
            .await
            .unwrap();
        let second = StorageEngine::configure(by_original_name(1), queue.clone(), sink.clone())
            .await
            .unwrap();

        let a = first.submit(RequestMeta::default(), upload("a.txt", b"a")).unwrap();
        let b = second.submit(RequestMeta::default(), upload("b.txt", b"b")).unwrap();

        let watched = sink.clone();
        wait_until(move || watched.in_flight() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.in_flight(), 1);

        sink.release(1);
        a.wait().await.unwrap();
        timers.fire();
        sink.release(1);
        b.wait().await.unwrap();
        assert_eq!(sink.max_in_flight(), 1);
    }
}
