//! Scheduler - owns the write queue and runs the admission pass
//!
//! One scheduler task is live per `UploadQueue` at a time. It is spawned by
//! the first submission, ticks every `poll_interval_ms`, and retires as soon
//! as a tick leaves the queue empty. Everything that changes queue membership
//! or item state arrives as a `QueueEvent` on its channel, so the scheduler is
//! the single thread of control for the queue.

use crate::application::write_queue::{PassSummary, WriteQueue};
use crate::application::write_task::{WriteJob, WritePlan};
use crate::domain::{
    Completion, ItemId, ItemSnapshot, QueueConfig, QueueItem, RequestMeta, UploadFile,
    UploadOutcome,
};
use crate::error::{AppError, Result};
use crate::port::{IntervalTimer, SystemTimeProvider, TimeProvider, TimerFactory, TokioTimerFactory};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

type EventSender = mpsc::UnboundedSender<QueueEvent>;
type SchedulerSlot = Arc<Mutex<Option<EventSender>>>;

/// An upload on its way into the queue
pub(crate) struct NewUpload {
    pub request: RequestMeta,
    pub file: UploadFile,
    pub plan: Arc<WritePlan>,
    pub completion: Completion,
}

/// Messages funneled onto the scheduler task
pub(crate) enum QueueEvent {
    Enqueue(Box<NewUpload>),
    Processing {
        id: ItemId,
        buffered_len: usize,
    },
    Resolved {
        id: ItemId,
        destination: String,
        filename: String,
    },
    Finished {
        id: ItemId,
        outcome: UploadOutcome,
    },
    Snapshot(oneshot::Sender<Vec<ItemSnapshot>>),
}

/// Shared handle to the upload queue and its scheduler.
///
/// Build one at the composition root and hand the same `Arc` to every
/// `StorageEngine` that should share a concurrency budget.
pub struct UploadQueue {
    config: watch::Sender<QueueConfig>,
    timers: Arc<dyn TimerFactory>,
    time_provider: Arc<dyn TimeProvider>,
    slot: SchedulerSlot,
    generations: AtomicU64,
}

impl UploadQueue {
    /// Create a queue handle. No task runs until the first submission.
    ///
    /// # Arguments
    /// * `config` - Concurrency ceiling and poll interval
    /// * `timers` - Timer source for the periodic pass (injected for tests)
    /// * `time_provider` - Clock for item ids and timestamps
    pub fn new(
        config: QueueConfig,
        timers: Arc<dyn TimerFactory>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let (config, _) = watch::channel(config);
        Self {
            config,
            timers,
            time_provider,
            slot: Arc::new(Mutex::new(None)),
            generations: AtomicU64::new(0),
        }
    }

    /// Production wiring: tokio timers and the system clock
    pub fn with_config(config: QueueConfig) -> Self {
        Self::new(config, Arc::new(TokioTimerFactory), Arc::new(SystemTimeProvider))
    }

    /// Replace the shared configuration.
    ///
    /// The ceiling applies from the next admission pass. A new poll interval
    /// applies when the next scheduler starts.
    pub fn configure(&self, config: QueueConfig) {
        let previous = self.config.send_replace(config);
        if previous != config {
            info!(
                max_concurrent = config.max_concurrent,
                poll_interval_ms = config.poll_interval_ms,
                ceiling = ?config.ceiling,
                "Upload queue reconfigured"
            );
        }
    }

    pub fn config(&self) -> QueueConfig {
        *self.config.borrow()
    }

    /// Whether a scheduler (and therefore a queue) is currently live
    pub fn is_running(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// How many schedulers have been started over this handle's lifetime
    pub fn generations(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    /// Current items in arrival order; empty when no scheduler is live
    pub async fn snapshot(&self) -> Vec<ItemSnapshot> {
        let (tx, rx) = oneshot::channel();
        let sent = match lock(&self.slot).as_ref() {
            Some(sender) => sender.send(QueueEvent::Snapshot(tx)).is_ok(),
            None => false,
        };
        if !sent {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Hand an upload to the live scheduler, starting one if the queue is absent
    pub(crate) fn enqueue(&self, upload: NewUpload) -> Result<()> {
        let mut slot = lock(&self.slot);

        let sender = match slot.as_ref() {
            Some(sender) if !sender.is_closed() => sender.clone(),
            _ => {
                let sender = self.start_scheduler()?;
                *slot = Some(sender.clone());
                sender
            }
        };

        sender
            .send(QueueEvent::Enqueue(Box::new(upload)))
            .map_err(|_| AppError::Internal("scheduler channel closed".to_string()))
    }

    fn start_scheduler(&self) -> Result<EventSender> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::Internal(format!("upload queue needs a tokio runtime: {e}")))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let config = self.config.subscribe();
        let timer = self.timers.start(config.borrow().poll_interval());
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

        let scheduler = Scheduler {
            queue: WriteQueue::new(),
            events: receiver,
            sender: sender.clone(),
            config,
            time_provider: Arc::clone(&self.time_provider),
            slot: Arc::clone(&self.slot),
            generation,
        };
        runtime.spawn(scheduler.run(timer));
        Ok(sender)
    }
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::with_config(QueueConfig::default())
    }
}

fn lock(slot: &SchedulerSlot) -> MutexGuard<'_, Option<EventSender>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The task that owns one `WriteQueue` from creation to teardown
pub(crate) struct Scheduler {
    queue: WriteQueue,
    events: mpsc::UnboundedReceiver<QueueEvent>,
    sender: EventSender,
    config: watch::Receiver<QueueConfig>,
    time_provider: Arc<dyn TimeProvider>,
    slot: SchedulerSlot,
    generation: u64,
}

impl Scheduler {
    async fn run(mut self, mut timer: Box<dyn IntervalTimer>) {
        info!(generation = self.generation, "Upload scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = timer.tick() => {
                    self.admission_pass("tick");
                    if self.queue.is_empty() && self.try_retire() {
                        break;
                    }
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        info!(generation = self.generation, "Upload scheduler retired (queue drained)");
    }

    /// Clear the slot unless an event slipped in since the last tick.
    ///
    /// Producers send while holding the slot lock, so draining the channel
    /// under that lock cannot miss an upload.
    fn try_retire(&mut self) -> bool {
        let slot = Arc::clone(&self.slot);
        let mut guard = lock(&slot);
        while let Ok(event) = self.events.try_recv() {
            self.handle(event);
        }
        if !self.queue.is_empty() {
            return false;
        }
        *guard = None;
        true
    }

    fn handle(&mut self, event: QueueEvent) {
        let now = self.time_provider.now_millis();
        match event {
            QueueEvent::Enqueue(upload) => {
                let NewUpload {
                    request,
                    file,
                    plan,
                    completion,
                } = *upload;
                let id = self.queue.next_id(now);
                let (destination, filename) = plan.initial_paths();

                let mut item = QueueItem::new(id, now, request, file).with_completion(completion);
                item.set_paths(destination, filename);
                debug!(
                    upload_id = %item.id,
                    original_name = %item.file.original_name,
                    "Upload enqueued"
                );

                self.queue.push(item, plan);
                self.admission_pass("enqueue");
            }
            QueueEvent::Processing { id, buffered_len } => match self.queue.get_mut(&id) {
                Some(item) if item.is_finished() => {
                    debug!(upload_id = %id, "Ignoring processing report for finished item")
                }
                Some(item) => {
                    if let Err(e) = item.mark_processing(buffered_len) {
                        warn!(upload_id = %id, error = %e, "Ignoring processing report");
                    }
                }
                None => warn!(upload_id = %id, "Processing report for unknown item"),
            },
            QueueEvent::Resolved {
                id,
                destination,
                filename,
            } => match self.queue.get_mut(&id) {
                Some(item) if item.is_finished() => {
                    debug!(upload_id = %id, "Ignoring resolved paths for finished item")
                }
                Some(item) => item.set_paths(Some(destination), Some(filename)),
                None => warn!(upload_id = %id, "Resolved paths for unknown item"),
            },
            QueueEvent::Finished { id, outcome } => match self.queue.get_mut(&id) {
                Some(item) => {
                    if let Err(e) = item.finish(now, outcome) {
                        warn!(upload_id = %id, error = %e, "Ignoring completion");
                    }
                }
                None => warn!(upload_id = %id, "Completion for unknown item"),
            },
            QueueEvent::Snapshot(reply) => {
                let _ = reply.send(self.queue.snapshot());
            }
        }
    }

    fn admission_pass(&mut self, trigger: &'static str) -> PassSummary {
        let config = *self.config.borrow();
        let now = self.time_provider.now_millis();
        let sender = &self.sender;

        let summary = self.queue.admission_pass(&config, now, |item, plan, payload| {
            debug!(upload_id = %item.id, "Admitting upload");
            WriteJob::new(item, plan, payload, sender.clone()).spawn();
        });

        if summary != PassSummary::default() {
            debug!(
                trigger,
                admitted = summary.admitted_now,
                in_flight = summary.in_flight,
                evicted = summary.evicted,
                pending = summary.pending,
                "Admission pass"
            );
        }
        summary
    }
}
