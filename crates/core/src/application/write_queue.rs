//! Write Queue - ordered pending/active/finished uploads and the admission pass
//!
//! Only the scheduler task touches a `WriteQueue`, so no locking happens here.

use crate::application::write_task::WritePlan;
use crate::domain::{ItemId, ItemSnapshot, Payload, QueueConfig, QueueItem, QueueItemState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A queued item plus the plan of the engine that submitted it
pub(crate) struct QueueEntry {
    pub item: QueueItem,
    pub plan: Arc<WritePlan>,
}

/// What one admission pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSummary {
    /// Items moved from Pending to Started by this pass
    pub admitted_now: usize,
    /// Items holding a slot after the pass (including those just admitted)
    pub in_flight: usize,
    /// Finished items removed
    pub evicted: usize,
    /// Items still Pending
    pub pending: usize,
}

#[derive(Default)]
pub(crate) struct WriteQueue {
    entries: Vec<QueueEntry>,
    /// Last id issued as `(millis, suffix)`
    last_id: Option<(i64, u64)>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, item: QueueItem, plan: Arc<WritePlan>) {
        self.entries.push(QueueEntry { item, plan });
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut QueueItem> {
        self.entries
            .iter_mut()
            .map(|entry| &mut entry.item)
            .find(|item| item.id == id)
    }

    fn contains_id(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.item.id == id)
    }

    /// Next id for an item created at `now_millis`: `<now>-<n>`.
    ///
    /// `n` continues from the last id issued in the same millisecond, so ids
    /// never repeat for the lifetime of this queue, and skips any live id.
    pub fn next_id(&mut self, now_millis: i64) -> ItemId {
        let mut suffix = match self.last_id {
            Some((millis, last)) if millis == now_millis => last,
            _ => 0,
        };
        loop {
            suffix += 1;
            let candidate = format!("{now_millis}-{suffix}");
            if !self.contains_id(&candidate) {
                self.last_id = Some((now_millis, suffix));
                return candidate;
            }
        }
    }

    /// One admission pass, in arrival order.
    ///
    /// - Pending and under the ceiling: begin it and hand the payload to `launch`
    /// - Started/Processing: counts toward the ceiling
    /// - Finished: evicted after the scan
    pub fn admission_pass<F>(
        &mut self,
        config: &QueueConfig,
        now_millis: i64,
        mut launch: F,
    ) -> PassSummary
    where
        F: FnMut(&QueueItem, &Arc<WritePlan>, Payload),
    {
        let mut summary = PassSummary::default();
        let mut admitted = 0usize;
        let mut finished = 0usize;

        for entry in self.entries.iter_mut() {
            match entry.item.state() {
                QueueItemState::Pending
                    if config.ceiling.admits(admitted, config.max_concurrent) =>
                {
                    if let Some(payload) = entry.item.begin(now_millis) {
                        launch(&entry.item, &entry.plan, payload);
                        summary.admitted_now += 1;
                    }
                    admitted += 1;
                }
                QueueItemState::Pending => summary.pending += 1,
                QueueItemState::Started | QueueItemState::Processing => admitted += 1,
                QueueItemState::Finished => finished += 1,
            }
        }

        if finished > 0 {
            self.entries.retain(|entry| !entry.item.is_finished());
        }
        summary.in_flight = admitted;
        summary.evicted = finished;
        summary
    }

    pub fn snapshot(&self) -> Vec<ItemSnapshot> {
        self.entries.iter().map(|entry| entry.item.snapshot()).collect()
    }
}
