//! Batch progress: a monotonic snapshot behind a mutex, pushed to an observer
//! on every change.

use std::sync::{Arc, Mutex, MutexGuard};

use bundle_logging::bundle_debug;
use serde::Serialize;

use crate::FetchResult;

/// Lifecycle of one retrieval. Declaration order is the only allowed
/// direction of travel, except that any non-terminal phase may jump to
/// [`Phase::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FetchingList,
    Downloading,
    Packaging,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn can_advance_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Phase::Failed || next > self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub completed_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
    pub phase: Phase,
    pub percent: u8,
}

impl ProgressSnapshot {
    pub fn new() -> Self {
        Self {
            completed_count: 0,
            failed_count: 0,
            total_count: 0,
            phase: Phase::FetchingList,
            percent: 0,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed_count + self.failed_count
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    fn recompute_percent(&mut self) {
        self.percent = if self.total_count == 0 {
            0
        } else {
            // processed <= total, so this is at most 100.
            (self.processed() * 100 / self.total_count) as u8
        };
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives every snapshot change.
///
/// Called while the tracker's lock is held, so implementations must not block
/// or perform IO, and must not call back into the tracker.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
}

pub struct ProgressTracker {
    state: Mutex<ProgressSnapshot>,
    observer: Arc<dyn ProgressObserver>,
}

impl ProgressTracker {
    pub fn new(observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            state: Mutex::new(ProgressSnapshot::new()),
            observer,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.lock()
    }

    /// Enters [`Phase::Downloading`] with `total` expected results.
    pub fn begin_download(&self, total: usize) {
        self.transition(Phase::Downloading, |snapshot| {
            snapshot.total_count = total;
            snapshot.recompute_percent();
        });
    }

    pub fn begin_packaging(&self) {
        self.transition(Phase::Packaging, |_| {});
    }

    pub fn complete(&self) {
        self.transition(Phase::Completed, |_| {});
    }

    pub fn fail(&self) {
        self.transition(Phase::Failed, |_| {});
    }

    /// Counts one finished job. Ignored outside [`Phase::Downloading`] or once
    /// every expected result has been counted.
    pub fn observe(&self, result: &FetchResult) {
        let mut snapshot = self.lock();
        if snapshot.phase != Phase::Downloading {
            bundle_debug!(
                "Ignoring result for job {} in phase {:?}",
                result.job().sequence_index(),
                snapshot.phase
            );
            return;
        }
        if snapshot.processed() >= snapshot.total_count {
            bundle_debug!(
                "Ignoring surplus result for job {}",
                result.job().sequence_index()
            );
            return;
        }
        if result.is_success() {
            snapshot.completed_count += 1;
        } else {
            snapshot.failed_count += 1;
        }
        snapshot.recompute_percent();
        self.observer.on_progress(&snapshot);
    }

    fn transition(&self, next: Phase, apply: impl FnOnce(&mut ProgressSnapshot)) {
        let mut snapshot = self.lock();
        if !snapshot.phase.can_advance_to(next) {
            bundle_debug!(
                "Ignoring phase change {:?} -> {:?}",
                snapshot.phase,
                next
            );
            return;
        }
        snapshot.phase = next;
        apply(&mut *snapshot);
        self.observer.on_progress(&snapshot);
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
