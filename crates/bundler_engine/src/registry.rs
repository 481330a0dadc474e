use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bundle_logging::bundle_debug;
use bundler_core::{ProgressObserver, ProgressSnapshot};

use crate::TaskId;

#[derive(Debug, Clone, Copy)]
struct RegistryEntry {
    snapshot: ProgressSnapshot,
    terminal_since: Option<Instant>,
}

/// Process-wide progress store, keyed by task.
///
/// Entries live until the owner removes them or calls
/// [`ProgressRegistry::evict_expired`]; nothing is dropped implicitly.
#[derive(Debug)]
pub struct ProgressRegistry {
    entries: RwLock<HashMap<TaskId, RegistryEntry>>,
    next_id: AtomicU64,
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh id and registers it with an initial snapshot.
    pub fn register_new(&self) -> TaskId {
        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.register(task_id);
        task_id
    }

    pub fn register(&self, task_id: TaskId) {
        self.write().insert(
            task_id,
            RegistryEntry {
                snapshot: ProgressSnapshot::new(),
                terminal_since: None,
            },
        );
    }

    /// Stores `snapshot` for a registered task; unknown ids are ignored.
    pub fn update(&self, task_id: TaskId, snapshot: ProgressSnapshot) {
        let mut entries = self.write();
        let Some(entry) = entries.get_mut(&task_id) else {
            return;
        };
        if entry.snapshot.is_terminal() {
            return;
        }
        entry.snapshot = snapshot;
        if snapshot.is_terminal() {
            entry.terminal_since = Some(Instant::now());
        }
    }

    pub fn get(&self, task_id: TaskId) -> Option<ProgressSnapshot> {
        self.read().get(&task_id).map(|entry| entry.snapshot)
    }

    pub fn remove(&self, task_id: TaskId) -> Option<ProgressSnapshot> {
        self.write().remove(&task_id).map(|entry| entry.snapshot)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes terminal entries that have been terminal for at least
    /// `retention`, returning their ids.
    pub fn evict_expired(&self, retention: Duration) -> Vec<TaskId> {
        self.evict_expired_at(Instant::now(), retention)
    }

    pub fn evict_expired_at(&self, now: Instant, retention: Duration) -> Vec<TaskId> {
        let mut entries = self.write();
        let expired: Vec<TaskId> = entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .terminal_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= retention)
            })
            .map(|(task_id, _)| *task_id)
            .collect();
        for task_id in &expired {
            entries.remove(task_id);
        }
        if !expired.is_empty() {
            bundle_debug!("Evicted {} finished tasks from progress registry", expired.len());
        }
        expired
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, RegistryEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, RegistryEntry>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Publishes one task's snapshots into a [`ProgressRegistry`].
///
/// Built with [`RegistryObserver::holding_terminal`], the final `completed`
/// or `failed` snapshot is kept back until [`RegistryObserver::release`], so
/// the owner can make the task's result available first.
pub struct RegistryObserver {
    registry: Arc<ProgressRegistry>,
    task_id: TaskId,
    held: Option<Mutex<Option<ProgressSnapshot>>>,
}

impl RegistryObserver {
    pub fn new(registry: Arc<ProgressRegistry>, task_id: TaskId) -> Self {
        Self {
            registry,
            task_id,
            held: None,
        }
    }

    pub fn holding_terminal(registry: Arc<ProgressRegistry>, task_id: TaskId) -> Self {
        Self {
            registry,
            task_id,
            held: Some(Mutex::new(None)),
        }
    }

    /// Publishes the held terminal snapshot, if any.
    pub fn release(&self) {
        let Some(held) = &self.held else {
            return;
        };
        let snapshot = held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(snapshot) = snapshot {
            self.registry.update(self.task_id, snapshot);
        }
    }
}

impl ProgressObserver for RegistryObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        if let (Some(held), true) = (&self.held, snapshot.is_terminal()) {
            *held
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(*snapshot);
            return;
        }
        self.registry.update(self.task_id, *snapshot);
    }
}
