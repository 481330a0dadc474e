use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bundle_logging::{bundle_error, bundle_info, bundle_warn};
use bundler_core::ProgressSnapshot;
use tokio_util::sync::CancellationToken;

use crate::history::{record_quietly, HistoryStore, HistorySummary};
use crate::{
    ArchiveStore, Bundler, BundlerConfig, FetchSettings, FetchSetupError, Fetcher,
    ProgressRegistry, RegistryObserver, ReqwestFetcher, RetrievalOutcome, RetrievalRequest,
    TaskId,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fetch: FetchSettings,
    pub bundler: BundlerConfig,
    /// How long finished tasks (progress and archive) are kept for pickup.
    pub retention: Duration,
    /// When set, every finished archive is also written here.
    pub output_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch: FetchSettings::default(),
            bundler: BundlerConfig::default(),
            retention: Duration::from_secs(300),
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskState {
    Running,
    Finished(Arc<RetrievalOutcome>),
    Failed(String),
}

enum TaskSlot {
    Running(CancellationToken),
    Finished(Arc<RetrievalOutcome>),
    Failed(String),
}

struct EngineInner {
    bundler: Bundler,
    registry: Arc<ProgressRegistry>,
    history: Arc<dyn HistoryStore>,
    tasks: Mutex<HashMap<TaskId, TaskSlot>>,
    retention: Duration,
    output_dir: Option<PathBuf>,
}

/// Runs retrievals in the background and keeps their progress and archives
/// until they are swept.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<EngineInner>,
}

impl EngineHandle {
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn Fetcher>,
        registry: Arc<ProgressRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                bundler: Bundler::new(fetcher, config.bundler),
                registry,
                history,
                tasks: Mutex::new(HashMap::new()),
                retention: config.retention,
                output_dir: config.output_dir,
            }),
        }
    }

    pub fn with_reqwest(
        config: EngineConfig,
        registry: Arc<ProgressRegistry>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<Self, FetchSetupError> {
        let fetcher = Arc::new(ReqwestFetcher::new(config.fetch.clone())?);
        Ok(Self::new(config, fetcher, registry, history))
    }

    pub fn registry(&self) -> &Arc<ProgressRegistry> {
        &self.inner.registry
    }

    /// Starts a retrieval on the current tokio runtime.
    pub fn start(&self, request: RetrievalRequest) -> TaskId {
        let task_id = self.inner.registry.register_new();
        let cancel = CancellationToken::new();
        self.inner
            .lock_tasks()
            .insert(task_id, TaskSlot::Running(cancel.clone()));
        bundle_info!(
            "Task {} started: {} urls for {}",
            task_id,
            request.urls.len(),
            request.user_context
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_task(inner, task_id, request, cancel).await;
        });
        task_id
    }

    /// Signals a running task to stop. Returns `false` for unknown or already
    /// finished tasks.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.inner.lock_tasks().get(&task_id) {
            Some(TaskSlot::Running(cancel)) => {
                cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn progress(&self, task_id: TaskId) -> Option<ProgressSnapshot> {
        self.inner.registry.get(task_id)
    }

    pub fn state(&self, task_id: TaskId) -> Option<TaskState> {
        self.inner.lock_tasks().get(&task_id).map(|slot| match slot {
            TaskSlot::Running(_) => TaskState::Running,
            TaskSlot::Finished(outcome) => TaskState::Finished(outcome.clone()),
            TaskSlot::Failed(reason) => TaskState::Failed(reason.clone()),
        })
    }

    /// Drops finished tasks older than the retention window. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let registry = &self.inner.registry;
        registry.evict_expired(self.inner.retention);
        let mut tasks = self.inner.lock_tasks();
        let before = tasks.len();
        // A task can finish after its progress entry was already evicted.
        tasks.retain(|task_id, slot| {
            matches!(slot, TaskSlot::Running(_)) || registry.get(*task_id).is_some()
        });
        before - tasks.len()
    }
}

impl EngineInner {
    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskSlot>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, task_id: TaskId, slot: TaskSlot) {
        self.lock_tasks().insert(task_id, slot);
    }
}

async fn run_task(
    inner: Arc<EngineInner>,
    task_id: TaskId,
    request: RetrievalRequest,
    cancel: CancellationToken,
) {
    record_quietly(inner.history.as_ref(), task_id, HistorySummary::processing()).await;

    let observer = Arc::new(RegistryObserver::holding_terminal(
        inner.registry.clone(),
        task_id,
    ));
    let result = inner.bundler.retrieve(request, observer.clone(), cancel).await;
    // The task slot is final before pollers can see a terminal phase.
    match result {
        Ok(outcome) => {
            let outcome = Arc::new(outcome);
            inner.finish(task_id, TaskSlot::Finished(outcome.clone()));
            observer.release();
            if let Some(dir) = inner.output_dir.clone() {
                save_archive(dir, task_id, &outcome).await;
            }
            record_quietly(
                inner.history.as_ref(),
                task_id,
                HistorySummary::completed(outcome.succeeded),
            )
            .await;
        }
        Err(err) => {
            bundle_warn!("Task {} failed: {}", task_id, err);
            inner.finish(task_id, TaskSlot::Failed(err.to_string()));
            observer.release();
            record_quietly(inner.history.as_ref(), task_id, HistorySummary::failed()).await;
        }
    }
}

async fn save_archive(dir: PathBuf, task_id: TaskId, outcome: &RetrievalOutcome) {
    let filename = format!("{task_id}-{}", outcome.archive_name);
    let bytes = outcome.archive.bytes().to_vec();
    let written =
        tokio::task::spawn_blocking(move || ArchiveStore::new(dir).save(&filename, &bytes)).await;
    match written {
        Ok(Ok(path)) => bundle_info!("Task {} archive written to {:?}", task_id, path),
        Ok(Err(err)) => bundle_error!("Task {} archive not saved: {}", task_id, err),
        Err(err) => bundle_error!("Task {} archive save aborted: {}", task_id, err),
    }
}
