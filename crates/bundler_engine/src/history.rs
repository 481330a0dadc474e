use std::sync::Mutex;

use bundle_logging::bundle_warn;
use serde::Serialize;
use thiserror::Error;

use crate::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub status: HistoryStatus,
    pub items_count: Option<usize>,
}

impl HistorySummary {
    pub fn processing() -> Self {
        Self {
            status: HistoryStatus::Processing,
            items_count: None,
        }
    }

    pub fn completed(items_count: usize) -> Self {
        Self {
            status: HistoryStatus::Completed,
            items_count: Some(items_count),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: HistoryStatus::Failed,
            items_count: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Optional job history sink.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record(&self, task_id: TaskId, summary: HistorySummary) -> Result<(), HistoryError>;
}

/// History disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHistoryStore;

#[async_trait::async_trait]
impl HistoryStore for NullHistoryStore {
    async fn record(&self, _task_id: TaskId, _summary: HistorySummary) -> Result<(), HistoryError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<(TaskId, HistorySummary)>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(TaskId, HistorySummary)> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn record(&self, task_id: TaskId, summary: HistorySummary) -> Result<(), HistoryError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((task_id, summary));
        Ok(())
    }
}

/// Records `summary`, logging instead of propagating store failures.
pub async fn record_quietly(store: &dyn HistoryStore, task_id: TaskId, summary: HistorySummary) {
    if let Err(err) = store.record(task_id, summary).await {
        bundle_warn!(
            "History update for task {} ({:?}) dropped: {}",
            task_id,
            summary.status,
            err
        );
    }
}
