//! Bundler engine: fetching, worker pool, archive assembly and task service.
mod archive;
mod dispatch;
mod engine;
mod fetch;
mod history;
mod persist;
mod registry;
mod retrieve;
mod types;

pub use archive::{Archive, ArchiveAssembler, ArchiveError, DEFAULT_COMPRESSION_LEVEL};
pub use dispatch::{Dispatcher, ResultStream};
pub use engine::{EngineConfig, EngineHandle, TaskState};
pub use fetch::{
    FetchSettings, FetchSetupError, Fetcher, ReqwestFetcher, DEFAULT_REFERER, DEFAULT_USER_AGENT,
};
pub use history::{
    record_quietly, HistoryError, HistoryStatus, HistoryStore, HistorySummary,
    MemoryHistoryStore, NullHistoryStore,
};
pub use persist::{prepare_archive_dir, ArchiveStore, PersistError};
pub use registry::{ProgressRegistry, RegistryObserver};
pub use retrieve::{Bundler, BundlerConfig, RetrieveError};
pub use types::{RetrievalOutcome, RetrievalRequest, TaskId};
