//! Bundler core: IO-free domain types, progress tracking and entry naming.
mod job;
mod naming;
mod progress;
mod result;
mod workers;

pub use job::{jobs_from_urls, Job};
pub use naming::{archive_file_name, content_name, EntryNames};
pub use progress::{NullObserver, Phase, ProgressObserver, ProgressSnapshot, ProgressTracker};
pub use result::{FailureKind, FetchResult};
pub use workers::{worker_count_for, JOBS_PER_WORKER, MAX_WORKERS, MIN_WORKERS};
