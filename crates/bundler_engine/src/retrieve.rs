use std::sync::Arc;

use bundle_logging::{bundle_error, bundle_info, bundle_warn};
use bundler_core::{
    archive_file_name, jobs_from_urls, worker_count_for, ProgressObserver, ProgressTracker,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    ArchiveAssembler, ArchiveError, Dispatcher, Fetcher, RetrievalOutcome, RetrievalRequest,
    DEFAULT_COMPRESSION_LEVEL,
};

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("no urls to retrieve")]
    NoJobs,
    #[error("archive write failed: {0}")]
    ArchiveWrite(#[source] ArchiveError),
}

#[derive(Debug, Clone)]
pub struct BundlerConfig {
    pub compression_level: i64,
    /// Hard cap on the archive size; exceeding it aborts the retrieval.
    pub max_archive_bytes: Option<u64>,
    /// Archive file names are `{archive_prefix}_{user_context}.zip`.
    pub archive_prefix: String,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_archive_bytes: None,
            archive_prefix: "pixiv_user".to_string(),
        }
    }
}

/// Bulk retrieval: fetch every URL on a worker pool and pack the successes
/// into one archive.
#[derive(Clone)]
pub struct Bundler {
    dispatcher: Dispatcher,
    config: BundlerConfig,
}

impl Bundler {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: BundlerConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(fetcher),
            config,
        }
    }

    /// Individual fetch failures never fail the call; they are counted in the
    /// outcome. Only an empty job list or a broken archive is an error.
    pub async fn retrieve(
        &self,
        request: RetrievalRequest,
        observer: Arc<dyn ProgressObserver>,
        cancel: CancellationToken,
    ) -> Result<RetrievalOutcome, RetrieveError> {
        let tracker = ProgressTracker::new(observer);
        let RetrievalRequest {
            mut urls,
            user_context,
            limit,
        } = request;

        let mut truncated = 0;
        if let Some(limit) = limit {
            if urls.len() > limit {
                truncated = urls.len() - limit;
                urls.truncate(limit);
                bundle_warn!(
                    "Retrieval for {} capped at {} urls; {} dropped",
                    user_context,
                    limit,
                    truncated
                );
            }
        }
        if urls.is_empty() {
            tracker.fail();
            return Err(RetrieveError::NoJobs);
        }

        let jobs = jobs_from_urls(urls);
        let total = jobs.len();
        let workers = worker_count_for(total);
        bundle_info!(
            "Retrieving {} resources for {} with {} workers",
            total,
            user_context,
            workers
        );
        tracker.begin_download(total);

        let batch = cancel.child_token();
        let assembler = ArchiveAssembler::bounded(
            self.config.compression_level,
            self.config.max_archive_bytes,
        );
        let mut stream = self.dispatcher.run(jobs, workers, batch.clone());
        let mut succeeded = 0;
        let mut failed = 0;
        while let Some(result) = stream.next().await {
            if let Err(err) = assembler.ingest(&result) {
                bundle_error!("Aborting retrieval for {}: {}", user_context, err);
                batch.cancel();
                tracker.fail();
                return Err(RetrieveError::ArchiveWrite(err));
            }
            tracker.observe(&result);
            if result.is_success() {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        tracker.begin_packaging();
        let archive = match assembler.seal() {
            Ok(archive) => archive,
            Err(err) => {
                bundle_error!("Sealing archive for {} failed: {}", user_context, err);
                tracker.fail();
                return Err(RetrieveError::ArchiveWrite(err));
            }
        };
        tracker.complete();

        let cancelled = batch.is_cancelled();
        bundle_info!(
            "Retrieval for {} done: {} succeeded, {} failed{}",
            user_context,
            succeeded,
            failed,
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(RetrievalOutcome {
            archive_name: archive_file_name(&self.config.archive_prefix, &user_context),
            archive,
            succeeded,
            failed,
            truncated,
            cancelled,
        })
    }
}
