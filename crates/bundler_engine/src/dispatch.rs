use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bundle_logging::{bundle_debug, bundle_trace};
use bundler_core::{FailureKind, FetchResult, Job};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Fetcher;

/// Runs jobs on a fixed pool of worker tasks.
#[derive(Clone)]
pub struct Dispatcher {
    fetcher: Arc<dyn Fetcher>,
}

impl Dispatcher {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Spawns up to `worker_count` workers (at least one, never more than
    /// there are jobs) on the current tokio runtime.
    ///
    /// The returned stream yields exactly one result per job, in completion
    /// order. After `cancel` fires, workers abandon in-flight fetches and
    /// report every job they still hold as [`FailureKind::Cancelled`].
    pub fn run(
        &self,
        jobs: Vec<Job>,
        worker_count: usize,
        cancel: CancellationToken,
    ) -> ResultStream {
        let expected = jobs.len();
        let workers = worker_count.max(1).min(expected);
        let queue = Arc::new(JobQueue::new(jobs));
        let (tx, rx) = mpsc::unbounded_channel();

        bundle_debug!("Dispatching {} jobs across {} workers", expected, workers);
        for worker_id in 0..workers {
            let queue = queue.clone();
            let fetcher = self.fetcher.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_worker(worker_id, &queue, fetcher.as_ref(), &tx, &cancel).await;
            });
        }

        ResultStream {
            rx,
            expected,
            received: 0,
        }
    }
}

/// Completion-ordered results of one [`Dispatcher::run`]. Ends once every
/// worker has exited.
pub struct ResultStream {
    rx: mpsc::UnboundedReceiver<FetchResult>,
    expected: usize,
    received: usize,
}

impl ResultStream {
    pub async fn next(&mut self) -> Option<FetchResult> {
        let result = self.rx.recv().await;
        if result.is_some() {
            self.received += 1;
        }
        result
    }

    /// Number of results this stream will produce in total.
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn received(&self) -> usize {
        self.received
    }
}

struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl JobQueue {
    fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into()),
        }
    }

    fn pop(&self) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

async fn run_worker(
    worker_id: usize,
    queue: &JobQueue,
    fetcher: &dyn Fetcher,
    tx: &mpsc::UnboundedSender<FetchResult>,
    cancel: &CancellationToken,
) {
    while let Some(job) = queue.pop() {
        let fetched = if cancel.is_cancelled() {
            None
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = fetcher.fetch(&job) => Some(result),
            }
        };
        let result = fetched.unwrap_or_else(|| {
            FetchResult::failure(job, FailureKind::Cancelled, "batch cancelled")
        });

        bundle_trace!(
            "Worker {} finished job {}",
            worker_id,
            result.job().sequence_index()
        );
        if tx.send(result).is_err() {
            bundle_debug!("Worker {} stopping: result consumer is gone", worker_id);
            return;
        }
    }
    bundle_trace!("Worker {} drained the queue", worker_id);
}
