pub const MIN_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 8;
pub const JOBS_PER_WORKER: usize = 10;

/// Worker pool size for a batch: one worker per ten jobs, clamped to
/// `[MIN_WORKERS, MAX_WORKERS]`.
pub fn worker_count_for(total_jobs: usize) -> usize {
    (total_jobs / JOBS_PER_WORKER).clamp(MIN_WORKERS, MAX_WORKERS)
}
