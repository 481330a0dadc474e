use crate::Archive;

pub type TaskId = u64;

/// Input to one bulk retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    /// Already-resolved resource URLs, in the order they were discovered.
    pub urls: Vec<String>,
    /// Who the archive is for; names the archive file and tags log lines.
    pub user_context: String,
    /// Fetch at most this many URLs. Anything past the cap is reported in
    /// [`RetrievalOutcome::truncated`].
    pub limit: Option<usize>,
}

impl RetrievalRequest {
    pub fn new(urls: Vec<String>, user_context: impl Into<String>) -> Self {
        Self {
            urls,
            user_context: user_context.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalOutcome {
    pub archive: Archive,
    pub archive_name: String,
    pub succeeded: usize,
    pub failed: usize,
    /// URLs dropped by [`RetrievalRequest::limit`] and never attempted.
    pub truncated: usize,
    /// The batch was cancelled; unattempted jobs are counted in `failed`.
    pub cancelled: bool,
}
