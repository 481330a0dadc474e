use std::fmt;

use crate::Job;

/// Terminal outcome of attempting one [`Job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success {
        job: Job,
        bytes: Vec<u8>,
        content_name: String,
    },
    Failure {
        job: Job,
        kind: FailureKind,
        detail: String,
    },
}

impl FetchResult {
    pub fn failure(job: Job, kind: FailureKind, detail: impl Into<String>) -> Self {
        FetchResult::Failure {
            job,
            kind,
            detail: detail.into(),
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            FetchResult::Success { job, .. } | FetchResult::Failure { job, .. } => job,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

/// Coarse classification of a per-job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    HttpStatus(u16),
    Transport,
    Timeout,
    /// Synthesized for jobs stopped by batch cancellation.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Transport => write!(f, "transport error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}
