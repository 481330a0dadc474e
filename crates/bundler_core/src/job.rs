/// One unit of fetch work.
///
/// `sequence_index` is the position of the URL in the caller's input list. It
/// only feeds name disambiguation; results are never ordered by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job {
    url: String,
    sequence_index: usize,
}

impl Job {
    pub fn new(url: impl Into<String>, sequence_index: usize) -> Self {
        Self {
            url: url.into(),
            sequence_index,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }
}

/// Builds one job per URL, indexed by input position.
pub fn jobs_from_urls<I, S>(urls: I) -> Vec<Job>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    urls.into_iter()
        .enumerate()
        .map(|(index, url)| Job::new(url, index))
        .collect()
}
