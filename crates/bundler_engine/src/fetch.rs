use std::time::Duration;

use bundle_logging::{bundle_debug, bundle_warn};
use bundler_core::{content_name, FailureKind, FetchResult, Job};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, REFERER, USER_AGENT};
use thiserror::Error;

pub const DEFAULT_REFERER: &str = "https://www.pixiv.net/";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bytes: u64,
    /// Sent on every request; the image host rejects requests without it.
    pub referer: String,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_bytes: 64 * 1024 * 1024,
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchSetupError {
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Performs one request for one job. Every failure comes back as
/// [`FetchResult::Failure`]; implementations must not panic.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, job: &Job) -> FetchResult;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

struct FetchError {
    kind: FailureKind,
    message: String,
}

impl FetchError {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchSetupError> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_str(&settings.referer)?);
        headers.insert(USER_AGENT, HeaderValue::from_str(&settings.user_agent)?);

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let max_bytes = self.settings.max_bytes;
        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(too_large(max_bytes, content_len));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(too_large(max_bytes, next_len));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, job: &Job) -> FetchResult {
        match self.download(job.url()).await {
            Ok(bytes) => {
                bundle_debug!(
                    "Fetched job {} ({} bytes) from {}",
                    job.sequence_index(),
                    bytes.len(),
                    job.url()
                );
                FetchResult::Success {
                    content_name: content_name(job.url(), job.sequence_index()),
                    job: job.clone(),
                    bytes,
                }
            }
            Err(err) => {
                bundle_warn!(
                    "Fetch failed for job {} url={}: {} ({})",
                    job.sequence_index(),
                    job.url(),
                    err.kind,
                    err.message
                );
                FetchResult::failure(job.clone(), err.kind, err.message)
            }
        }
    }
}

fn too_large(max_bytes: u64, actual: u64) -> FetchError {
    FetchError::new(
        FailureKind::Transport,
        format!("response too large (max {max_bytes}, actual {actual})"),
    )
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Transport, err.to_string())
}
