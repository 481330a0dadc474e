use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bundler_core::{FetchResult, Job, NullObserver, Phase, ProgressObserver, ProgressSnapshot};
use bundler_engine::{
    Bundler, BundlerConfig, FetchSettings, Fetcher, ReqwestFetcher, RetrievalRequest,
    RetrieveError,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::ZipArchive;

#[derive(Default)]
struct RecordingObserver {
    seen: Mutex<Vec<ProgressSnapshot>>,
}

impl RecordingObserver {
    fn take(&self) -> Vec<ProgressSnapshot> {
        self.seen.lock().unwrap().drain(..).collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.seen.lock().unwrap().push(*snapshot);
    }
}

struct CountingFetcher {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, job: &Job) -> FetchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FetchResult::Success {
            job: job.clone(),
            bytes: vec![1, 2, 3],
            content_name: format!("{}.png", job.sequence_index()),
        }
    }
}

/// Job 0 succeeds once another job is in flight; every other job hangs until
/// its fetch is dropped.
struct StallingFetcher {
    started: AtomicUsize,
    abandoned: Arc<AtomicUsize>,
}

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Fetcher for StallingFetcher {
    async fn fetch(&self, job: &Job) -> FetchResult {
        if job.sequence_index() == 0 {
            while self.started.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            return FetchResult::Success {
                job: job.clone(),
                bytes: vec![9; 4096],
                content_name: "0.png".to_string(),
            };
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        let _counter = DropCounter(self.abandoned.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;
        FetchResult::Success {
            job: job.clone(),
            bytes: Vec::new(),
            content_name: format!("{}.png", job.sequence_index()),
        }
    }
}

fn reqwest_bundler(settings: FetchSettings) -> Bundler {
    let fetcher = Arc::new(ReqwestFetcher::new(settings).unwrap());
    Bundler::new(fetcher, BundlerConfig::default())
}

async fn mount_image(server: &MockServer, image_path: &str, size: usize) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xAB; size]))
        .mount(server)
        .await;
}

fn entry_sizes(bytes: &[u8]) -> Vec<(String, usize)> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = Vec::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        entries.push((file.name().to_string(), data.len()));
    }
    entries.sort();
    entries
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_failure_still_produces_archive() {
    bundle_logging::initialize_for_tests();
    let server = MockServer::start().await;
    mount_image(&server, "/img/a.png", 1024).await;
    mount_image(&server, "/img/b.png", 2048).await;
    Mock::given(method("GET"))
        .and(path("/img/c.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let urls = ["a.png", "b.png", "c.png"]
        .iter()
        .map(|name| format!("{}/img/{name}", server.uri()))
        .collect();
    let observer = Arc::new(RecordingObserver::default());
    let outcome = reqwest_bundler(FetchSettings::default())
        .retrieve(
            RetrievalRequest::new(urls, "12345"),
            observer.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.truncated, 0);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.archive_name, "pixiv_user_12345.zip");
    assert_eq!(outcome.archive.entry_count(), 2);
    assert_eq!(outcome.archive.failed_count(), 1);
    assert_eq!(
        entry_sizes(outcome.archive.bytes()),
        vec![("a.png".to_string(), 1024), ("b.png".to_string(), 2048)]
    );

    let seen = observer.take();
    let last = seen.last().unwrap();
    assert_eq!(last.phase, Phase::Completed);
    assert_eq!(last.completed_count, 2);
    assert_eq!(last.failed_count, 1);
    assert_eq!(last.percent, 100);
    for pair in seen.windows(2) {
        assert!(pair[1].processed() >= pair[0].processed());
        assert!(pair[1].phase >= pair[0].phase);
    }
}

#[tokio::test]
async fn empty_url_list_is_rejected_without_fetching() {
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
    });
    let bundler = Bundler::new(fetcher.clone(), BundlerConfig::default());
    let observer = Arc::new(RecordingObserver::default());

    let err = bundler
        .retrieve(
            RetrievalRequest::new(Vec::new(), "12345"),
            observer.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RetrieveError::NoJobs));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(observer.take().last().unwrap().phase, Phase::Failed);
}

#[tokio::test]
async fn single_timeout_is_a_successful_call_with_no_entries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(300))
                .set_body_bytes(vec![0; 10]),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Duration::from_millis(50),
        ..FetchSettings::default()
    };
    let outcome = reqwest_bundler(settings)
        .retrieve(
            RetrievalRequest::new(vec![format!("{}/slow.png", server.uri())], "u"),
            Arc::new(NullObserver),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 0);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.archive.entry_count(), 0);
    assert!(entry_sizes(outcome.archive.bytes()).is_empty());
}

#[tokio::test]
async fn limit_caps_jobs_and_reports_truncation() {
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
    });
    let bundler = Bundler::new(fetcher.clone(), BundlerConfig::default());
    let urls = (0..5).map(|i| format!("https://example.com/{i}.png")).collect();

    let outcome = bundler
        .retrieve(
            RetrievalRequest::new(urls, "u").with_limit(2),
            Arc::new(NullObserver),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.truncated, 3);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_source_names_are_kept_and_runs_agree() {
    let server = MockServer::start().await;
    mount_image(&server, "/x/1.png", 10).await;
    mount_image(&server, "/y/1.png", 20).await;
    mount_image(&server, "/z/2.png", 30).await;

    let urls: Vec<String> = ["/x/1.png", "/y/1.png", "/z/2.png"]
        .iter()
        .map(|p| format!("{}{p}", server.uri()))
        .collect();
    let bundler = reqwest_bundler(FetchSettings::default());

    let mut entry_sets = Vec::new();
    for _ in 0..2 {
        let outcome = bundler
            .retrieve(
                RetrievalRequest::new(urls.clone(), "u"),
                Arc::new(NullObserver),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.archive.entry_count(), 3);
        let names: BTreeSet<String> = outcome.archive.entry_names().iter().cloned().collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains("1.png"));
        assert!(names.contains("2.png"));
        let sizes: BTreeSet<usize> = entry_sizes(outcome.archive.bytes())
            .into_iter()
            .map(|(_, size)| size)
            .collect();
        entry_sets.push(sizes);
    }
    assert_eq!(entry_sets[0], entry_sets[1]);
}

#[tokio::test]
async fn cancelled_batch_still_completes_with_counts() {
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
    });
    let bundler = Bundler::new(fetcher.clone(), BundlerConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let urls = (0..4).map(|i| format!("https://example.com/{i}.png")).collect();

    let outcome = bundler
        .retrieve(
            RetrievalRequest::new(urls, "u"),
            Arc::new(NullObserver),
            cancel,
        )
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.succeeded, 0);
    assert_eq!(outcome.failed, 4);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn archive_write_failure_fails_and_cancels_the_batch() {
    let fetcher = Arc::new(StallingFetcher {
        started: AtomicUsize::new(0),
        abandoned: Arc::new(AtomicUsize::new(0)),
    });
    let config = BundlerConfig {
        max_archive_bytes: Some(16),
        ..BundlerConfig::default()
    };
    let bundler = Bundler::new(fetcher.clone(), config);
    let observer = Arc::new(RecordingObserver::default());
    let urls = (0..3).map(|i| format!("https://example.com/{i}.png")).collect();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        bundler.retrieve(
            RetrievalRequest::new(urls, "u"),
            observer.clone(),
            CancellationToken::new(),
        ),
    )
    .await
    .expect("retrieve must not wait for stalled fetches");

    assert!(matches!(result, Err(RetrieveError::ArchiveWrite(_))));
    let seen = observer.take();
    assert_eq!(seen.last().map(|s| s.phase), Some(Phase::Failed));

    // Every fetch still in flight is dropped once the batch is cancelled.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let started = fetcher.started.load(Ordering::SeqCst);
            if started > 0 && fetcher.abandoned.load(Ordering::SeqCst) == started {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("in-flight fetches should be abandoned");
}
