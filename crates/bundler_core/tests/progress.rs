use std::sync::{Arc, Mutex};
use std::thread;

use bundler_core::{
    FailureKind, FetchResult, Job, Phase, ProgressObserver, ProgressSnapshot, ProgressTracker,
};

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

fn success(index: usize) -> FetchResult {
    FetchResult::Success {
        job: Job::new(format!("https://example.com/{index}.png"), index),
        bytes: vec![0; 4],
        content_name: format!("{index}.png"),
    }
}

fn failure(index: usize) -> FetchResult {
    FetchResult::failure(
        Job::new(format!("https://example.com/{index}.png"), index),
        FailureKind::HttpStatus(404),
        "404 Not Found",
    )
}

#[test]
fn observe_counts_and_computes_truncated_percent() {
    bundle_logging::initialize_for_tests();
    let observer = Arc::new(RecordingObserver::default());
    let tracker = ProgressTracker::new(observer.clone());

    tracker.begin_download(3);
    tracker.observe(&success(0));
    tracker.observe(&failure(1));

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.completed_count, 1);
    assert_eq!(snapshot.failed_count, 1);
    assert_eq!(snapshot.total_count, 3);
    assert_eq!(snapshot.percent, 66);
    assert_eq!(snapshot.phase, Phase::Downloading);
    assert_eq!(observer.take().len(), 3);
}

#[test]
fn phase_never_regresses() {
    let tracker = ProgressTracker::new(Arc::new(RecordingObserver::default()));
    tracker.begin_download(1);
    tracker.begin_packaging();
    tracker.begin_download(10);
    assert_eq!(tracker.snapshot().phase, Phase::Packaging);
    assert_eq!(tracker.snapshot().total_count, 1);

    tracker.complete();
    tracker.fail();
    assert_eq!(tracker.snapshot().phase, Phase::Completed);
}

#[test]
fn any_live_phase_may_fail() {
    for setup in [0, 1, 2] {
        let tracker = ProgressTracker::new(Arc::new(RecordingObserver::default()));
        if setup >= 1 {
            tracker.begin_download(2);
        }
        if setup >= 2 {
            tracker.begin_packaging();
        }
        tracker.fail();
        assert_eq!(tracker.snapshot().phase, Phase::Failed);
    }
}

#[test]
fn terminal_snapshot_ignores_late_results() {
    let tracker = ProgressTracker::new(Arc::new(RecordingObserver::default()));
    tracker.begin_download(2);
    tracker.observe(&success(0));
    tracker.fail();
    tracker.observe(&success(1));
    assert_eq!(tracker.snapshot().completed_count, 1);
}

#[test]
fn counts_never_exceed_total() {
    let tracker = ProgressTracker::new(Arc::new(RecordingObserver::default()));
    tracker.begin_download(1);
    tracker.observe(&success(0));
    tracker.observe(&failure(1));
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.processed(), 1);
    assert_eq!(snapshot.percent, 100);
}

#[test]
fn concurrent_observers_see_monotonic_snapshots() {
    let observer = Arc::new(RecordingObserver::default());
    let tracker = Arc::new(ProgressTracker::new(observer.clone()));
    tracker.begin_download(400);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let index = worker * 50 + i;
                    if index % 3 == 0 {
                        tracker.observe(&failure(index));
                    } else {
                        tracker.observe(&success(index));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    tracker.complete();

    let seen = observer.take();
    for pair in seen.windows(2) {
        assert!(pair[1].completed_count >= pair[0].completed_count);
        assert!(pair[1].failed_count >= pair[0].failed_count);
        assert!(pair[1].phase >= pair[0].phase || pair[1].phase == Phase::Failed);
    }
    let last = seen.last().unwrap();
    assert_eq!(last.processed(), 400);
    assert_eq!(last.failed_count, 134);
    assert_eq!(last.phase, Phase::Completed);
}
