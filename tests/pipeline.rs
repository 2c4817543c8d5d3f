// tests/pipeline.rs

//! End-to-end tests for the ingest pipeline: deduplication, conversion,
//! failure handling and shutdown.

mod common;

use common::{FailingConverter, TestEnv, png_bytes};
use imgsift::convert::{Converter, ImageConverter, TargetFormat};
use imgsift::discovery::WorkItem;
use imgsift::pipeline::{WorkerPool, wait_until_idle};
use imgsift::{
    Error, FileMetadata, HashAlgorithm, InsertOutcome, Outcome, RecordStore, Result, RetryPolicy,
    hash,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

fn run_to_idle(pipeline: &Arc<imgsift::Pipeline>, workers: usize) {
    let pool = WorkerPool::start(pipeline.clone(), workers).unwrap();
    let never = AtomicBool::new(false);
    assert!(wait_until_idle(pipeline.queue(), &never, Duration::from_millis(10)));
    assert!(pool.shutdown(Duration::from_secs(10)));
}

#[test]
fn test_identical_files_yield_one_record() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(false);

    for i in 0..8 {
        env.write_png(&format!("copy{}.png", i), 42);
    }
    for entry in fs::read_dir(&env.input).unwrap() {
        assert!(pipeline.queue().offer(entry.unwrap().path()));
    }

    run_to_idle(&pipeline, 4);

    let store = pipeline.store();
    assert_eq!(store.total_records().unwrap(), 1);
    assert_eq!(env.output_files().len(), 1);

    // The winner keeps its source, every other copy is gone
    let remaining: Vec<_> = fs::read_dir(&env.input).unwrap().collect();
    assert_eq!(remaining.len(), 1);

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.duplicates, 7);
    assert_eq!(stats.errors, 0);
}

#[test]
fn test_two_distinct_contents_among_three_files() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(false);

    let a = env.write_png("a.png", 1);
    let b = env.write_png("b.png", 2);
    let c = env.write_png("c.png", 1);
    for path in [&a, &b, &c] {
        pipeline.queue().offer(path.clone());
    }

    run_to_idle(&pipeline, 3);

    assert_eq!(pipeline.store().total_records().unwrap(), 2);
    assert_eq!(env.output_files().len(), 2);
    assert!(b.exists());
    assert!(a.exists() ^ c.exists(), "exactly one of a/c survives");
}

#[test]
fn test_delete_originals_after_conversion() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(true);
    let source = env.write_png("photo.png", 9);

    let outcome = pipeline.handle(WorkItem::new(source.clone()), 1);

    let (record, target) = match outcome {
        Outcome::Converted {
            record,
            target,
            source_removed,
        } => {
            assert!(source_removed);
            (record, target)
        }
        other => panic!("expected Converted, got {:?}", other),
    };

    assert!(!source.exists());
    assert!(target.exists());
    assert_eq!(target.file_name().unwrap(), "photo.webp");
    assert!(record.processed_at.is_some());
    assert_eq!(record.target_path.as_deref(), Some(target.to_str().unwrap()));

    let decoded = image::open(&target).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (8, 8));
}

#[test]
fn test_conversion_failure_preserves_source() {
    let env = TestEnv::new();
    let pipeline = env.pipeline_with(Arc::new(FailingConverter), true);
    let source = env.write_png("broken.png", 3);
    let before = fs::read(&source).unwrap();

    let outcome = pipeline.handle(WorkItem::new(source.clone()), 1);
    assert!(matches!(outcome, Outcome::Failed(Error::Conversion { .. })));

    assert_eq!(fs::read(&source).unwrap(), before);
    assert!(env.output_files().is_empty());

    // The fingerprint stays reserved without a target
    let pending = pipeline.store().list_pending(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].target_path.is_none());
    assert_eq!(pipeline.stats().snapshot().conversion_errors, 1);
}

#[test]
fn test_copy_of_unconverted_content_is_duplicate() {
    let env = TestEnv::new();
    let failing = env.pipeline_with(Arc::new(FailingConverter), false);
    let first = env.write_png("first.png", 5);
    assert!(matches!(
        failing.handle(WorkItem::new(first.clone()), 1),
        Outcome::Failed(_)
    ));

    // Same store, working converter: the reservation still wins
    let pipeline = env.pipeline(false);
    let second = env.write_png("second.png", 5);
    match pipeline.handle(WorkItem::new(second.clone()), 1) {
        Outcome::Duplicate { existing, .. } => assert!(existing.processed_at.is_none()),
        other => panic!("expected Duplicate, got {:?}", other),
    }
    assert!(first.exists());
    assert!(!second.exists());
}

#[test]
fn test_concurrent_insert_if_absent_single_winner() {
    let env = TestEnv::new();
    let store = env.store(8);
    let fingerprint = hash::hash_bytes(HashAlgorithm::Sha256, &png_bytes(7));

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let store = store.clone();
            let barrier = barrier.clone();
            let fingerprint = fingerprint.clone();
            thread::spawn(move || {
                let meta = FileMetadata::from_path(
                    Path::new(&format!("/in/copy{}.png", i)),
                    100,
                    HashAlgorithm::Sha256,
                );
                barrier.wait();
                store.insert_if_absent(&fingerprint, &meta).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<InsertOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = outcomes.iter().filter(|o| o.is_inserted()).count();
    assert_eq!(winners, 1);

    let winner_id = outcomes.iter().find(|o| o.is_inserted()).unwrap().record().id;
    assert!(outcomes.iter().all(|o| o.record().id == winner_id));
    assert_eq!(store.total_records().unwrap(), 1);
}

#[test]
fn test_mark_processed_twice_is_noop() {
    let env = TestEnv::new();
    let store = env.store(2);
    let fingerprint = hash::hash_bytes(HashAlgorithm::Sha256, b"content");
    let meta = FileMetadata::from_path(Path::new("/in/a.png"), 7, HashAlgorithm::Sha256);
    store.insert_if_absent(&fingerprint, &meta).unwrap();

    let target = env.output.join("a.webp");
    store.mark_processed(fingerprint.as_str(), &target).unwrap();
    let first = store.find_by_fingerprint(fingerprint.as_str()).unwrap().unwrap();
    store.mark_processed(fingerprint.as_str(), &target).unwrap();
    let second = store.find_by_fingerprint(fingerprint.as_str()).unwrap().unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_shutdown_before_reservation_leaves_file() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(true);
    let source = env.write_png("late.png", 11);

    pipeline.request_shutdown();
    let outcome = pipeline.handle(WorkItem::new(source.clone()), 1);

    assert!(matches!(outcome, Outcome::Interrupted));
    assert!(source.exists());
    assert_eq!(pipeline.store().total_records().unwrap(), 0);
    assert_eq!(pipeline.stats().snapshot().interrupted, 1);
}

#[test]
fn test_unsettled_file_requeued_then_abandoned() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(false);
    let empty = env.input.join("empty.png");
    fs::write(&empty, b"").unwrap();

    assert!(pipeline.queue().offer(empty.clone()));
    let item = pipeline.queue().recv_timeout(Duration::from_millis(10)).unwrap();
    assert!(matches!(pipeline.handle(item, 1), Outcome::Requeued));
    assert!(pipeline.queue().is_in_flight(&empty));

    let mut item = pipeline.queue().recv_timeout(Duration::from_millis(10)).unwrap();
    assert_eq!(item.attempts, 1);
    item.attempts = 4;
    match pipeline.handle(item, 1) {
        Outcome::Failed(Error::NotReady { attempts, .. }) => assert_eq!(attempts, 5),
        other => panic!("expected NotReady, got {:?}", other),
    }
    assert!(!pipeline.queue().is_in_flight(&empty));
    assert!(empty.exists());
}

#[test]
fn test_vanished_file_is_dropped() {
    let env = TestEnv::new();
    let pipeline = env.pipeline(false);
    let ghost = env.input.join("ghost.png");

    assert!(matches!(
        pipeline.handle(WorkItem::new(ghost), 1),
        Outcome::Vanished
    ));
    assert_eq!(pipeline.stats().snapshot().errors, 0);
}

#[test]
fn test_store_unavailable_leaves_source_and_no_record() {
    let env = TestEnv::new();
    let store = RecordStore::connect(
        &env.db_path,
        1,
        Duration::from_millis(50),
        RetryPolicy::none(),
    )
    .unwrap();
    let pipeline = env.pipeline_on(
        store,
        Arc::new(ImageConverter::new(TargetFormat::Webp)),
        true,
    );
    let source = env.write_png("blocked.png", 12);
    let original = fs::read(&source).unwrap();

    // Hold the only connection so the reservation cannot run
    let held = pipeline.store().pool().acquire().unwrap();
    let outcome = pipeline.handle(WorkItem::new(source.clone()), 1);
    drop(held);

    assert!(matches!(outcome, Outcome::Failed(Error::PoolTimeout { .. })));
    assert_eq!(fs::read(&source).unwrap(), original);
    assert_eq!(pipeline.store().total_records().unwrap(), 0);
    assert!(env.output_files().is_empty());

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.store_errors, 1);
    assert_eq!(stats.errors, 1);

    // Store failures are worth another try on the next scan
    assert!(pipeline.queue().offer(source));
}

#[cfg(unix)]
#[test]
fn test_duplicate_removal_failure_is_still_a_duplicate() {
    use std::os::unix::fs::PermissionsExt;

    let env = TestEnv::new();
    let pipeline = env.pipeline(false);
    let first = env.write_png("first.png", 13);
    assert!(matches!(
        pipeline.handle(WorkItem::new(first), 1),
        Outcome::Converted { .. }
    ));

    let locked = env.dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    let copy = locked.join("copy.png");
    fs::write(&copy, png_bytes(13)).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

    // Directory permissions do not bind a privileged user
    if fs::write(locked.join("writable"), b"").is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let outcome = pipeline.handle(WorkItem::new(copy.clone()), 1);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(matches!(
        outcome,
        Outcome::Duplicate {
            source_removed: false,
            ..
        }
    ));
    assert!(copy.exists());

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.deletion_errors, 1);
    assert_eq!(stats.errors, 0);
}

/// Converter that keeps the bytes it was handed
struct RecordingConverter {
    inner: ImageConverter,
    seen: Mutex<Vec<u8>>,
}

impl Converter for RecordingConverter {
    fn target_extension(&self) -> &str {
        self.inner.target_extension()
    }

    fn convert(&self, source: &Path, data: &[u8]) -> Result<Vec<u8>> {
        *self.seen.lock().unwrap() = data.to_vec();
        self.inner.convert(source, data)
    }
}

#[test]
fn test_converter_gets_the_bytes_that_were_fingerprinted() {
    let env = TestEnv::new();
    let converter = Arc::new(RecordingConverter {
        inner: ImageConverter::new(TargetFormat::Png),
        seen: Mutex::new(Vec::new()),
    });
    let pipeline = env.pipeline_with(converter.clone(), false);
    let source = env.write_png("single.png", 14);

    let record = match pipeline.handle(WorkItem::new(source.clone()), 1) {
        Outcome::Converted { record, .. } => record,
        other => panic!("expected Converted, got {:?}", other),
    };

    let seen = converter.seen.lock().unwrap();
    assert_eq!(*seen, png_bytes(14));
    assert_eq!(
        hash::hash_bytes(HashAlgorithm::Sha256, &seen).as_str(),
        record.fingerprint
    );
    assert_eq!(
        hash::hash_file(&source, HashAlgorithm::Sha256, 4096)
            .unwrap()
            .as_str(),
        record.fingerprint
    );
}
