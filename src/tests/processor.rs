//! Batch-run behavior: checkpoint cadence, reprocess filtering, progress
//! events, and cancellation. Bookmark URLs are unresolvable on purpose so
//! fetching fails fast without touching the network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

use crate::analysis::{AnalysisResult, Analyzer, Topic, TopicKeyword};
use crate::bookmarks::{BackendJson, Bookmark, BookmarkCollection};
use crate::config::{FetchConfig, ProcessorConfig};
use crate::fetch::PageFetcher;
use crate::processor::{spawn_analysis, Processor, ProgressEvent};
use crate::storage::{BackendLocal, StorageManager};

/// Collection wrapper that counts save calls.
struct CountingCollection {
    inner: BackendJson,
    saves: Arc<AtomicUsize>,
}

impl BookmarkCollection for CountingCollection {
    fn all(&self) -> Vec<Bookmark> {
        self.inner.all()
    }

    fn update_analysis(&self, url: &str, keywords: Vec<String>, topics: Vec<Topic>) -> bool {
        self.inner.update_analysis(url, keywords, topics)
    }

    fn set_validity(&self, url: &str, is_valid: bool) -> bool {
        self.inner.set_validity(url, is_valid)
    }

    fn save(&self) -> anyhow::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Always produces the same non-empty result, so every bookmark updates.
struct StaticAnalyzer;

impl Analyzer for StaticAnalyzer {
    fn name(&self) -> &str {
        "static"
    }

    fn extract(&self, _text: &str, _title: &str) -> AnalysisResult {
        AnalysisResult {
            keywords: vec!["fixed".to_string()],
            topics: vec![Topic {
                topic_id: 0,
                probability: 1.0,
                keywords: vec![TopicKeyword {
                    word: "fixed".to_string(),
                    score: 1.0,
                }],
                representation: vec!["fixed".to_string()],
            }],
        }
    }
}

/// Produces nothing, so every bookmark is skipped.
struct EmptyAnalyzer;

impl Analyzer for EmptyAnalyzer {
    fn name(&self) -> &str {
        "empty"
    }

    fn extract(&self, _text: &str, _title: &str) -> AnalysisResult {
        AnalysisResult::empty()
    }
}

fn fetcher() -> PageFetcher {
    PageFetcher::new(FetchConfig {
        polite_delay_ms: 0,
        ..FetchConfig::default()
    })
}

fn seeded_collection(
    store: Arc<dyn StorageManager>,
    count: usize,
    saves: Arc<AtomicUsize>,
) -> Arc<CountingCollection> {
    let inner = BackendJson::load(store).unwrap();
    for i in 0..count {
        inner.insert(Bookmark::new(format!("unresolvable://bookmark/{i}"), format!("b{i}")));
    }
    Arc::new(CountingCollection { inner, saves })
}

fn processor_with(
    collection: Arc<CountingCollection>,
    store: Arc<dyn StorageManager>,
    analyzer: Box<dyn Analyzer>,
    save_every: usize,
) -> Processor {
    Processor::new(
        collection,
        store,
        analyzer,
        fetcher(),
        ProcessorConfig { save_every },
    )
}

#[test]
fn test_checkpoint_cadence() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(tmp.path()).unwrap());
    let saves = Arc::new(AtomicUsize::new(0));
    let collection = seeded_collection(store.clone(), 7, saves.clone());

    let mut processor = processor_with(collection, store, Box::new(StaticAnalyzer), 3);
    let cancel = AtomicBool::new(false);
    let (sender, _receiver) = mpsc::channel();

    let summary = processor.run(false, &cancel, &sender).unwrap();
    assert_eq!(summary.processed, 7);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.failed, 0);
    assert!(!summary.cancelled);

    // Checkpoints after bookmarks 3 and 6, then the final flush.
    assert_eq!(saves.load(Ordering::SeqCst), 3);
}

#[test]
fn test_analyzed_bookmarks_are_skipped_without_force() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(tmp.path()).unwrap());
    let saves = Arc::new(AtomicUsize::new(0));
    let collection = seeded_collection(store.clone(), 3, saves.clone());

    for bmark in collection.all() {
        collection.update_analysis(&bmark.url, vec!["done".to_string()], vec![]);
    }

    let mut processor =
        processor_with(collection.clone(), store.clone(), Box::new(StaticAnalyzer), 20);
    let cancel = AtomicBool::new(false);
    let (sender, _receiver) = mpsc::channel();

    let summary = processor.run(false, &cancel, &sender).unwrap();
    assert_eq!(summary.processed, 0);

    // Force reprocesses everything.
    let mut processor = processor_with(collection, store, Box::new(StaticAnalyzer), 20);
    let summary = processor.run(true, &cancel, &sender).unwrap();
    assert_eq!(summary.processed, 3);
}

#[test]
fn test_checkpoint_counts_skipped_bookmarks() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(tmp.path()).unwrap());
    let saves = Arc::new(AtomicUsize::new(0));
    let collection = seeded_collection(store.clone(), 7, saves.clone());

    let mut processor = processor_with(collection, store, Box::new(EmptyAnalyzer), 3);
    let cancel = AtomicBool::new(false);
    let (sender, _receiver) = mpsc::channel();

    let summary = processor.run(false, &cancel, &sender).unwrap();
    assert_eq!(summary.skipped, 7);

    // Skip-heavy runs checkpoint on the same cadence as productive ones.
    assert_eq!(saves.load(Ordering::SeqCst), 3);
}

#[test]
fn test_empty_results_count_as_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(tmp.path()).unwrap());
    let saves = Arc::new(AtomicUsize::new(0));
    let collection = seeded_collection(store.clone(), 4, saves.clone());

    let mut processor = processor_with(collection.clone(), store, Box::new(EmptyAnalyzer), 20);
    let cancel = AtomicBool::new(false);
    let (sender, _receiver) = mpsc::channel();

    let summary = processor.run(false, &cancel, &sender).unwrap();
    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.processed, 0);
    assert!(collection.all().iter().all(|b| b.keywords.is_empty()));
}

#[test]
fn test_pre_set_cancellation_processes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(tmp.path()).unwrap());
    let saves = Arc::new(AtomicUsize::new(0));
    let collection = seeded_collection(store.clone(), 5, saves.clone());

    let mut processor = processor_with(collection, store, Box::new(StaticAnalyzer), 20);
    let cancel = AtomicBool::new(true);
    let (sender, receiver) = mpsc::channel();

    let summary = processor.run(false, &cancel, &sender).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.processed, 0);
    // The final flush still runs.
    assert_eq!(saves.load(Ordering::SeqCst), 1);
    // A cancelled run never claims completion.
    assert!(receiver.try_iter().next().is_none());
}

#[test]
fn test_background_run_reports_progress_and_finishes() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(tmp.path()).unwrap());
    let saves = Arc::new(AtomicUsize::new(0));
    let collection = seeded_collection(store.clone(), 4, saves.clone());

    let processor = processor_with(collection, store, Box::new(StaticAnalyzer), 20);
    let cancel = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = mpsc::channel();

    let handle = spawn_analysis(processor, false, cancel, sender);

    let mut percents = Vec::new();
    let mut finished = None;
    for event in receiver {
        match event {
            ProgressEvent::Progress { percent, label } => {
                assert!(!label.is_empty());
                percents.push(percent);
            }
            ProgressEvent::Finished(summary) => finished = Some(summary),
            ProgressEvent::Failed(message) => panic!("run failed: {message}"),
        }
    }
    handle.join().unwrap();

    let summary = finished.expect("missing terminal event");
    assert_eq!(summary.processed, 4);
    // One event after each bookmark; 100 arrives only after the final
    // flush.
    assert_eq!(percents, vec![25, 50, 75, 100]);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
}
