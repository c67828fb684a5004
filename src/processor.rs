//! Batch analysis orchestration: walks the bookmark collection, fetches
//! page text through a persistent content cache, runs the configured
//! analyzer, and checkpoints results so an interrupted run loses at most
//! `save_every` bookmarks of work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analysis::Analyzer;
use crate::bookmarks::{Bookmark, BookmarkCollection};
use crate::config::ProcessorConfig;
use crate::fetch::PageFetcher;
use crate::storage::StorageManager;

const CACHE_IDENT: &str = "content_cache.json";

/// Fetched page text keyed by URL digest. Only non-empty text is stored,
/// so a transient fetch failure does not suppress refetching forever.
pub struct ContentCache {
    store: Arc<dyn StorageManager>,
    entries: HashMap<String, String>,
    dirty: bool,
}

impl ContentCache {
    pub fn load(store: Arc<dyn StorageManager>) -> Self {
        let entries = match store.read(CACHE_IDENT) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::warn!("discarding unreadable content cache: {err}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        ContentCache {
            store,
            entries,
            dirty: false,
        }
    }

    fn key(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(&Self::key(url)).map(String::as_str)
    }

    pub fn put(&mut self, url: &str, text: String) {
        self.entries.insert(Self::key(url), text);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persists the cache if anything changed since the last flush.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let bytes = serde_json::to_vec(&self.entries)?;
        self.store.write(CACHE_IDENT, &bytes)?;
        self.dirty = false;
        Ok(())
    }
}

/// Per-bookmark processing outcome, also used for progress labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkOutcome {
    Updated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
pub enum ProgressEvent {
    Progress { percent: u8, label: String },
    Finished(RunSummary),
    Failed(String),
}

pub struct Processor {
    bookmarks: Arc<dyn BookmarkCollection>,
    analyzer: Box<dyn Analyzer>,
    fetcher: PageFetcher,
    cache: ContentCache,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        bookmarks: Arc<dyn BookmarkCollection>,
        store: Arc<dyn StorageManager>,
        analyzer: Box<dyn Analyzer>,
        fetcher: PageFetcher,
        config: ProcessorConfig,
    ) -> Self {
        let cache = ContentCache::load(store);
        Processor {
            bookmarks,
            analyzer,
            fetcher,
            cache,
            config,
        }
    }

    /// Analyzes one bookmark. `Updated` means the collection now carries a
    /// fresh result; `Skipped` means the analyzer produced nothing usable.
    pub fn analyze_bookmark(&mut self, bookmark: &Bookmark) -> BookmarkOutcome {
        let text = match self.cache.get(&bookmark.url) {
            Some(cached) => cached.to_string(),
            None => {
                let fetched = self.fetcher.fetch_page_text(&bookmark.url);
                if !fetched.is_empty() {
                    self.cache.put(&bookmark.url, fetched.clone());
                }
                fetched
            }
        };

        let result = self.analyzer.extract(&text, &bookmark.title);
        if result.is_empty() {
            return BookmarkOutcome::Skipped;
        }

        if self
            .bookmarks
            .update_analysis(&bookmark.url, result.keywords, result.topics)
        {
            BookmarkOutcome::Updated
        } else {
            BookmarkOutcome::Failed
        }
    }

    /// Bookmarks eligible for this run. Without `force`, anything that
    /// already carries keywords or topics is left alone.
    fn targets(&self, force: bool) -> Vec<Bookmark> {
        self.bookmarks
            .all()
            .into_iter()
            .filter(|b| b.is_valid)
            .filter(|b| force || (b.keywords.is_empty() && b.topics.is_empty()))
            .collect()
    }

    pub fn run(
        &mut self,
        force: bool,
        cancel: &AtomicBool,
        progress: &Sender<ProgressEvent>,
    ) -> anyhow::Result<RunSummary> {
        let targets = self.targets(force);
        let total = targets.len();
        log::info!(
            "analyzing {total} of {} bookmarks with {}",
            self.bookmarks.len(),
            self.analyzer.name()
        );

        let mut summary = RunSummary::default();
        let mut since_checkpoint = 0usize;

        for (idx, bookmark) in targets.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                log::info!("cancellation requested, stopping after {idx} bookmarks");
                summary.cancelled = true;
                break;
            }

            match self.analyze_bookmark(bookmark) {
                BookmarkOutcome::Updated => summary.processed += 1,
                BookmarkOutcome::Skipped => summary.skipped += 1,
                BookmarkOutcome::Failed => summary.failed += 1,
            }
            since_checkpoint += 1;

            // 100 is reserved for after the final flush.
            let percent = (100 * (idx + 1) / total) as u8;
            if percent < 100 {
                let label = if bookmark.title.is_empty() {
                    bookmark.url.clone()
                } else {
                    bookmark.title.clone()
                };
                // Receiver may already be gone; progress is advisory.
                let _ = progress.send(ProgressEvent::Progress { percent, label });
            }

            if since_checkpoint >= self.config.save_every {
                self.checkpoint();
                since_checkpoint = 0;
            }
        }

        self.bookmarks.save()?;
        self.cache.flush()?;
        if !summary.cancelled {
            let _ = progress.send(ProgressEvent::Progress {
                percent: 100,
                label: "done".to_string(),
            });
        }
        Ok(summary)
    }

    /// Mid-run flush. Failure is logged and the run continues; the final
    /// flush will surface a persistent storage problem.
    fn checkpoint(&mut self) {
        if let Err(err) = self.bookmarks.save() {
            log::error!("checkpoint save failed: {err}");
        }
        if let Err(err) = self.cache.flush() {
            log::error!("content cache flush failed: {err}");
        }
    }
}

/// Runs the processor on a background thread, reporting through the
/// progress channel. The final event is always `Finished` or `Failed`.
pub fn spawn_analysis(
    mut processor: Processor,
    force: bool,
    cancel: Arc<AtomicBool>,
    progress: Sender<ProgressEvent>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        match processor.run(force, &cancel, &progress) {
            Ok(summary) => {
                let _ = progress.send(ProgressEvent::Finished(summary));
            }
            Err(err) => {
                log::error!("analysis run failed: {err:#}");
                let _ = progress.send(ProgressEvent::Failed(format!("{err:#}")));
            }
        }
    })
}
