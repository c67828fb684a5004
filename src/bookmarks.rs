use std::{
    io::ErrorKind,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::analysis::Topic;
use crate::storage::StorageManager;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bookmark {
    pub url: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_true")]
    pub is_valid: bool,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub topics: Vec<Topic>,

    /// Output of a previously-configured analyzer family. Cleared whenever a
    /// bookmark is re-analyzed so stale results never mix with fresh ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legacy_topics: Vec<Topic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legacy_keywords: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Bookmark {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Bookmark {
            url: url.into(),
            title: title.into(),
            is_valid: true,
            ..Default::default()
        }
    }
}

/// The bookmark collection the processor iterates and writes back into.
/// `save` persists a wholesale snapshot; there is no fine-grained locking,
/// so concurrent runs against the same path must be serialized by the caller.
pub trait BookmarkCollection: Send + Sync {
    fn all(&self) -> Vec<Bookmark>;
    fn update_analysis(&self, url: &str, keywords: Vec<String>, topics: Vec<Topic>) -> bool;
    fn set_validity(&self, url: &str, is_valid: bool) -> bool;
    fn save(&self) -> anyhow::Result<()>;
    fn len(&self) -> usize;
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    bookmarks: Vec<Bookmark>,
}

const SNAPSHOT_FILE: &str = "bookmarks.json";

/// JSON-backed collection. The whole list lives in memory behind a RwLock
/// and is flushed atomically through the injected storage backend.
pub struct BackendJson {
    list: Arc<RwLock<Vec<Bookmark>>>,
    store: Arc<dyn StorageManager>,
}

impl BackendJson {
    pub fn load(store: Arc<dyn StorageManager>) -> anyhow::Result<Self> {
        let bookmarks = match store.read(SNAPSHOT_FILE) {
            Ok(data) => {
                let snapshot: Snapshot = serde_json::from_slice(&data)?;
                snapshot.bookmarks
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                log::info!("no {SNAPSHOT_FILE} yet, starting with an empty collection");
                vec![]
            }
            Err(err) => return Err(err.into()),
        };

        log::debug!("loaded {} bookmarks", bookmarks.len());

        Ok(BackendJson {
            list: Arc::new(RwLock::new(bookmarks)),
            store,
        })
    }

    pub fn insert(&self, bookmark: Bookmark) {
        let mut list = self.list.write().unwrap();
        if let Some(existing) = list.iter_mut().find(|b| b.url == bookmark.url) {
            *existing = bookmark;
        } else {
            list.push(bookmark);
        }
    }

    /// Writes the collection as CSV for spreadsheet inspection. Topics are
    /// flattened to their representation words.
    pub fn export_csv<W: std::io::Write>(&self, writer: W) -> anyhow::Result<()> {
        let list = self.list.read().unwrap();

        let mut wrt = csv::Writer::from_writer(writer);
        wrt.write_record(["url", "title", "is_valid", "keywords", "topics"])?;
        for bmark in list.iter() {
            let topics = bmark
                .topics
                .iter()
                .map(|t| t.representation.join(" "))
                .collect::<Vec<_>>()
                .join("; ");
            wrt.write_record([
                &bmark.url,
                &bmark.title,
                &bmark.is_valid.to_string(),
                &bmark.keywords.join(","),
                &topics,
            ])?;
        }
        wrt.flush()?;

        Ok(())
    }
}

impl BookmarkCollection for BackendJson {
    fn all(&self) -> Vec<Bookmark> {
        self.list.read().unwrap().clone()
    }

    fn update_analysis(&self, url: &str, keywords: Vec<String>, topics: Vec<Topic>) -> bool {
        let mut list = self.list.write().unwrap();
        let Some(bmark) = list.iter_mut().find(|b| b.url == url) else {
            return false;
        };

        bmark.keywords = keywords;
        bmark.topics = topics;
        bmark.legacy_topics.clear();
        bmark.legacy_keywords.clear();

        true
    }

    fn set_validity(&self, url: &str, is_valid: bool) -> bool {
        let mut list = self.list.write().unwrap();
        let Some(bmark) = list.iter_mut().find(|b| b.url == url) else {
            return false;
        };

        bmark.is_valid = is_valid;
        true
    }

    fn save(&self) -> anyhow::Result<()> {
        let list = self.list.read().unwrap();
        let snapshot = Snapshot {
            bookmarks: list.clone(),
        };

        let data = serde_json::to_vec_pretty(&snapshot)?;
        self.store.write(SNAPSHOT_FILE, &data)?;

        log::debug!("saved {} bookmarks", list.len());
        Ok(())
    }

    fn len(&self) -> usize {
        self.list.read().unwrap().len()
    }
}
