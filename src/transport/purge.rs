//! Purging of residual session artifacts.
//!
//! Caches and local stores are treated as adversarial shared state: anything whose key
//! mentions the reader, PDFs or the open document is removed when a transport is
//! created and again when it is aborted.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A keyed store that may hold leftovers from a previous session.
pub trait ArtifactStore: Send + Sync {
    fn name(&self) -> &str;

    fn keys(&self) -> Vec<String>;

    /// Remove one entry. Returns whether something was removed.
    fn remove(&self, key: &str) -> bool;
}

/// Case-insensitive substring predicate over artifact keys.
#[derive(Debug, Clone)]
pub struct ArtifactMatcher {
    needles: Vec<String>,
}

impl ArtifactMatcher {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            needles: needles
                .into_iter()
                .map(|n| n.into().to_ascii_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Matches "pdf", "reader" and, when known, the document id.
    pub fn for_document(document_id: Option<&str>) -> Self {
        let mut needles = vec!["pdf".to_string(), "reader".to_string()];
        if let Some(id) = document_id {
            needles.push(id.to_string());
        }
        Self::new(needles)
    }

    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.needles.iter().any(|n| key.contains(n.as_str()))
    }
}

/// Remove every matching key from every store. Returns the number removed.
pub fn purge_session_artifacts(stores: &[Arc<dyn ArtifactStore>], matcher: &ArtifactMatcher) -> usize {
    let mut removed = 0;
    for store in stores {
        for key in store.keys() {
            if matcher.matches(&key) && store.remove(&key) {
                removed += 1;
            }
        }
        tracing::debug!(store = store.name(), "session artifacts purged");
    }
    removed
}

/// In-memory key/value store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    name: String,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.into(), value.into());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn remove(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.remove(key).is_some())
            .unwrap_or(false)
    }
}

/// Files directly inside a cache directory, keyed by file name.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    name: String,
    dir: PathBuf,
}

impl DirectoryArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: dir.display().to_string(),
            dir,
        }
    }
}

impl ArtifactStore for DirectoryArtifactStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn remove(&self, key: &str) -> bool {
        // Keys are bare file names; never follow a path out of the directory.
        if key.contains('/') || key.contains('\\') || key == ".." {
            return false;
        }
        match fs::remove_file(self.dir.join(key)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(store = %self.name, key, error = %e, "failed to remove cached artifact");
                false
            }
        }
    }
}
