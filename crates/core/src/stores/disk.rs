use crate::error::StoreError;
use crate::models::{RetrievedChunk, VectorStoreEntry};
use crate::store::top_k;
use crate::traits::VectorStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const STORE_FILE_NAME: &str = "store.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedStoreRef<'a> {
    version: u32,
    embedding_model: &'a str,
    dimensions: Option<usize>,
    entries: &'a [VectorStoreEntry],
}

#[derive(Deserialize)]
struct PersistedStore {
    version: u32,
    embedding_model: String,
    #[serde(default)]
    entries: Vec<VectorStoreEntry>,
}

/// Vector store held in memory and flushed as one JSON document under `dir`.
///
/// Flushes are serialized by `flush_lock` and land through a same-directory rename,
/// so a reader of `store.json` sees either the previous or the new snapshot.
pub struct DiskVectorStore {
    dir: PathBuf,
    embedding_model: String,
    entries: RwLock<Vec<VectorStoreEntry>>,
    flush_lock: Mutex<()>,
}

impl DiskVectorStore {
    /// Creates `dir` when missing; otherwise loads what a previous run persisted there.
    pub async fn open(
        dir: impl Into<PathBuf>,
        embedding_model: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        let embedding_model = embedding_model.into();
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(STORE_FILE_NAME);
        let mut entries = Vec::new();
        if tokio::fs::try_exists(&path).await? {
            let data = tokio::fs::read_to_string(&path).await?;
            let persisted: PersistedStore = serde_json::from_str(&data)?;
            if persisted.embedding_model != embedding_model {
                warn!(
                    stored = %persisted.embedding_model,
                    configured = %embedding_model,
                    "vector store was built with a different embedding model"
                );
            }
            debug!(version = persisted.version, "loaded store format");
            entries = persisted.entries;
        }

        info!(dir = %dir.display(), entries = entries.len(), "vector store opened");

        Ok(Self {
            dir,
            embedding_model,
            entries: RwLock::new(entries),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STORE_FILE_NAME)
    }

    pub async fn entries(&self) -> Vec<VectorStoreEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl VectorStore for DiskVectorStore {
    async fn add(&self, new_entries: Vec<VectorStoreEntry>) -> Result<(), StoreError> {
        if new_entries.is_empty() {
            return Ok(());
        }

        let mut entries = self.entries.write().await;
        let expected = entries
            .first()
            .or_else(|| new_entries.first())
            .map(|entry| entry.vector.len())
            .unwrap_or_default();

        if let Some(bad) = new_entries.iter().find(|entry| entry.vector.len() != expected) {
            return Err(StoreError::DimensionMismatch {
                expected,
                found: bad.vector.len(),
            });
        }

        debug!(added = new_entries.len(), total = entries.len() + new_entries.len(), "entries added");
        entries.extend(new_entries);
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, StoreError> {
        let entries = self.entries.read().await;
        top_k(&entries, query_vector, k)
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _flush = self.flush_lock.lock().await;

        let bytes = {
            let entries = self.entries.read().await;
            serde_json::to_vec(&PersistedStoreRef {
                version: FORMAT_VERSION,
                embedding_model: &self.embedding_model,
                dimensions: entries.first().map(|entry| entry.vector.len()),
                entries: &entries,
            })?
        };

        let dir = self.dir.clone();
        let target = self.path();
        let count = bytes.len();
        tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &bytes))
            .await
            .map_err(|error| StoreError::Persist {
                path: self.path().display().to_string(),
                details: error.to_string(),
            })??;

        info!(path = %self.path().display(), bytes = count, "vector store persisted");
        Ok(())
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|error| StoreError::Persist {
        path: target.display().to_string(),
        details: error.error.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::entry;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_missing_directory() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let dir = root.path().join("db").join("vectors");

        let store = DiskVectorStore::open(&dir, "test-model").await?;

        assert!(dir.is_dir());
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn persist_with_no_entries_is_safe() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let store = DiskVectorStore::open(root.path(), "test-model").await?;

        store.persist().await?;
        store.persist().await?;

        let reopened = DiskVectorStore::open(root.path(), "test-model").await?;
        assert_eq!(reopened.len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn reopening_appends_to_prior_data() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        {
            let store = DiskVectorStore::open(root.path(), "test-model").await?;
            store.add(vec![entry("first run", vec![1.0, 0.0])]).await?;
            store.persist().await?;
        }

        let store = DiskVectorStore::open(root.path(), "test-model").await?;
        store.add(vec![entry("second run", vec![0.0, 1.0])]).await?;
        store.persist().await?;

        let reopened = DiskVectorStore::open(root.path(), "test-model").await?;
        let texts: Vec<String> = reopened.entries().await.into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["first run".to_string(), "second run".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn unpersisted_entries_are_not_on_disk() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let store = DiskVectorStore::open(root.path(), "test-model").await?;
        store.add(vec![entry("volatile", vec![1.0])]).await?;

        let reopened = DiskVectorStore::open(root.path(), "test-model").await?;
        assert!(reopened.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_content_is_kept() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let store = DiskVectorStore::open(root.path(), "test-model").await?;
        store.add(vec![entry("same", vec![1.0, 0.0])]).await?;
        store.add(vec![entry("same", vec![1.0, 0.0])]).await?;

        let hits = store.search(&[1.0, 0.0], 4).await?;
        assert_eq!(hits.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_dimension_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let store = DiskVectorStore::open(root.path(), "test-model").await?;
        store.add(vec![entry("two", vec![1.0, 0.0])]).await?;

        let result = store.add(vec![entry("three", vec![1.0, 0.0, 0.0])]).await;
        assert!(matches!(result, Err(StoreError::DimensionMismatch { .. })));
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_persists_leave_a_readable_file() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let store = std::sync::Arc::new(DiskVectorStore::open(root.path(), "test-model").await?);

        let mut handles = Vec::new();
        for index in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.add(vec![entry(&format!("entry {index}"), vec![1.0, 0.0])]).await?;
                store.persist().await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        let reopened = DiskVectorStore::open(root.path(), "test-model").await?;
        assert_eq!(reopened.len().await, 8);
        Ok(())
    }
}
