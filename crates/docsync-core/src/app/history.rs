//! LocalHistoryStore - このマシンが完了させた job の記録（カテゴリ別）
//!
//! ledger の COMPLETED が正で、こちらは ledger に触らずにスキップするための
//! 早道にすぎない。ファイルは `{"ledger": [...], "estimate": [...]}` 形式。
//! 古い形式（ただの配列）は最初のカテゴリの記録として読む。

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::domain::{Category, HistoryError, JobId};
use crate::impls::fsutil::write_atomic;

/// Shared handle; the scheduler and the upload coordinator hold their own.
pub type SharedHistory = Arc<Mutex<LocalHistoryStore>>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OnDisk {
    PerCategory(BTreeMap<Category, BTreeSet<JobId>>),
    Legacy(Vec<JobId>),
}

#[derive(Debug)]
pub struct LocalHistoryStore {
    path: PathBuf,
    legacy_category: Category,
    completed: BTreeMap<Category, BTreeSet<JobId>>,
}

impl LocalHistoryStore {
    /// Empty store bound to `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>, legacy_category: Category) -> Self {
        Self {
            path: path.into(),
            legacy_category,
            completed: BTreeMap::new(),
        }
    }

    /// Read `path`, treating a missing file as an empty history.
    pub async fn open(
        path: impl Into<PathBuf>,
        legacy_category: Category,
    ) -> Result<Self, HistoryError> {
        let mut store = Self::new(path, legacy_category);
        store.load().await?;
        Ok(store)
    }

    pub fn shared(self) -> SharedHistory {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge the on-disk content into memory.
    ///
    /// Entries recorded in memory but not yet persisted are kept.
    pub async fn load(&mut self) -> Result<(), HistoryError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(HistoryError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let on_disk: OnDisk =
            serde_json::from_slice(&bytes).map_err(|source| HistoryError::Json {
                path: self.path.clone(),
                source,
            })?;
        match on_disk {
            OnDisk::PerCategory(map) => {
                for (category, ids) in map {
                    self.completed.entry(category).or_default().extend(ids);
                }
            }
            OnDisk::Legacy(ids) => {
                tracing::info!(
                    path = %self.path.display(),
                    category = %self.legacy_category,
                    "reading legacy history format"
                );
                self.completed
                    .entry(self.legacy_category.clone())
                    .or_default()
                    .extend(ids);
            }
        }
        Ok(())
    }

    /// Write the whole history by atomic replacement.
    pub async fn persist(&self) -> Result<(), HistoryError> {
        let bytes = serde_json::to_vec_pretty(&self.completed).map_err(|source| {
            HistoryError::Json {
                path: self.path.clone(),
                source,
            }
        })?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| HistoryError::Io {
                path: self.path.clone(),
                source,
            })
    }

    pub fn contains(&self, category: &Category, job_id: &JobId) -> bool {
        self.completed
            .get(category)
            .is_some_and(|ids| ids.contains(job_id))
    }

    /// Returns `false` if it was already recorded.
    pub fn record_completed(&mut self, category: &Category, job_id: &JobId) -> bool {
        self.completed
            .entry(category.clone())
            .or_default()
            .insert(job_id.clone())
    }

    /// Record and persist in one step. If the write fails the new entry is
    /// taken back out, so memory never claims a job the file does not.
    pub async fn commit_completed(
        &mut self,
        category: &Category,
        job_id: &JobId,
    ) -> Result<bool, HistoryError> {
        let added = self.record_completed(category, job_id);
        if let Err(err) = self.persist().await {
            if added
                && let Some(ids) = self.completed.get_mut(category)
            {
                ids.remove(job_id);
            }
            return Err(err);
        }
        Ok(added)
    }

    pub fn count(&self, category: &Category) -> usize {
        self.completed.get(category).map_or(0, BTreeSet::len)
    }

    /// Per-category counts, for status display.
    pub fn snapshot(&self) -> BTreeMap<Category, usize> {
        self.completed
            .iter()
            .map(|(category, ids)| (category.clone(), ids.len()))
            .collect()
    }
}
