//! DirectoryDocumentSource - `<inbox>/<category>/<page>/<job_id>.<ext>` を
//! 取り込み元として扱う
//!
//! ポータルのスクレイパーを差し込むまでの代用品。ページ = サブディレクトリ、
//! job_id = ファイル名（拡張子なし）、並びはファイル名順。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use super::fsutil::file_safe;
use crate::domain::{Category, JobDescriptor, JobId, RawDocument, SourceError};
use crate::ports::DocumentSource;

pub struct DirectoryDocumentSource {
    inbox: PathBuf,
}

impl DirectoryDocumentSource {
    pub fn new(inbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
        }
    }

    fn page_dir(&self, category: &Category, page: &str) -> PathBuf {
        self.inbox
            .join(file_safe(category.as_str()))
            .join(file_safe(page))
    }

    async fn find_file(&self, job: &JobDescriptor) -> Result<PathBuf, SourceError> {
        let dir = self.page_dir(&job.category, &job.page);
        let mut entries = read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| unreachable(&dir, e))? {
            let path = entry.path();
            if stem(&path).as_deref() == Some(job.job_id.as_str()) {
                return Ok(path);
            }
        }
        Err(SourceError::NotFound(job.job_id.clone()))
    }
}

fn unreachable(path: &Path, err: std::io::Error) -> SourceError {
    SourceError::Unreachable(format!("{}: {err}", path.display()))
}

async fn read_dir(dir: &Path) -> Result<tokio::fs::ReadDir, SourceError> {
    tokio::fs::read_dir(dir).await.map_err(|e| unreachable(dir, e))
}

fn stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

#[async_trait]
impl DocumentSource for DirectoryDocumentSource {
    async fn list_jobs(
        &self,
        category: &Category,
        page: &str,
    ) -> Result<Vec<JobDescriptor>, SourceError> {
        let dir = self.page_dir(category, page);
        let mut entries = read_dir(&dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| unreachable(&dir, e))? {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let hidden = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if is_file && !hidden && let Some(name) = stem(&path) {
                names.push(name);
            }
        }
        names.sort();

        let now = Utc::now();
        Ok(names
            .into_iter()
            .map(|name| JobDescriptor::new(JobId::new(name), category.clone(), page, now))
            .collect())
    }

    async fn fetch(&self, job: &JobDescriptor) -> Result<RawDocument, SourceError> {
        let path = self.find_file(job).await?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| unreachable(&path, e))?;
        Ok(RawDocument {
            job_id: job.job_id.clone(),
            content,
        })
    }
}
