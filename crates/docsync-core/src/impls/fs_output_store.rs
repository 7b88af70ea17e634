//! FsOutputStore - harvest 出力を `<root>/<category>/<job_id>.json` に保存

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::fsutil::{file_safe, write_atomic};
use crate::domain::{Category, JobOutput, OutputError};
use crate::ports::OutputStore;

pub struct FsOutputStore {
    root: PathBuf,
}

impl FsOutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn category_dir(&self, category: &Category) -> PathBuf {
        self.root.join(file_safe(category.as_str()))
    }

    fn output_path(&self, output: &JobOutput) -> PathBuf {
        self.category_dir(&output.category)
            .join(format!("{}.json", file_safe(output.job_id.as_str())))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> OutputError {
    OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl OutputStore for FsOutputStore {
    async fn save(&self, output: &JobOutput) -> Result<(), OutputError> {
        let path = self.output_path(output);
        let bytes = serde_json::to_vec_pretty(output).map_err(|source| OutputError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|source| io_error(&path, source))
    }

    async fn list(&self, category: &Category) -> Result<Vec<JobOutput>, OutputError> {
        let dir = self.category_dir(category);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir, err)),
        };

        let mut outputs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&dir, source))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| io_error(&path, source))?;
            let output: JobOutput = serde_json::from_slice(&bytes)
                .map_err(|source| OutputError::Json { path, source })?;
            outputs.push(output);
        }
        outputs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(outputs)
    }
}
