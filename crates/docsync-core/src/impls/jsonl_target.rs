//! JsonlTargetSystem - 提出された行を `<dir>/<category>.jsonl` に追記する
//!
//! 本物の ERP 連携を差し込むまでの代用品。1 バッチ = 1 回の書き込み。

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::fsutil::file_safe;
use crate::domain::{Category, Row, TargetError};
use crate::ports::TargetSystem;

pub struct JsonlTargetSystem {
    dir: PathBuf,
}

impl JsonlTargetSystem {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, category: &Category) -> PathBuf {
        self.dir.join(format!("{}.jsonl", file_safe(category.as_str())))
    }
}

#[async_trait]
impl TargetSystem for JsonlTargetSystem {
    async fn submit(&self, rows: &[Row], category: &Category) -> Result<(), TargetError> {
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row)
                .map_err(|e| TargetError::Rejected(e.to_string()))?;
            buf.push(b'\n');
        }

        let path = self.path_for(category);
        let unreachable = |e: std::io::Error| TargetError::Unreachable(format!("{}: {e}", path.display()));
        tokio::fs::create_dir_all(&self.dir).await.map_err(unreachable)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(unreachable)?;
        file.write_all(&buf).await.map_err(unreachable)?;
        file.flush().await.map_err(unreachable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_one_line_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let target = JsonlTargetSystem::new(dir.path());
        let category = Category::new("ledger");

        let mut row = Row::new();
        row.insert("code".into(), serde_json::json!("A1"));
        target.submit(&[row.clone(), row], &category).await.unwrap();
        target.submit(&[], &category).await.unwrap();

        let text = std::fs::read_to_string(target.path_for(&category)).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("{\"code\":\"A1\"}"));
    }
}
