//! JsonFileLockLedger - 共有ドライブ上の JSON ファイルを ledger として使う
//!
//! ファイルは `LockRecord` の JSON 配列（行の並び = 挿入順）。
//!
//! # 一貫性
//! - 各呼び出しはファイル全体の読み込み（書き込み系は読み→変更→アトミック置換）
//! - 同一プロセス内の書き込みは Mutex で直列化する
//! - 別マシンとの間には何の保証もない（read-modify-write の隙間で上書きされうる）。
//!   これはスプレッドシート ledger と同じ性質で、protocol 側が前提にしている

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::fsutil::replace_file;
use crate::domain::{JobId, LockRecord, LockUpdate, StoreError};
use crate::ports::{LockLedger, pick_current};

pub struct JsonFileLockLedger {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl JsonFileLockLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_rows(&self) -> Result<Vec<LockRecord>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // ファイルが無いのは空の ledger。ディレクトリごと無いのは未マウント
                self.ping().await?;
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(StoreError::Unavailable(format!(
                    "{}: {err}",
                    self.path.display()
                )));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| StoreError::Corrupt(format!("{}: {err}", self.path.display())))
    }

    async fn write_rows(&self, rows: &[LockRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(rows)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        // 共有ドライブ側のディレクトリは作らない
        replace_file(&self.path, &bytes)
            .await
            .map_err(|err| StoreError::Unavailable(format!("{}: {err}", self.path.display())))
    }
}

#[async_trait]
impl LockLedger for JsonFileLockLedger {
    async fn find(&self, job_id: &JobId) -> Result<Option<LockRecord>, StoreError> {
        let rows = self.read_rows().await?;
        let matching: Vec<&LockRecord> = rows.iter().filter(|r| &r.job_id == job_id).collect();
        if matching.len() > 1 {
            tracing::warn!(
                job_id = %job_id,
                rows = matching.len(),
                "duplicate ledger rows, using most recent locked_at"
            );
        }
        Ok(pick_current(matching).cloned())
    }

    async fn insert(&self, record: LockRecord) -> Result<(), StoreError> {
        let _guard = self.write_guard.lock().await;
        let mut rows = self.read_rows().await?;
        if rows.iter().any(|r| r.job_id == record.job_id) {
            return Err(StoreError::DuplicateKey(record.job_id));
        }
        rows.push(record);
        self.write_rows(&rows).await
    }

    async fn update_fields(
        &self,
        job_id: &JobId,
        update: &LockUpdate,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_guard.lock().await;
        let mut rows = self.read_rows().await?;
        let mut touched = false;
        for row in rows.iter_mut().filter(|r| &r.job_id == job_id) {
            row.apply(update);
            touched = true;
        }
        if touched {
            self.write_rows(&rows).await?;
        }
        Ok(touched)
    }

    async fn delete(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let _guard = self.write_guard.lock().await;
        let mut rows = self.read_rows().await?;
        let before = rows.len();
        rows.retain(|r| &r.job_id != job_id);
        if rows.len() == before {
            return Ok(false);
        }
        self.write_rows(&rows).await?;
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<LockRecord>, StoreError> {
        self.read_rows().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::Unavailable(format!(
                "{}: not a directory",
                dir.display()
            ))),
            Err(err) => Err(StoreError::Unavailable(format!("{}: {err}", dir.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LockStatus;
    use chrono::Utc;

    fn record(job: &str, holder: &str) -> LockRecord {
        LockRecord::processing(JobId::new(job), holder, Utc::now(), "first")
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonFileLockLedger::new(dir.path().join("locks.json"));
        assert!(ledger.list_all().await.unwrap().is_empty());
        assert!(ledger.find(&JobId::new("ORD-1")).await.unwrap().is_none());
        ledger.ping().await.unwrap();
    }

    #[tokio::test]
    async fn rows_survive_a_new_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks.json");

        let ledger = JsonFileLockLedger::new(&path);
        ledger.insert(record("ORD-1", "a")).await.unwrap();
        ledger
            .update_fields(
                &JobId::new("ORD-1"),
                &LockUpdate::status(LockStatus::Completed).with_notes("first | done"),
            )
            .await
            .unwrap();

        let other = JsonFileLockLedger::new(&path);
        let found = other.find(&JobId::new("ORD-1")).await.unwrap().unwrap();
        assert_eq!(found.status, LockStatus::Completed);
        assert_eq!(found.notes, "first | done");
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonFileLockLedger::new(dir.path().join("locks.json"));
        ledger.insert(record("ORD-1", "a")).await.unwrap();
        assert!(matches!(
            ledger.insert(record("ORD-1", "b")).await,
            Err(StoreError::DuplicateKey(_))
        ));
    }

    #[tokio::test]
    async fn hand_written_duplicates_resolve_to_latest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks.json");
        let mut older = record("ORD-1", "a");
        older.locked_at = "2026-01-01T00:00:00Z".into();
        let mut newer = record("ORD-1", "b");
        newer.locked_at = "2026-01-01T00:10:00Z".into();
        std::fs::write(&path, serde_json::to_vec(&vec![older, newer]).unwrap()).unwrap();

        let ledger = JsonFileLockLedger::new(&path);
        let found = ledger.find(&JobId::new("ORD-1")).await.unwrap().unwrap();
        assert_eq!(found.locked_by, "b");
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let ledger = JsonFileLockLedger::new(&path);
        assert!(matches!(
            ledger.list_all().await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_directory_fails_ping() {
        let ledger = JsonFileLockLedger::new("/definitely/not/mounted/locks.json");
        assert!(matches!(
            ledger.ping().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn missing_mount_is_unavailable_and_never_created() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("mnt_shared");
        let ledger = JsonFileLockLedger::new(mount.join("locks.json"));

        assert!(matches!(
            ledger.find(&JobId::new("ORD-1")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            ledger.insert(record("ORD-1", "a")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(!mount.exists());
        assert!(ledger.ping().await.is_err());
    }

    #[tokio::test]
    async fn acquire_is_denied_while_the_mount_is_missing() {
        use crate::app::{DenyReason, JobLock, LockDecision};
        use crate::domain::MachineIdentity;
        use crate::ports::SystemClock;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path().join("mnt_shared");
        let lock = JobLock::new(
            Arc::new(JsonFileLockLedger::new(mount.join("locks.json"))),
            MachineIdentity::new("A"),
            Arc::new(SystemClock),
        );

        assert!(matches!(
            lock.acquire(&JobId::new("ORD-1"), "").await,
            LockDecision::Denied(DenyReason::StoreUnavailable(_))
        ));
        assert!(!mount.exists());
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonFileLockLedger::new(dir.path().join("locks.json"));
        ledger.insert(record("ORD-1", "a")).await.unwrap();
        ledger.insert(record("ORD-2", "a")).await.unwrap();

        assert!(ledger.delete(&JobId::new("ORD-1")).await.unwrap());
        assert!(!ledger.delete(&JobId::new("ORD-1")).await.unwrap());
        let rows = ledger.list_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id.as_str(), "ORD-2");
    }
}
