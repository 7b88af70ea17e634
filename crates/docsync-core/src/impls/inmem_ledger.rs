//! InMemoryLockLedger - テスト・開発用の ledger
//!
//! # 障害注入
//! - `set_available(false)`: 以降の呼び出しはすべて `StoreError::Unavailable`
//! - `permitting_duplicates()`: 同じ job_id の insert を拒否しない（スプレッドシート相当）
//! - `with_find_barrier(..)`: find の直後に Barrier で待つ。複数マシンが
//!   「find → insert」の間に割り込み合う状況を決定的に再現できる

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Barrier, Mutex};

use crate::domain::{JobId, LockRecord, LockUpdate, StoreError};
use crate::ports::{LockLedger, pick_current};

#[derive(Default)]
pub struct InMemoryLockLedger {
    rows: Mutex<Vec<LockRecord>>,
    unavailable: AtomicBool,
    permit_duplicates: bool,
    find_barrier: Option<Arc<Barrier>>,
}

impl InMemoryLockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept duplicate-key inserts, like a plain spreadsheet would.
    pub fn permitting_duplicates(mut self) -> Self {
        self.permit_duplicates = true;
        self
    }

    pub fn with_find_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.find_barrier = Some(barrier);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Put a row in place without any checks.
    pub async fn seed(&self, record: LockRecord) {
        self.rows.lock().await.push(record);
    }

    /// Every row, duplicates included.
    pub async fn rows(&self) -> Vec<LockRecord> {
        self.rows.lock().await.clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory ledger marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LockLedger for InMemoryLockLedger {
    async fn find(&self, job_id: &JobId) -> Result<Option<LockRecord>, StoreError> {
        self.check_available()?;
        let found = {
            let rows = self.rows.lock().await;
            pick_current(rows.iter().filter(|r| &r.job_id == job_id)).cloned()
        };
        if let Some(barrier) = &self.find_barrier {
            barrier.wait().await;
        }
        Ok(found)
    }

    async fn insert(&self, record: LockRecord) -> Result<(), StoreError> {
        self.check_available()?;
        let mut rows = self.rows.lock().await;
        if !self.permit_duplicates && rows.iter().any(|r| r.job_id == record.job_id) {
            return Err(StoreError::DuplicateKey(record.job_id));
        }
        rows.push(record);
        Ok(())
    }

    async fn update_fields(
        &self,
        job_id: &JobId,
        update: &LockUpdate,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut rows = self.rows.lock().await;
        let mut touched = false;
        for row in rows.iter_mut().filter(|r| &r.job_id == job_id) {
            row.apply(update);
            touched = true;
        }
        Ok(touched)
    }

    async fn delete(&self, job_id: &JobId) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|r| &r.job_id != job_id);
        Ok(rows.len() != before)
    }

    async fn list_all(&self) -> Result<Vec<LockRecord>, StoreError> {
        self.check_available()?;
        Ok(self.rows.lock().await.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LockStatus;
    use chrono::Utc;

    fn record(job: &str, holder: &str) -> LockRecord {
        LockRecord::processing(JobId::new(job), holder, Utc::now(), "")
    }

    #[tokio::test]
    async fn insert_then_find() {
        let ledger = InMemoryLockLedger::new();
        ledger.insert(record("ORD-1", "a")).await.unwrap();

        let found = ledger.find(&JobId::new("ORD-1")).await.unwrap().unwrap();
        assert_eq!(found.locked_by, "a");
        assert!(ledger.find(&JobId::new("ORD-2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected_by_default() {
        let ledger = InMemoryLockLedger::new();
        ledger.insert(record("ORD-1", "a")).await.unwrap();
        let err = ledger.insert(record("ORD-1", "b")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(id) if id.as_str() == "ORD-1"));
    }

    #[tokio::test]
    async fn duplicate_insert_is_kept_when_permitted() {
        let ledger = InMemoryLockLedger::new().permitting_duplicates();
        ledger.insert(record("ORD-1", "a")).await.unwrap();
        ledger.insert(record("ORD-1", "b")).await.unwrap();
        assert_eq!(ledger.rows().await.len(), 2);

        let updated = ledger
            .update_fields(&JobId::new("ORD-1"), &LockUpdate::status(LockStatus::Completed))
            .await
            .unwrap();
        assert!(updated);
        assert!(
            ledger
                .rows()
                .await
                .iter()
                .all(|r| r.status == LockStatus::Completed)
        );

        assert!(ledger.delete(&JobId::new("ORD-1")).await.unwrap());
        assert!(ledger.rows().await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_ledger_fails_every_call() {
        let ledger = InMemoryLockLedger::new();
        ledger.set_available(false);

        assert!(matches!(
            ledger.find(&JobId::new("x")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(ledger.insert(record("x", "a")).await.is_err());
        assert!(ledger.list_all().await.is_err());
        assert!(ledger.ping().await.is_err());

        ledger.set_available(true);
        assert!(ledger.ping().await.is_ok());
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_rows() {
        let ledger = InMemoryLockLedger::new();
        let id = JobId::new("nope");
        assert!(!ledger.update_fields(&id, &LockUpdate::default()).await.unwrap());
        assert!(!ledger.delete(&id).await.unwrap());
    }
}
