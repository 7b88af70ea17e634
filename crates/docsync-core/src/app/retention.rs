//! Retention - ledger の掃除と運用者向け操作
//!
//! ledger の行は自動では消えない。ここにある操作はすべて運用者（CLI）が
//! 明示的に呼ぶもの。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::{JobId, LockRecord, StoreError};
use crate::ports::{Clock, LockLedger};

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct Retention {
    ledger: Arc<dyn LockLedger>,
    clock: Arc<dyn Clock>,
}

impl Retention {
    pub fn new(ledger: Arc<dyn LockLedger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Delete COMPLETED/FAILED records locked before `now - max_age`.
    ///
    /// PROCESSING rows and rows whose `locked_at` does not parse are kept.
    /// Returns the number of job ids removed.
    pub async fn sweep_older_than(&self, max_age: Duration) -> Result<usize, StoreError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| StoreError::Corrupt(format!("max age out of range: {e}")))?;
        let cutoff = self.clock.now() - max_age;
        let doomed = self
            .select(|r| r.status.is_settled() && r.locked_at_time().is_some_and(|at| at < cutoff))
            .await?;
        self.delete_all(&doomed).await?;
        tracing::info!(removed = doomed.len(), %cutoff, "swept old lock records");
        Ok(doomed.len())
    }

    /// Delete every record locked on `date` (UTC calendar day).
    pub async fn clear_date(&self, date: NaiveDate) -> Result<usize, StoreError> {
        let doomed = self
            .select(|r| r.locked_at_time().is_some_and(|at| at.date_naive() == date))
            .await?;
        self.delete_all(&doomed).await?;
        tracing::info!(removed = doomed.len(), %date, "cleared lock records for date");
        Ok(doomed.len())
    }

    /// Remove one record so the job can be harvested again.
    pub async fn delete(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let removed = self.ledger.delete(job_id).await?;
        if removed {
            tracing::info!(job_id = %job_id, "lock record deleted");
        }
        Ok(removed)
    }

    /// Newest first by `locked_at`; unparsable timestamps sort last.
    pub async fn recent(&self, limit: usize) -> Result<Vec<LockRecord>, StoreError> {
        let mut records = self.ledger.list_all().await?;
        records.sort_by_key(|r| std::cmp::Reverse(r.locked_at_time().unwrap_or(DateTime::<Utc>::MIN_UTC)));
        records.truncate(limit);
        Ok(records)
    }

    async fn select(
        &self,
        pred: impl Fn(&LockRecord) -> bool,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut ids: Vec<JobId> = self
            .ledger
            .list_all()
            .await?
            .into_iter()
            .filter(|r| pred(r))
            .map(|r| r.job_id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn delete_all(&self, ids: &[JobId]) -> Result<(), StoreError> {
        for id in ids {
            self.ledger.delete(id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LockStatus;
    use crate::impls::InMemoryLockLedger;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, h, 0, 0).unwrap()
    }

    fn record(id: &str, at: DateTime<Utc>, status: LockStatus) -> LockRecord {
        let mut record = LockRecord::processing(JobId::new(id), "m1", at, "");
        record.status = status;
        record
    }

    async fn fixture() -> (Arc<InMemoryLockLedger>, Retention) {
        let ledger = Arc::new(InMemoryLockLedger::new());
        ledger.seed(record("OLD-DONE", day(1, 9), LockStatus::Completed)).await;
        ledger.seed(record("OLD-FAILED", day(2, 9), LockStatus::Failed)).await;
        ledger.seed(record("OLD-RUNNING", day(2, 10), LockStatus::Processing)).await;
        ledger.seed(record("NEW-DONE", day(14, 9), LockStatus::Completed)).await;
        let mut garbled = record("GARBLED", day(1, 9), LockStatus::Completed);
        garbled.locked_at = "n/a".into();
        ledger.seed(garbled).await;

        let clock = Arc::new(FixedClock::new(day(15, 12)));
        let retention = Retention::new(ledger.clone(), clock);
        (ledger, retention)
    }

    async fn remaining(ledger: &InMemoryLockLedger) -> Vec<String> {
        ledger
            .rows()
            .await
            .into_iter()
            .map(|r| r.job_id.as_str().to_string())
            .collect()
    }

    #[tokio::test]
    async fn sweep_removes_only_old_settled_records() {
        let (ledger, retention) = fixture().await;
        let removed = retention.sweep_older_than(DEFAULT_MAX_AGE).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            remaining(&ledger).await,
            vec!["OLD-RUNNING", "NEW-DONE", "GARBLED"]
        );
    }

    #[tokio::test]
    async fn clear_date_removes_that_day_regardless_of_status() {
        let (ledger, retention) = fixture().await;
        let date = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert_eq!(retention.clear_date(date).await.unwrap(), 2);
        assert_eq!(
            remaining(&ledger).await,
            vec!["OLD-DONE", "NEW-DONE", "GARBLED"]
        );
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let (_, retention) = fixture().await;
        let ids: Vec<_> = retention
            .recent(3)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.job_id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["NEW-DONE", "OLD-RUNNING", "OLD-FAILED"]);
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let (_, retention) = fixture().await;
        assert!(retention.delete(&JobId::new("NEW-DONE")).await.unwrap());
        assert!(!retention.delete(&JobId::new("NEW-DONE")).await.unwrap());
    }
}
