//! LockLedger port - 共有 ledger（スプレッドシート、共有ファイルなど）への CRUD
//!
//! 純粋なデータアクセス層で、ポリシーは持たない。
//!
//! # 前提
//! - 各呼び出しはネットワーク往復で、クライアント間の分離はない
//! - compare-and-swap はない（find → insert/update の間に他マシンが割り込める）
//! - 到達不能なら必ず `StoreError::Unavailable` を返す（古いデータで代用しない）
//!
//! 割り込みへの対処は `app::lock_protocol` の仕事。

use async_trait::async_trait;

use crate::domain::{JobId, LockRecord, LockUpdate, StoreError};

#[async_trait]
pub trait LockLedger: Send + Sync {
    /// Look up the record for `job_id`.
    ///
    /// When a race left several rows with the same key, implementations return
    /// the row with the most recent parsable `locked_at` (see [`pick_current`]).
    async fn find(&self, job_id: &JobId) -> Result<Option<LockRecord>, StoreError>;

    /// Append a new row. The caller has already checked absence.
    async fn insert(&self, record: LockRecord) -> Result<(), StoreError>;

    /// Blind partial update. Returns `false` if no row has the key.
    async fn update_fields(&self, job_id: &JobId, update: &LockUpdate)
    -> Result<bool, StoreError>;

    /// Remove every row with the key. Returns `false` if none existed.
    async fn delete(&self, job_id: &JobId) -> Result<bool, StoreError>;

    /// Full scan in insertion order.
    async fn list_all(&self) -> Result<Vec<LockRecord>, StoreError>;

    /// Cheap reachability check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Choose the row `find` reports among rows sharing one key.
///
/// Most recent parsable `locked_at` wins; parsable beats unparsable; remaining
/// ties go to the earliest row.
pub fn pick_current<'a, I>(rows: I) -> Option<&'a LockRecord>
where
    I: IntoIterator<Item = &'a LockRecord>,
{
    let mut best: Option<&LockRecord> = None;
    for row in rows {
        best = match best {
            None => Some(row),
            Some(current) => match (current.locked_at_time(), row.locked_at_time()) {
                (Some(a), Some(b)) if b > a => Some(row),
                (None, Some(_)) => Some(row),
                _ => Some(current),
            },
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(holder: &str, locked_at: &str) -> LockRecord {
        let mut r = LockRecord::processing(
            JobId::new("ORD-1"),
            holder,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            "",
        );
        r.locked_at = locked_at.to_string();
        r
    }

    #[test]
    fn most_recent_locked_at_wins() {
        let rows = vec![
            row("a", "2026-01-01T00:00:00Z"),
            row("b", "2026-01-01T00:00:05Z"),
            row("c", "2026-01-01T00:00:01Z"),
        ];
        assert_eq!(pick_current(&rows).unwrap().locked_by, "b");
    }

    #[test]
    fn parsable_beats_unparsable() {
        let rows = vec![row("a", "garbage"), row("b", "2026-01-01T00:00:00Z")];
        assert_eq!(pick_current(&rows).unwrap().locked_by, "b");
    }

    #[test]
    fn ties_go_to_first_row() {
        let rows = vec![
            row("a", "2026-01-01T00:00:00Z"),
            row("b", "2026-01-01T00:00:00Z"),
        ];
        assert_eq!(pick_current(&rows).unwrap().locked_by, "a");

        let rows = vec![row("a", "x"), row("b", "y")];
        assert_eq!(pick_current(&rows).unwrap().locked_by, "a");
    }

    #[test]
    fn empty_has_no_current() {
        assert!(pick_current(&Vec::<LockRecord>::new()).is_none());
    }
}
