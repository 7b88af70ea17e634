//! Status - ダッシュボード/CLI に渡す状態
//!
//! scheduler と upload coordinator が書き込み、読み手は `snapshot()` で
//! plain data のコピーを受け取る。ロックは短時間しか持たない
//! （await をまたがない）ので std の Mutex/RwLock を使う。

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Active,
    Running,
    Stopped,
}

/// Counts of one harvest cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Jobs harvested in this cycle.
    pub new: usize,
    /// Skipped by the local history.
    pub skipped: usize,
    /// Refused by the lock ledger.
    pub denied: usize,
    pub failed: usize,
}

impl CycleReport {
    pub fn found_new(&self) -> bool {
        self.new > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub empty_cycle_count: u32,
    pub current_interval_secs: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadStatus {
    pub running: bool,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_uploaded: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub machine_id: String,
    pub scheduler: SchedulerStatus,
    pub uploads: BTreeMap<Category, UploadStatus>,
}

#[derive(Debug, Default)]
struct Inner {
    machine_id: String,
    scheduler: SchedulerStatus,
    uploads: BTreeMap<Category, UploadStatus>,
}

/// Owned status state behind a cheap clonable handle.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<Inner>>,
}

impl StatusBoard {
    pub fn new(machine_id: impl Into<String>) -> Self {
        let board = Self::default();
        board.write(|inner| inner.machine_id = machine_id.into());
        board
    }

    fn write<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&inner)
    }

    pub fn update_scheduler(&self, f: impl FnOnce(&mut SchedulerStatus)) {
        self.write(|inner| f(&mut inner.scheduler));
    }

    pub fn update_upload(&self, category: &Category, f: impl FnOnce(&mut UploadStatus)) {
        self.write(|inner| f(inner.uploads.entry(category.clone()).or_default()));
    }

    pub fn scheduler(&self) -> SchedulerStatus {
        self.read(|inner| inner.scheduler.clone())
    }

    pub fn upload(&self, category: &Category) -> UploadStatus {
        self.read(|inner| inner.uploads.get(category).cloned().unwrap_or_default())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.read(|inner| StatusSnapshot {
            machine_id: inner.machine_id.clone(),
            scheduler: inner.scheduler.clone(),
            uploads: inner.uploads.clone(),
        })
    }
}
