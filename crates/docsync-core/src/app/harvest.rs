//! HarvestCycle - 1 サイクル分の取り込み
//!
//! # フロー（job ごと）
//! 1. local history にあればスキップ（ledger に触らない）
//! 2. `JobLock::acquire` が拒否したらスキップ
//! 3. fetch → transform → output 保存 → history 記録 → `release(COMPLETED)`
//! 4. 途中のエラーは `release(FAILED, 理由)` してその job だけ諦める
//!
//! サイクル開始時に ledger の ping と history の読み込みを行い、
//! どちらかが失敗したらサイクル自体を中止する。

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::app::history::SharedHistory;
use crate::app::lock_protocol::JobLock;
use crate::app::status::CycleReport;
use crate::domain::{
    Category, CycleError, CycleId, JobDescriptor, JobOutput, LockStatus, MachineIdentity,
};
use crate::ports::{Clock, DocumentSource, DocumentTransformer, OutputStore, SystemClock};

/// Source pages to enumerate for one category, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPages {
    pub category: Category,
    pub pages: Vec<String>,
}

impl CategoryPages {
    pub fn new(category: impl Into<Category>, pages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            category: category.into(),
            pages: pages.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Normal,
    /// Bypass the history short-circuit and lock acquisition.
    Force,
}

enum JobOutcome {
    Harvested,
    Skipped,
    Denied,
    Failed,
}

pub struct HarvestCycle {
    categories: Vec<CategoryPages>,
    source: Arc<dyn DocumentSource>,
    transformer: Arc<dyn DocumentTransformer>,
    outputs: Arc<dyn OutputStore>,
    history: SharedHistory,
    /// `None` when the distributed lock is disabled (single machine).
    lock: Option<Arc<JobLock>>,
    machine: MachineIdentity,
    clock: Arc<dyn Clock>,
    running: Mutex<()>,
}

impl HarvestCycle {
    pub fn new(
        categories: Vec<CategoryPages>,
        source: Arc<dyn DocumentSource>,
        transformer: Arc<dyn DocumentTransformer>,
        outputs: Arc<dyn OutputStore>,
        history: SharedHistory,
        lock: Option<Arc<JobLock>>,
        machine: MachineIdentity,
    ) -> Self {
        Self {
            categories,
            source,
            transformer,
            outputs,
            history,
            lock,
            machine,
            clock: Arc::new(SystemClock),
            running: Mutex::new(()),
        }
    }

    /// Stamp `harvested_at` from `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one cycle now. A concurrent call gets `CycleError::Busy`.
    pub async fn run_once(&self, mode: RunMode) -> Result<CycleReport, CycleError> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(CycleError::Busy);
        };
        let cycle_id = CycleId::generate();
        tracing::info!(%cycle_id, ?mode, "harvest cycle starting");

        self.start_up().await?;

        let mut report = CycleReport::default();
        for entry in &self.categories {
            for page in &entry.pages {
                let jobs = match self.source.list_jobs(&entry.category, page).await {
                    Ok(jobs) => jobs,
                    Err(err) => {
                        tracing::error!(
                            %cycle_id,
                            category = %entry.category,
                            page = %page,
                            error = %err,
                            "listing failed, skipping page"
                        );
                        continue;
                    }
                };
                tracing::debug!(category = %entry.category, page = %page, found = jobs.len(), "listed jobs");
                for job in &jobs {
                    match self.process(job, mode).await {
                        JobOutcome::Harvested => report.new += 1,
                        JobOutcome::Skipped => report.skipped += 1,
                        JobOutcome::Denied => report.denied += 1,
                        JobOutcome::Failed => report.failed += 1,
                    }
                }
            }
        }

        tracing::info!(
            %cycle_id,
            new = report.new,
            skipped = report.skipped,
            denied = report.denied,
            failed = report.failed,
            "harvest cycle finished"
        );
        Ok(report)
    }

    async fn start_up(&self) -> Result<(), CycleError> {
        if let Some(lock) = &self.lock {
            lock.ledger().ping().await?;
        }
        self.history.lock().await.load().await?;
        Ok(())
    }

    async fn process(&self, job: &JobDescriptor, mode: RunMode) -> JobOutcome {
        let job_id = &job.job_id;
        match mode {
            RunMode::Normal => {
                if self.history.lock().await.contains(&job.category, job_id) {
                    tracing::debug!(job_id = %job_id, "already in local history");
                    return JobOutcome::Skipped;
                }
                if let Some(lock) = &self.lock {
                    let notes = format!("harvest {}", job.category);
                    if !lock.acquire(job_id, &notes).await.granted() {
                        return JobOutcome::Denied;
                    }
                }
            }
            RunMode::Force => {
                tracing::info!(job_id = %job_id, "force mode: bypassing history and lock checks");
                if let Some(lock) = &self.lock {
                    lock.seize(job_id, &format!("force harvest {}", job.category))
                        .await;
                }
            }
        }

        match self.harvest(job).await {
            Ok(rows) => {
                if let Some(lock) = &self.lock {
                    lock.release(job_id, LockStatus::Completed, &format!("{rows} rows"))
                        .await;
                }
                tracing::info!(job_id = %job_id, category = %job.category, rows, "harvested");
                JobOutcome::Harvested
            }
            Err(reason) => {
                tracing::error!(job_id = %job_id, category = %job.category, error = %reason, "harvest failed");
                if let Some(lock) = &self.lock {
                    lock.release(job_id, LockStatus::Failed, &truncate(&reason, 200))
                        .await;
                }
                JobOutcome::Failed
            }
        }
    }

    /// fetch → transform → save → record. Returns the row count.
    async fn harvest(&self, job: &JobDescriptor) -> Result<usize, String> {
        let raw = self.source.fetch(job).await.map_err(|e| e.to_string())?;
        let rows = self
            .transformer
            .transform(&job.category, &raw)
            .map_err(|e| e.to_string())?;
        let count = rows.len();

        let output = JobOutput {
            job_id: job.job_id.clone(),
            category: job.category.clone(),
            rows,
            harvested_at: self.clock.now(),
            harvested_by: self.machine.to_string(),
        };
        self.outputs.save(&output).await.map_err(|e| e.to_string())?;

        self.history
            .lock()
            .await
            .commit_completed(&job.category, &job.job_id)
            .await
            .map_err(|e| format!("history persist: {e}"))?;
        Ok(count)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
