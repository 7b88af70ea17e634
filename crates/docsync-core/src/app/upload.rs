//! UploadCoordinator - カテゴリ単位の排他つきアップロード
//!
//! # 1 バッチの流れ
//! 1. カテゴリの gate を `try_lock`（使用中なら即 `AlreadyRunning`）
//! 2. 保存済み output のうち upload history にないものを集める
//! 3. upload ledger を見て、他マシンが COMPLETED にしたものは除く
//!    （ledger に届かない job も除く = fail closed）
//! 4. 残りの行をまとめて 1 回 `submit`（失敗したら 2s, 4s, ... で再試行）
//! 5. 成功したら全 id を history に記録して 1 回だけ persist、
//!    ledger に COMPLETED を書く（best effort）
//!
//! 再試行が尽きたらバッチ全体が失敗。history には何も書かない。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::app::history::SharedHistory;
use crate::app::lock_protocol::JobLock;
use crate::app::retry::RetryPolicy;
use crate::app::status::StatusBoard;
use crate::domain::{BatchId, Category, JobId, JobOutput, LockStatus, Row, UploadError};
use crate::ports::{Clock, OutputStore, SystemClock, TargetSystem};

/// What one successful batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Jobs newly recorded as uploaded (zero-row jobs included).
    pub uploaded: usize,
    pub rows: usize,
    /// Skipped because the upload ledger already had them as completed,
    /// or could not be read.
    pub skipped_remote: usize,
    /// Submit calls made (0 when nothing had rows).
    pub attempts: u32,
}

pub struct UploadCoordinator {
    categories: BTreeSet<Category>,
    outputs: Arc<dyn OutputStore>,
    target: Arc<dyn TargetSystem>,
    history: SharedHistory,
    ledger: Option<Arc<JobLock>>,
    retry: RetryPolicy,
    board: StatusBoard,
    clock: Arc<dyn Clock>,
    gates: Mutex<HashMap<Category, Arc<AsyncMutex<()>>>>,
}

impl UploadCoordinator {
    pub fn new(
        categories: impl IntoIterator<Item = Category>,
        outputs: Arc<dyn OutputStore>,
        target: Arc<dyn TargetSystem>,
        history: SharedHistory,
        board: StatusBoard,
    ) -> Self {
        Self {
            categories: categories.into_iter().collect(),
            outputs,
            target,
            history,
            ledger: None,
            retry: RetryPolicy::default(),
            board,
            clock: Arc::new(SystemClock),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Double-check and mark uploads in a shared ledger.
    pub fn with_ledger(mut self, ledger: Arc<JobLock>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn gate(&self, category: &Category) -> Result<OwnedMutexGuard<()>, UploadError> {
        if !self.categories.contains(category) {
            return Err(UploadError::UnknownCategory(category.clone()));
        }
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(gates.entry(category.clone()).or_default())
        };
        gate.try_lock_owned()
            .map_err(|_| UploadError::AlreadyRunning(category.clone()))
    }

    /// Start a batch in the background.
    ///
    /// The gate is taken before returning, so a second call for the same
    /// category fails right here with `AlreadyRunning`.
    pub fn trigger(
        self: &Arc<Self>,
        category: &Category,
    ) -> Result<JoinHandle<Result<UploadSummary, UploadError>>, UploadError> {
        let guard = self.gate(category)?;
        let this = Arc::clone(self);
        let category = category.clone();
        Ok(tokio::spawn(async move {
            let result = this.run_gated(&category).await;
            drop(guard);
            result
        }))
    }

    /// Run a batch inline.
    pub async fn run(&self, category: &Category) -> Result<UploadSummary, UploadError> {
        let _guard = self.gate(category)?;
        self.run_gated(category).await
    }

    async fn run_gated(&self, category: &Category) -> Result<UploadSummary, UploadError> {
        let batch_id = BatchId::generate();
        tracing::info!(%batch_id, category = %category, "upload batch starting");
        self.board.update_upload(category, |u| u.running = true);

        let result = self.execute(category).await;

        self.board.update_upload(category, |u| {
            u.running = false;
            u.last_finished_at = Some(self.clock.now());
            match &result {
                Ok(summary) => {
                    u.last_uploaded = summary.uploaded;
                    u.last_error = None;
                }
                Err(err) => u.last_error = Some(err.to_string()),
            }
        });
        match &result {
            Ok(summary) => tracing::info!(
                %batch_id,
                category = %category,
                uploaded = summary.uploaded,
                rows = summary.rows,
                skipped_remote = summary.skipped_remote,
                "upload batch finished"
            ),
            Err(err) => tracing::error!(%batch_id, category = %category, error = %err, "upload batch failed"),
        }
        result
    }

    async fn execute(&self, category: &Category) -> Result<UploadSummary, UploadError> {
        let outputs = self.outputs.list(category).await?;
        let pending: Vec<JobOutput> = {
            let mut history = self.history.lock().await;
            history.load().await?;
            outputs
                .into_iter()
                .filter(|o| !history.contains(category, &o.job_id))
                .collect()
        };

        let mut summary = UploadSummary::default();
        let mut batch = Vec::with_capacity(pending.len());
        for output in pending {
            if self.completed_elsewhere(&output.job_id).await {
                summary.skipped_remote += 1;
            } else {
                batch.push(output);
            }
        }
        if batch.is_empty() {
            tracing::debug!(category = %category, "nothing to upload");
            return Ok(summary);
        }

        let rows: Vec<Row> = batch.iter().flat_map(|o| o.rows.iter().cloned()).collect();
        if !rows.is_empty() {
            let target = &self.target;
            let rows = &rows;
            summary.attempts = self
                .retry
                .run(|attempt| async move {
                    tracing::debug!(category = %category, attempt, rows = rows.len(), "submitting");
                    target.submit(rows, category).await.map(|_| attempt)
                })
                .await
                .map_err(|exhausted| UploadError::RetriesExhausted {
                    category: category.clone(),
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error,
                })?;
        }
        summary.rows = rows.len();

        {
            let mut history = self.history.lock().await;
            for output in &batch {
                history.record_completed(category, &output.job_id);
            }
            history.persist().await?;
        }
        summary.uploaded = batch.len();

        if let Some(ledger) = &self.ledger {
            for output in &batch {
                ledger
                    .mark_completed(&output.job_id, &format!("uploaded {category}"))
                    .await;
            }
        }
        Ok(summary)
    }

    async fn completed_elsewhere(&self, job_id: &JobId) -> bool {
        let Some(ledger) = &self.ledger else {
            return false;
        };
        match ledger.status(job_id).await {
            Ok(Some(record)) => record.status == LockStatus::Completed,
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "upload ledger unreachable, holding job back");
                true
            }
        }
    }
}
