//! JobLock - 非アトミックな共有 ledger の上で動く job 単位のロック
//!
//! # アルゴリズム（read → decide → write）
//! 1. `find(job_id)`
//! 2. 行なし → PROCESSING を insert して取得成功
//! 3. COMPLETED → 拒否（終端）
//! 4. PROCESSING → `lock_timeout` 未満なら拒否、以上（または locked_at が読めない）なら奪取
//! 5. FAILED → PROCESSING に上書きして取得成功（`failed_cooldown` があれば待つ）
//!
//! ledger に届かないときは常に拒否（fail closed）。find と write の間に
//! 他マシンが割り込む余地は残る。ledger が compare-and-swap を持たない以上、
//! ここで塞ぐ手段はない。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::lock::append_notes;
use crate::domain::{
    JobId, LockRecord, LockStatus, LockUpdate, MachineIdentity, StoreError,
};
use crate::ports::{Clock, LockLedger};

/// Default age after which a PROCESSING lock is considered abandoned.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Why `acquire` said no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Ledger row is COMPLETED.
    Completed,
    /// Another holder is within the timeout window.
    HeldElsewhere { holder: String },
    /// FAILED record younger than the configured cooldown.
    CoolingDown,
    /// Another machine inserted the same key between our find and insert.
    LostInsertRace,
    /// Ledger unreachable or unreadable.
    StoreUnavailable(String),
}

/// How a granted lock was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantKind {
    /// No row existed.
    Fresh,
    /// Took over a PROCESSING lock past its timeout.
    TimeoutRecovered,
    /// Took over a FAILED record.
    RetryAfterFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    Granted(GrantKind),
    Denied(DenyReason),
}

impl LockDecision {
    pub fn granted(&self) -> bool {
        matches!(self, LockDecision::Granted(_))
    }
}

pub struct JobLock {
    ledger: Arc<dyn LockLedger>,
    machine: MachineIdentity,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    failed_cooldown: Option<Duration>,
}

impl JobLock {
    pub fn new(
        ledger: Arc<dyn LockLedger>,
        machine: MachineIdentity,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            machine,
            clock,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            failed_cooldown: None,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_failed_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.failed_cooldown = cooldown;
        self
    }

    pub fn machine(&self) -> &MachineIdentity {
        &self.machine
    }

    pub fn ledger(&self) -> &Arc<dyn LockLedger> {
        &self.ledger
    }

    /// Try to become the processing holder of `job_id`.
    pub async fn acquire(&self, job_id: &JobId, notes: &str) -> LockDecision {
        match self.try_acquire(job_id, notes).await {
            Ok(decision) => {
                match &decision {
                    LockDecision::Granted(GrantKind::TimeoutRecovered) => tracing::warn!(
                        job_id = %job_id,
                        machine_id = %self.machine,
                        "took over abandoned lock (TimeoutRecovered)"
                    ),
                    LockDecision::Granted(kind) => tracing::debug!(
                        job_id = %job_id,
                        machine_id = %self.machine,
                        ?kind,
                        "lock acquired"
                    ),
                    LockDecision::Denied(reason) => tracing::debug!(
                        job_id = %job_id,
                        ?reason,
                        "lock denied"
                    ),
                }
                decision
            }
            Err(StoreError::DuplicateKey(_)) => {
                tracing::info!(job_id = %job_id, "another machine inserted the lock first");
                LockDecision::Denied(DenyReason::LostInsertRace)
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "lock store failure, denying");
                LockDecision::Denied(DenyReason::StoreUnavailable(err.to_string()))
            }
        }
    }

    async fn try_acquire(&self, job_id: &JobId, notes: &str) -> Result<LockDecision, StoreError> {
        let now = self.clock.now();
        let holder = self.machine.as_str();

        let Some(record) = self.ledger.find(job_id).await? else {
            let record = LockRecord::processing(job_id.clone(), holder, now, notes);
            self.ledger.insert(record).await?;
            return Ok(LockDecision::Granted(GrantKind::Fresh));
        };

        let kind = match record.status {
            LockStatus::Completed => return Ok(LockDecision::Denied(DenyReason::Completed)),
            LockStatus::Processing => {
                if let Some(elapsed) = record.elapsed(now)
                    && !past(elapsed, self.lock_timeout)
                {
                    return Ok(LockDecision::Denied(DenyReason::HeldElsewhere {
                        holder: record.locked_by,
                    }));
                }
                GrantKind::TimeoutRecovered
            }
            LockStatus::Failed => {
                if let Some(cooldown) = self.failed_cooldown
                    && let Some(elapsed) = record.elapsed(now)
                    && !past(elapsed, cooldown)
                {
                    return Ok(LockDecision::Denied(DenyReason::CoolingDown));
                }
                GrantKind::RetryAfterFailure
            }
        };

        let mut update = LockUpdate::take_over(holder, now);
        if !notes.is_empty() {
            update = update.with_notes(append_notes(&record.notes, notes));
        }
        // 行が消えていたら（並行 delete）取れなかった扱い
        if !self.ledger.update_fields(job_id, &update).await? {
            return Ok(LockDecision::Denied(DenyReason::StoreUnavailable(format!(
                "lock row for {job_id} vanished during takeover"
            ))));
        }
        Ok(LockDecision::Granted(kind))
    }

    /// Operator override: become the holder whatever the ledger says.
    ///
    /// Used by force mode so that the final `release` has a row to update.
    /// Returns `false` (logged) if the ledger could not be written.
    pub async fn seize(&self, job_id: &JobId, notes: &str) -> bool {
        let now = self.clock.now();
        let holder = self.machine.as_str();
        let result: Result<bool, StoreError> = async {
            match self.ledger.find(job_id).await? {
                None => {
                    let record = LockRecord::processing(job_id.clone(), holder, now, notes);
                    self.ledger.insert(record).await.map(|_| true)
                }
                Some(record) => {
                    let update = LockUpdate::take_over(holder, now)
                        .with_notes(append_notes(&record.notes, notes));
                    self.ledger.update_fields(job_id, &update).await
                }
            }
        }
        .await;
        match result {
            Ok(written) => {
                tracing::warn!(job_id = %job_id, machine_id = %self.machine, "lock seized (force mode)");
                written
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "force mode could not write lock");
                false
            }
        }
    }

    /// Finalize a job. Never fails; problems are logged and reported as `false`.
    pub async fn release(&self, job_id: &JobId, status: LockStatus, notes: &str) -> bool {
        match self.try_release(job_id, status, notes).await {
            Ok(true) => {
                tracing::debug!(job_id = %job_id, %status, "lock released");
                true
            }
            Ok(false) => {
                tracing::warn!(job_id = %job_id, %status, "release: no lock record found");
                false
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, %status, error = %err, "release failed");
                false
            }
        }
    }

    async fn try_release(
        &self,
        job_id: &JobId,
        status: LockStatus,
        notes: &str,
    ) -> Result<bool, StoreError> {
        let Some(record) = self.ledger.find(job_id).await? else {
            return Ok(false);
        };
        let mut update = LockUpdate::status(status);
        if !notes.is_empty() {
            update = update.with_notes(append_notes(&record.notes, notes));
        }
        self.ledger.update_fields(job_id, &update).await
    }

    /// Record `job_id` as COMPLETED whether or not a row exists yet.
    ///
    /// Used for bookkeeping-only ledgers (uploads) where no PROCESSING phase
    /// was taken. Failures are logged and reported as `false`.
    pub async fn mark_completed(&self, job_id: &JobId, notes: &str) -> bool {
        let now = self.clock.now();
        let result: Result<bool, StoreError> = async {
            match self.ledger.find(job_id).await? {
                None => {
                    let mut record =
                        LockRecord::processing(job_id.clone(), self.machine.as_str(), now, notes);
                    record.status = LockStatus::Completed;
                    self.ledger.insert(record).await.map(|_| true)
                }
                Some(record) => {
                    let update = LockUpdate::status(LockStatus::Completed)
                        .with_notes(append_notes(&record.notes, notes));
                    self.ledger.update_fields(job_id, &update).await
                }
            }
        }
        .await;
        result.unwrap_or_else(|err| {
            tracing::warn!(job_id = %job_id, error = %err, "could not mark completed");
            false
        })
    }

    /// Current ledger record for `job_id`.
    pub async fn status(&self, job_id: &JobId) -> Result<Option<LockRecord>, StoreError> {
        self.ledger.find(job_id).await
    }
}

fn past(elapsed: chrono::Duration, limit: Duration) -> bool {
    // 時計のずれで elapsed が負になることがある（その場合は「まだ」）
    match elapsed.to_std() {
        Ok(elapsed) => elapsed >= limit,
        Err(_) => false,
    }
}
