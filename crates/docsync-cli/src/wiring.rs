//! 設定から各コンポーネントを組み立てる

use std::sync::Arc;

use docsync_core::SyncConfig;
use docsync_core::app::{
    HarvestCycle, JobLock, LocalHistoryStore, Retention, SharedHistory, StatusBoard,
    UploadCoordinator,
};
use docsync_core::domain::MachineIdentity;
use docsync_core::impls::{
    DirectoryDocumentSource, FsOutputStore, JsonFileLockLedger, JsonlTargetSystem,
    PlainTextTransformer,
};
use docsync_core::ports::{Clock, LockLedger, SystemClock};

pub struct Wiring {
    pub config: SyncConfig,
    pub machine: MachineIdentity,
    pub clock: Arc<dyn Clock>,
    pub ledger: Arc<dyn LockLedger>,
    pub upload_ledger: Arc<dyn LockLedger>,
    pub outputs: Arc<FsOutputStore>,
    pub harvest_history: SharedHistory,
    pub upload_history: SharedHistory,
    pub board: StatusBoard,
}

impl Wiring {
    pub fn new(config: SyncConfig) -> Self {
        let machine = config.machine_identity();
        let legacy = config.legacy_category();
        Self {
            machine: machine.clone(),
            clock: Arc::new(SystemClock),
            ledger: Arc::new(JsonFileLockLedger::new(&config.ledger_file)),
            upload_ledger: Arc::new(JsonFileLockLedger::new(&config.upload_ledger_file)),
            outputs: Arc::new(FsOutputStore::new(&config.downloads_dir)),
            harvest_history: LocalHistoryStore::new(&config.history_file, legacy.clone()).shared(),
            upload_history: LocalHistoryStore::new(&config.upload_history_file, legacy).shared(),
            board: StatusBoard::new(machine.as_str()),
            config,
        }
    }

    /// Create the machine-local directories. The shared ledger location is
    /// left alone; a missing mount must show up as an unreachable ledger.
    pub async fn prepare_local_dirs(&self) -> std::io::Result<()> {
        let files = [&self.config.history_file, &self.config.upload_history_file];
        for parent in files.iter().filter_map(|f| f.parent()) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        for dir in [&self.config.downloads_dir, &self.config.inbox_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    fn job_lock(&self, ledger: &Arc<dyn LockLedger>) -> Arc<JobLock> {
        Arc::new(
            JobLock::new(Arc::clone(ledger), self.machine.clone(), Arc::clone(&self.clock))
                .with_lock_timeout(self.config.lock_timeout)
                .with_failed_cooldown(self.config.failed_cooldown),
        )
    }

    pub fn harvest_cycle(&self) -> HarvestCycle {
        let lock = self
            .config
            .enable_distributed_lock
            .then(|| self.job_lock(&self.ledger));
        HarvestCycle::new(
            self.config.categories.clone(),
            Arc::new(DirectoryDocumentSource::new(&self.config.inbox_dir)),
            Arc::new(PlainTextTransformer),
            self.outputs.clone(),
            self.harvest_history.clone(),
            lock,
            self.machine.clone(),
        )
        .with_clock(Arc::clone(&self.clock))
    }

    pub fn upload_coordinator(&self) -> UploadCoordinator {
        let coordinator = UploadCoordinator::new(
            self.config.category_names(),
            self.outputs.clone(),
            Arc::new(JsonlTargetSystem::new(&self.config.target_dir)),
            self.upload_history.clone(),
            self.board.clone(),
        )
        .with_retry(self.config.retry_policy())
        .with_clock(Arc::clone(&self.clock));
        if self.config.enable_distributed_lock {
            coordinator.with_ledger(self.job_lock(&self.upload_ledger))
        } else {
            coordinator
        }
    }

    pub fn retention(&self, upload: bool) -> Retention {
        let ledger = if upload {
            &self.upload_ledger
        } else {
            &self.ledger
        };
        Retention::new(Arc::clone(ledger), Arc::clone(&self.clock))
    }
}
