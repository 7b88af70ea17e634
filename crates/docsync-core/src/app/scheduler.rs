//! Scheduler - harvest サイクルを回すバックグラウンドタスク
//!
//! # 状態
//! - **Idle**: 何もしない。コマンドを待つだけ
//! - **Active**: サイクル実行 → `current_interval` 待つ → 繰り返し
//!
//! コマンド（activate / deactivate / shutdown）は `watch` チャネルで届き、
//! 待機中の sleep は `select!` で即座に中断される。
//!
//! # 適応バックオフ
//! 新規 job ゼロのサイクルが `empty_cycle_threshold` 回続いたら
//! 間隔を `min(2 × base, max_interval)` に伸ばす。1 件でも見つかれば元に戻す。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::harvest::{HarvestCycle, RunMode};
use crate::app::status::{CycleReport, SchedulerState, StatusBoard};
use crate::domain::CycleError;
use crate::ports::Clock;

/// Something the scheduler can run once per interval.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_once(&self, mode: RunMode) -> Result<CycleReport, CycleError>;
}

#[async_trait]
impl CycleRunner for HarvestCycle {
    async fn run_once(&self, mode: RunMode) -> Result<CycleReport, CycleError> {
        HarvestCycle::run_once(self, mode).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub empty_cycle_threshold: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30 * 60),
            max_interval: Duration::from_secs(2 * 60 * 60),
            empty_cycle_threshold: 5,
        }
    }
}

/// Empty-cycle counter and the interval it implies.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    empty_cycle_count: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            empty_cycle_count: 0,
        }
    }

    pub fn record_cycle(&mut self, found_new: bool) {
        if found_new {
            self.empty_cycle_count = 0;
        } else {
            self.empty_cycle_count = self.empty_cycle_count.saturating_add(1);
        }
    }

    pub fn empty_cycle_count(&self) -> u32 {
        self.empty_cycle_count
    }

    pub fn current_interval(&self) -> Duration {
        if self.empty_cycle_count >= self.config.empty_cycle_threshold {
            (self.config.base_interval * 2).min(self.config.max_interval)
        } else {
            self.config.base_interval
        }
    }

    pub fn reset(&mut self) {
        self.empty_cycle_count = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Idle,
    Active,
    Shutdown,
}

struct Shared {
    runner: Arc<dyn CycleRunner>,
    backoff: Mutex<Backoff>,
    board: StatusBoard,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn backoff<R>(&self, f: impl FnOnce(&mut Backoff) -> R) -> R {
        let mut backoff = self.backoff.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut backoff)
    }

    async fn run_cycle(&self, mode: RunMode) -> Result<CycleReport, CycleError> {
        let previous = self.board.scheduler().state;
        self.board
            .update_scheduler(|s| s.state = SchedulerState::Running);
        let result = self.runner.run_once(mode).await;

        let (count, interval) = match &result {
            Ok(report) => self.backoff(|b| {
                b.record_cycle(report.found_new());
                (b.empty_cycle_count(), b.current_interval())
            }),
            Err(_) => self.backoff(|b| (b.empty_cycle_count(), b.current_interval())),
        };
        if count > 0 && interval > self.backoff(|b| b.config.base_interval) {
            tracing::info!(
                empty_cycles = count,
                interval = ?interval,
                "no new jobs for a while, extending interval"
            );
        }

        self.board.update_scheduler(|s| {
            s.state = previous;
            s.empty_cycle_count = count;
            s.current_interval_secs = interval.as_secs();
            match &result {
                Ok(report) => {
                    s.last_cycle_at = Some(self.clock.now());
                    s.last_report = Some(report.clone());
                    s.last_error = None;
                }
                // 実行中の手動サイクルとぶつかっただけ
                Err(CycleError::Busy) => {}
                Err(err) => s.last_error = Some(err.to_string()),
            }
        });
        result
    }
}

/// Handle to the background scheduler task.
pub struct SchedulerHandle {
    command_tx: watch::Sender<Command>,
    shared: Arc<Shared>,
    join: JoinHandle<()>,
}

/// Spawn the scheduler in the Idle state.
pub fn spawn(
    runner: Arc<dyn CycleRunner>,
    config: BackoffConfig,
    board: StatusBoard,
    clock: Arc<dyn Clock>,
) -> SchedulerHandle {
    let (command_tx, command_rx) = watch::channel(Command::Idle);
    board.update_scheduler(|s| {
        s.state = SchedulerState::Idle;
        s.current_interval_secs = config.base_interval.as_secs();
    });
    let shared = Arc::new(Shared {
        runner,
        backoff: Mutex::new(Backoff::new(config)),
        board,
        clock,
    });
    let join = tokio::spawn(scheduler_loop(Arc::clone(&shared), command_rx));
    SchedulerHandle {
        command_tx,
        shared,
        join,
    }
}

impl SchedulerHandle {
    /// Start cycling. A cycle runs right away unless already active.
    pub fn activate(&self) {
        self.command(Command::Active);
    }

    /// Stop after the current cycle; an ongoing wait ends immediately.
    pub fn deactivate(&self) {
        self.command(Command::Idle);
    }

    // 同じコマンドの再送で待機を起こさない
    fn command(&self, next: Command) {
        self.command_tx.send_if_modified(|current| {
            if *current == next || *current == Command::Shutdown {
                return false;
            }
            *current = next;
            true
        });
    }

    pub fn is_active(&self) -> bool {
        *self.command_tx.borrow() == Command::Active
    }

    /// Clear the empty-cycle count and the last error.
    pub fn reset(&self) {
        let interval = self.shared.backoff(|b| {
            b.reset();
            b.current_interval()
        });
        self.shared.board.update_scheduler(|s| {
            s.empty_cycle_count = 0;
            s.current_interval_secs = interval.as_secs();
            s.last_error = None;
        });
    }

    /// Run one cycle now, outside the timer. Counts toward backoff.
    pub async fn trigger(&self, mode: RunMode) -> Result<CycleReport, CycleError> {
        self.shared.run_cycle(mode).await
    }

    pub fn current_interval(&self) -> Duration {
        self.shared.backoff(|b| b.current_interval())
    }

    pub fn board(&self) -> &StatusBoard {
        &self.shared.board
    }

    /// Stop the loop and wait for it. An in-flight cycle finishes first.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "scheduler task ended abnormally");
        }
        self.shared
            .board
            .update_scheduler(|s| s.state = SchedulerState::Stopped);
    }
}

async fn scheduler_loop(shared: Arc<Shared>, mut command_rx: watch::Receiver<Command>) {
    loop {
        let command = *command_rx.borrow_and_update();
        match command {
            Command::Shutdown => break,
            Command::Idle => {
                shared.board.update_scheduler(|s| {
                    s.state = SchedulerState::Idle;
                    s.next_run_at = None;
                });
                if command_rx.changed().await.is_err() {
                    break;
                }
            }
            Command::Active => {
                shared
                    .board
                    .update_scheduler(|s| s.state = SchedulerState::Active);
                match shared.run_cycle(RunMode::Normal).await {
                    Ok(_) => {}
                    Err(CycleError::Busy) => {
                        tracing::debug!("cycle already running (manual trigger), waiting");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "harvest cycle aborted at start-up");
                    }
                }

                let wait = shared.backoff(|b| b.current_interval());
                let next = chrono::Duration::from_std(wait)
                    .ok()
                    .map(|d| shared.clock.now() + d);
                shared.board.update_scheduler(|s| s.next_run_at = next);
                tracing::debug!(wait = ?wait, "waiting for next cycle");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = command_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    tracing::info!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> BackoffConfig {
        BackoffConfig::default()
    }

    #[rstest]
    #[case::fresh(0, 1800)]
    #[case::below_threshold(4, 1800)]
    #[case::at_threshold(5, 3600)]
    #[case::far_past_threshold(50, 3600)]
    fn interval_after_empty_cycles(#[case] empty: u32, #[case] expected_secs: u64) {
        let mut backoff = Backoff::new(config());
        for _ in 0..empty {
            backoff.record_cycle(false);
        }
        assert_eq!(backoff.empty_cycle_count(), empty);
        assert_eq!(backoff.current_interval(), Duration::from_secs(expected_secs));
    }

    #[test]
    fn doubled_interval_is_capped() {
        let mut backoff = Backoff::new(BackoffConfig {
            base_interval: Duration::from_secs(5400),
            ..config()
        });
        for _ in 0..5 {
            backoff.record_cycle(false);
        }
        assert_eq!(backoff.current_interval(), Duration::from_secs(7200));
    }

    #[test]
    fn one_productive_cycle_resets() {
        let mut backoff = Backoff::new(config());
        for _ in 0..7 {
            backoff.record_cycle(false);
        }
        backoff.record_cycle(true);
        assert_eq!(backoff.empty_cycle_count(), 0);
        assert_eq!(backoff.current_interval(), Duration::from_secs(1800));
    }

    /// 呼ばれた回数を数えるだけの runner
    #[derive(Default)]
    struct CountingRunner {
        runs: AtomicUsize,
        new_per_run: usize,
    }

    #[async_trait]
    impl CycleRunner for CountingRunner {
        async fn run_once(&self, _: RunMode) -> Result<CycleReport, CycleError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(CycleReport {
                new: self.new_per_run,
                ..CycleReport::default()
            })
        }
    }

    async fn settle(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn active_scheduler_runs_every_interval() {
        let runner = Arc::new(CountingRunner::default());
        let handle = spawn(runner.clone(), config(), StatusBoard::new("m"), Arc::new(SystemClock));

        settle(10).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0, "idle scheduler runs nothing");

        handle.activate();
        settle(10).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        settle(1800).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
        assert_eq!(handle.board().scheduler().empty_cycle_count, 2);
        assert_eq!(handle.board().scheduler().state, SchedulerState::Active);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn deactivate_interrupts_the_wait() {
        let runner = Arc::new(CountingRunner::default());
        let handle = spawn(runner.clone(), config(), StatusBoard::new("m"), Arc::new(SystemClock));
        handle.activate();
        settle(10).await;

        handle.deactivate();
        settle(1).await;
        assert_eq!(handle.board().scheduler().state, SchedulerState::Idle);

        settle(4 * 3600).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_an_active_scheduler_promptly() {
        let runner = Arc::new(CountingRunner::default());
        let board = StatusBoard::new("m");
        let handle = spawn(runner, config(), board.clone(), Arc::new(SystemClock));
        handle.activate();
        settle(10).await;

        let started = tokio::time::Instant::now();
        handle.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(board.scheduler().state, SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_extends_interval_after_five_empty_cycles() {
        let runner = Arc::new(CountingRunner::default());
        let handle = spawn(runner.clone(), config(), StatusBoard::new("m"), Arc::new(SystemClock));
        handle.activate();
        settle(10).await;
        settle(4 * 1800).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 5);
        assert_eq!(handle.current_interval(), Duration::from_secs(3600));
        assert_eq!(handle.board().scheduler().current_interval_secs, 3600);

        // 次は 1800s 後ではなく 3600s 後
        settle(1800).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 5);
        settle(1800).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 6);

        handle.reset();
        assert_eq!(handle.current_interval(), Duration::from_secs(1800));
        assert_eq!(handle.board().scheduler().empty_cycle_count, 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_activate_does_not_cut_the_wait_short() {
        let runner = Arc::new(CountingRunner::default());
        let handle = spawn(runner.clone(), config(), StatusBoard::new("m"), Arc::new(SystemClock));
        handle.activate();
        settle(10).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        handle.activate();
        settle(10).await;
        handle.activate();
        settle(60).await;
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert!(handle.is_active());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_times_come_from_the_clock() {
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap();
        let runner = Arc::new(CountingRunner::default());
        let handle = spawn(runner, config(), StatusBoard::new("m"), Arc::new(FixedClock::new(at)));
        handle.activate();
        settle(10).await;

        let status = handle.board().scheduler();
        assert_eq!(status.last_cycle_at, Some(at));
        assert_eq!(status.next_run_at, Some(at + chrono::Duration::seconds(1800)));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn manual_trigger_counts_toward_backoff() {
        let runner = Arc::new(CountingRunner {
            new_per_run: 2,
            ..CountingRunner::default()
        });
        let handle = spawn(runner.clone(), config(), StatusBoard::new("m"), Arc::new(SystemClock));
        let report = handle.trigger(RunMode::Force).await.unwrap();
        assert_eq!(report.new, 2);
        let status = handle.board().scheduler();
        assert_eq!(status.last_report, Some(report));
        assert_eq!(status.state, SchedulerState::Idle);
        handle.shutdown().await;
    }
}
