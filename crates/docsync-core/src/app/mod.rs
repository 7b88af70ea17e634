//! App - アプリケーション層
//!
//! ports を組み合わせて、ロック・履歴・スケジューリング・アップロードの
//! ロジックを実装します。
//!
//! # 主要コンポーネント
//! - **JobLock**: 共有 ledger 上の job 単位ロック（fail closed）
//! - **LocalHistoryStore**: マシンローカルの完了記録
//! - **HarvestCycle**: 1 サイクル分の取り込み
//! - **Scheduler**: サイクルを回すバックグラウンドタスク（適応バックオフつき）
//! - **UploadCoordinator**: カテゴリ単位の排他と再試行つきアップロード
//! - **Retention**: ledger の掃除
//! - **StatusBoard**: ダッシュボード/CLI 向けの状態

pub mod harvest;
pub mod history;
pub mod lock_protocol;
pub mod retention;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod upload;

pub use self::harvest::{CategoryPages, HarvestCycle, RunMode};
pub use self::history::{LocalHistoryStore, SharedHistory};
pub use self::lock_protocol::{DenyReason, GrantKind, JobLock, LockDecision};
pub use self::retention::Retention;
pub use self::retry::RetryPolicy;
pub use self::scheduler::{BackoffConfig, CycleRunner, SchedulerHandle};
pub use self::status::{CycleReport, SchedulerState, StatusBoard, StatusSnapshot};
pub use self::upload::{UploadCoordinator, UploadSummary};
