//! Ports - 抽象化レイヤー
//!
//! 外部システム（共有 ledger、取り込み元ポータル、アップロード先）への
//! インターフェース。コア（`app`）はこれらの trait にだけ依存する。

pub mod clock;
pub mod document_source;
pub mod lock_ledger;
pub mod output_store;
pub mod target_system;
pub mod transformer;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::document_source::DocumentSource;
pub use self::lock_ledger::{LockLedger, pick_current};
pub use self::output_store::OutputStore;
pub use self::target_system::TargetSystem;
pub use self::transformer::DocumentTransformer;
