//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryLockLedger**: テスト用 ledger（障害・競合の注入つき）
//! - **JsonFileLockLedger**: 共有ドライブ上の JSON ファイル ledger
//! - **FsOutputStore**: harvest 出力のファイル保存
//! - **DirectoryDocumentSource / PlainTextTransformer / JsonlTargetSystem**:
//!   ポータル・ERP 連携を差し込むまでの代用品（CLI が使う）

pub mod dir_source;
pub mod file_ledger;
pub mod fs_output_store;
pub mod fsutil;
pub mod inmem_ledger;
pub mod jsonl_target;
pub mod text_transformer;

pub use self::dir_source::DirectoryDocumentSource;
pub use self::file_ledger::JsonFileLockLedger;
pub use self::fs_output_store::FsOutputStore;
pub use self::inmem_ledger::InMemoryLockLedger;
pub use self::jsonl_target::JsonlTargetSystem;
pub use self::text_transformer::PlainTextTransformer;
