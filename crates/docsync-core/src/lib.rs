//! docsync-core
//!
//! 複数マシンで動く文書同期の調整レイヤー。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, lock records, jobs, machine identity, errors）
//! - **ports**: 抽象化レイヤー（LockLedger, DocumentSource, DocumentTransformer, TargetSystem, OutputStore, Clock）
//! - **app**: アプリケーションロジック（lock protocol, history, harvest, scheduler, upload, retention, status）
//! - **impls**: 実装（in-memory / JSON ファイル ledger、ファイルベースの代用 port）
//! - **config**: 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use config::SyncConfig;
