//! Errors - エラー型と分類
//!
//! 失敗の扱い方は種類ごとに決まっている:
//! - `StoreError`: ledger に届かない → 常に fail closed（ロックは取れなかった扱い）
//! - `SourceError` / `TransformError` / `TargetError`: 外部協力者の失敗 → job 単位で FAILED
//! - `HistoryError` / `OutputError`: ローカル永続化の失敗
//! - `CycleError` / `UploadError`: 呼び出し元（scheduler, CLI）に返すもの

use std::path::PathBuf;

use thiserror::Error;

use super::ids::{Category, JobId};

/// Lock ledger failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key in lock store: {0}")]
    DuplicateKey(JobId),

    #[error("lock store content is corrupt: {0}")]
    Corrupt(String),
}

/// Document source failures (listing or fetching).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("document {0} not found on source")]
    NotFound(JobId),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("transform failed for {job_id}: {message}")]
pub struct TransformError {
    pub job_id: JobId,
    pub message: String,
}

/// Target system failures. Every variant is retryable from the caller's view.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("target rejected batch: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history file {path} is not valid json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output store io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output {path} is not valid json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a harvest cycle did not run.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("a harvest cycle is already running")]
    Busy,

    #[error("lock store unreachable at cycle start: {0}")]
    Store(#[from] StoreError),

    #[error("history unavailable at cycle start: {0}")]
    History(#[from] HistoryError),
}

/// Why an upload batch did not succeed.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload for {0} is already running, retry later")]
    AlreadyRunning(Category),

    #[error("unknown category: {0}")]
    UnknownCategory(Category),

    #[error("upload for {category} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        category: Category,
        attempts: u32,
        last_error: TargetError,
    },

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}
