//! Domain identifiers (strongly-typed IDs and keys).
//!
//! # 二種類の識別子
//! - **Key<T>**: 外部システム由来の文字列キー（伝票番号、カテゴリ名）
//! - **Id<T>**: このプロセスが発行する ULID（サイクル、アップロードバッチ）
//!
//! どちらも Phantom type でマーカーを付けるので、`JobId` と `Category` を
//! 取り違えるとコンパイルエラーになります。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"cycle-", "batch-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ULID ベースの ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// 外部由来の文字列キー
///
/// 値はそのまま保存する（trim などの正規化は呼び出し側の責任）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key<T> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Key<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl<T> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T> From<&str> for Key<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T> From<String> for Key<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T> AsRef<str> for Key<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Job (外部伝票) のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

/// Category のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CategoryKind {}

/// Harvest cycle のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cycle {}

impl IdMarker for Cycle {
    fn prefix() -> &'static str {
        "cycle-"
    }
}

/// Upload batch のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Batch {}

impl IdMarker for Batch {
    fn prefix() -> &'static str {
        "batch-"
    }
}

/// External document number, stable within its category.
pub type JobId = Key<Job>;

/// Partition of document kinds (e.g. "ledger", "estimate").
pub type Category = Key<CategoryKind>;

/// Identifier of one harvest cycle run.
pub type CycleId = Id<Cycle>;

/// Identifier of one upload batch run.
pub type BatchId = Id<Batch>;
