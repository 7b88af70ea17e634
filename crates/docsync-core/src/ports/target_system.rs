//! TargetSystem port - アップロード先
//!
//! 失敗後の再送で状態が壊れない程度に冪等であることを前提にしている
//! （ここでは検証しない）。

use async_trait::async_trait;

use crate::domain::{Category, Row, TargetError};

#[async_trait]
pub trait TargetSystem: Send + Sync {
    /// Submit one batch. All rows are accepted or none are.
    async fn submit(&self, rows: &[Row], category: &Category) -> Result<(), TargetError>;
}
