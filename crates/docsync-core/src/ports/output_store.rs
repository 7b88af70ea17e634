//! OutputStore port - harvest 結果（変換済み行）の置き場
//!
//! Upload coordinator はここから「未アップロードの出力」を探す。

use async_trait::async_trait;

use crate::domain::{Category, JobOutput, OutputError};

#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Store (or overwrite) the output of one job.
    async fn save(&self, output: &JobOutput) -> Result<(), OutputError>;

    /// Every stored output of `category`, ordered by job id.
    async fn list(&self, category: &Category) -> Result<Vec<JobOutput>, OutputError>;
}
