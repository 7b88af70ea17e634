//! DocumentSource port - 取り込み元ポータル
//!
//! ページ操作やスクレイピングの詳細はこの trait の向こう側。

use async_trait::async_trait;

use crate::domain::{Category, JobDescriptor, RawDocument, SourceError};

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Jobs currently listed on `page` of `category`, in the source's order.
    async fn list_jobs(
        &self,
        category: &Category,
        page: &str,
    ) -> Result<Vec<JobDescriptor>, SourceError>;

    /// Fetch the document body for one job.
    async fn fetch(&self, job: &JobDescriptor) -> Result<RawDocument, SourceError>;
}
