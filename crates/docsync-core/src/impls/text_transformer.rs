//! PlainTextTransformer - 文書全体を 1 行のレコードにするだけの変換
//!
//! HTML → 業務コード変換の本実装を差し込むまでの代用品。

use crate::domain::{Category, RawDocument, Row, TransformError};
use crate::ports::DocumentTransformer;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextTransformer;

impl DocumentTransformer for PlainTextTransformer {
    fn transform(
        &self,
        category: &Category,
        document: &RawDocument,
    ) -> Result<Vec<Row>, TransformError> {
        let content = document.content.trim();
        if content.is_empty() {
            return Ok(Vec::new());
        }
        let mut row = Row::new();
        row.insert("job_id".into(), document.job_id.as_str().into());
        row.insert("category".into(), category.as_str().into());
        row.insert("content".into(), content.into());
        Ok(vec![row])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;

    #[test]
    fn blank_document_yields_no_rows() {
        let doc = RawDocument {
            job_id: JobId::new("ORD-1"),
            content: "  \n ".into(),
        };
        let rows = PlainTextTransformer
            .transform(&Category::new("ledger"), &doc)
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn document_becomes_one_row() {
        let doc = RawDocument {
            job_id: JobId::new("ORD-1"),
            content: "<table>..</table>\n".into(),
        };
        let rows = PlainTextTransformer
            .transform(&Category::new("ledger"), &doc)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["content"], "<table>..</table>");
        assert_eq!(rows[0]["job_id"], "ORD-1");
    }
}
