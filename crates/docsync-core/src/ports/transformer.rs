//! DocumentTransformer port - raw document → structured rows

use crate::domain::{Category, RawDocument, Row, TransformError};

/// An empty `Vec` means "no usable data", which is not an error.
pub trait DocumentTransformer: Send + Sync {
    fn transform(
        &self,
        category: &Category,
        document: &RawDocument,
    ) -> Result<Vec<Row>, TransformError>;
}
