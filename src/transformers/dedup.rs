use std::collections::HashSet;

use crate::document::Document;
use crate::error::TransformError;
use crate::transformers::DocumentTransformer;

/// Drops documents whose trimmed content already appeared earlier in the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeduplicateContent;

impl DocumentTransformer for DeduplicateContent {
    fn name(&self) -> &str {
        "deduplicate_content"
    }

    fn transform(&self, docs: Vec<Document>) -> Result<Vec<Document>, TransformError> {
        let mut seen = HashSet::new();
        Ok(docs
            .into_iter()
            .filter(|doc| seen.insert(doc.content.trim().to_string()))
            .collect())
    }
}
