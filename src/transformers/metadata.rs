use crate::document::{Document, Metadata};
use crate::error::TransformError;
use crate::transformers::DocumentTransformer;

/// Merges a fixed set of metadata into every document, overwriting existing keys.
#[derive(Debug, Clone, Default)]
pub struct ExtraMetadata {
    metadata: Metadata,
}

impl ExtraMetadata {
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }
}

impl DocumentTransformer for ExtraMetadata {
    fn name(&self) -> &str {
        "extra_metadata"
    }

    fn transform(&self, mut docs: Vec<Document>) -> Result<Vec<Document>, TransformError> {
        for doc in &mut docs {
            doc.metadata
                .extend(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(docs)
    }
}
