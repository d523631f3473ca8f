use tracing::debug;

use crate::document::Document;
use crate::error::TransformError;
use crate::parser;
use crate::transformers::DocumentTransformer;

/// Drops markdown documents with no text once headings and markup are
/// removed, e.g. a lone heading.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterMarkdownDocsNoContent;

impl DocumentTransformer for FilterMarkdownDocsNoContent {
    fn name(&self) -> &str {
        "filter_markdown_docs_no_content"
    }

    fn transform(&self, docs: Vec<Document>) -> Result<Vec<Document>, TransformError> {
        let before = docs.len();
        let kept: Vec<Document> = docs
            .into_iter()
            .filter(|doc| !parser::body_text(&doc.content).trim().is_empty())
            .collect();
        if kept.len() < before {
            debug!(
                dropped = before - kept.len(),
                "Filtered markdown documents without content"
            );
        }
        Ok(kept)
    }
}
