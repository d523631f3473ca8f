mod dedup;
mod generic;
mod markdown;
mod metadata;

pub use dedup::DeduplicateContent;
pub use generic::GenericTransformer;
pub use markdown::FilterMarkdownDocsNoContent;
pub use metadata::ExtraMetadata;

use crate::document::Document;
use crate::error::TransformError;
use crate::filetype;

/// Maps a batch of documents to a possibly smaller batch. Surviving documents
/// keep their relative order, so transformers chain.
pub trait DocumentTransformer: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, docs: Vec<Document>) -> Result<Vec<Document>, TransformError>;
}

/// Transformers applied, in order, when the caller gives no explicit list.
pub fn default_document_transformers(filetype: &str) -> Vec<Box<dyn DocumentTransformer>> {
    let mut transformers: Vec<Box<dyn DocumentTransformer>> = Vec::new();
    if filetype::is_markdown(filetype) {
        transformers.push(Box::new(FilterMarkdownDocsNoContent));
    }
    transformers
}

/// Run `docs` through every transformer in order, stopping at the first error.
pub fn apply_transformers<'a, I>(transformers: I, docs: Vec<Document>) -> Result<Vec<Document>, TransformError>
where
    I: IntoIterator<Item = &'a dyn DocumentTransformer>,
{
    transformers
        .into_iter()
        .try_fold(docs, |docs, transformer| transformer.transform(docs))
}
