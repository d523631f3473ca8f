mod generic;
mod markdown;

pub use generic::RecursiveCharacterSplitter;
pub use markdown::MarkdownSplitter;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{keys, Document};
use crate::error::SplitError;
use crate::filetype;

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 256;

/// Splitter knobs, always passed explicitly. Sizes are in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSplitterOpts {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Markdown only: drop sections that consist of a heading and nothing else.
    pub ignore_heading_only: bool,
}

impl Default for TextSplitterOpts {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            ignore_heading_only: true,
        }
    }
}

impl TextSplitterOpts {
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.chunk_size == 0 {
            return Err(SplitError::InvalidOptions(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(SplitError::InvalidOptions(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Divides document content into ordered chunks. Implementations must be
/// deterministic and return no chunks for empty content.
pub trait TextSplitter: Send + Sync {
    fn name(&self) -> &str;

    fn split_text(&self, text: &str) -> Result<Vec<String>, SplitError>;

    /// Split every document, in order, into chunk documents.
    fn split_documents(&self, docs: Vec<Document>) -> Result<Vec<Document>, SplitError> {
        let mut chunks = Vec::new();
        for doc in docs {
            let parts = self.split_text(&doc.content)?;
            chunks.extend(chunk_documents(&doc, parts));
        }
        Ok(chunks)
    }
}

/// Build chunk documents that inherit the parent's metadata, record their index
/// and point back at the original document.
pub fn chunk_documents(parent: &Document, parts: Vec<String>) -> Vec<Document> {
    parts
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let mut metadata = parent.metadata.clone();
            metadata
                .entry(keys::DOCUMENT_ID.to_string())
                .or_insert_with(|| Value::String(parent.id.clone()));
            metadata.insert(keys::CHUNK_INDEX.to_string(), Value::from(index));
            Document {
                id: format!("{}-{}", parent.id, index),
                content,
                metadata,
                embedding: None,
            }
        })
        .collect()
}

/// The splitter used when the caller gives no explicit one: markdown-aware for
/// markdown types, recursive character splitting for everything else.
pub fn default_text_splitter(
    filetype: &str,
    opts: Option<&TextSplitterOpts>,
) -> Box<dyn TextSplitter> {
    let opts = opts.cloned().unwrap_or_default();
    if filetype::is_markdown(filetype) {
        Box::new(MarkdownSplitter::new(opts))
    } else {
        Box::new(RecursiveCharacterSplitter::new(opts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_opts_are_valid() {
        let opts = TextSplitterOpts::default();
        assert_eq!(opts.chunk_size, 1024);
        assert_eq!(opts.chunk_overlap, 256);
        assert!(opts.ignore_heading_only);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_invalid_opts() {
        let opts = TextSplitterOpts {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(SplitError::InvalidOptions(_))));

        let opts = TextSplitterOpts {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_chunk_documents_inherit_metadata() {
        let parent = Document::new("doc", "unused").with_metadata(keys::SOURCE, "a.md");
        let chunks = chunk_documents(&parent, vec!["one".to_string(), "two".to_string()]);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].id, "doc-1");
        assert_eq!(chunks[1].content, "two");
        assert_eq!(chunks[1].metadata_str(keys::SOURCE).as_deref(), Some("a.md"));
        assert_eq!(chunks[1].metadata_str(keys::DOCUMENT_ID).as_deref(), Some("doc"));
        assert_eq!(chunks[1].metadata_str(keys::CHUNK_INDEX).as_deref(), Some("1"));
    }

    #[test]
    fn test_chunk_documents_keep_original_document_id() {
        let parent = Document::new("doc-0", "x").with_metadata(keys::DOCUMENT_ID, "doc");
        let chunks = chunk_documents(&parent, vec!["x".to_string()]);
        assert_eq!(chunks[0].metadata_str(keys::DOCUMENT_ID).as_deref(), Some("doc"));
    }

    #[test]
    fn test_default_text_splitter_selection() {
        assert_eq!(default_text_splitter(".md", None).name(), "markdown");
        assert_eq!(default_text_splitter("text/markdown", None).name(), "markdown");
        assert_eq!(default_text_splitter(".txt", None).name(), "recursive_character");
        assert_eq!(default_text_splitter("", None).name(), "recursive_character");
    }
}
