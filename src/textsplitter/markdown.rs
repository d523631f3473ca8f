use tracing::debug;

use crate::error::SplitError;
use crate::parser;
use crate::textsplitter::{RecursiveCharacterSplitter, TextSplitter, TextSplitterOpts};

/// Splits markdown on heading boundaries. Each section becomes one chunk;
/// sections longer than `chunk_size` are split further by a
/// [`RecursiveCharacterSplitter`] with the same options.
#[derive(Debug, Clone)]
pub struct MarkdownSplitter {
    opts: TextSplitterOpts,
    second_splitter: RecursiveCharacterSplitter,
}

impl MarkdownSplitter {
    pub fn new(opts: TextSplitterOpts) -> Self {
        Self {
            second_splitter: RecursiveCharacterSplitter::new(opts.clone()),
            opts,
        }
    }
}

impl TextSplitter for MarkdownSplitter {
    fn name(&self) -> &str {
        "markdown"
    }

    fn split_text(&self, text: &str) -> Result<Vec<String>, SplitError> {
        self.opts.validate()?;

        let mut chunks = Vec::new();
        for section in parser::parse_sections(text) {
            if self.opts.ignore_heading_only && section.is_heading_only() {
                debug!(heading = ?section.heading, "Skipping heading-only markdown section");
                continue;
            }
            if section.raw.chars().count() <= self.opts.chunk_size {
                chunks.push(section.raw);
            } else {
                chunks.extend(self.second_splitter.split_text(&section.raw)?);
            }
        }
        Ok(chunks)
    }
}
