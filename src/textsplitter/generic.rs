use crate::error::SplitError;
use crate::textsplitter::{TextSplitter, TextSplitterOpts};

const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Splits on the coarsest separator present (paragraphs, lines, words, then
/// characters) and merges the pieces back into chunks of at most
/// `chunk_size` characters with `chunk_overlap` characters carried over.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    opts: TextSplitterOpts,
    separators: Vec<String>,
}

impl RecursiveCharacterSplitter {
    pub fn new(opts: TextSplitterOpts) -> Self {
        Self {
            opts,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();

        let (separator, remaining) = match separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep.as_str()))
        {
            Some(i) => (separators[i].as_str(), &separators[i + 1..]),
            None => ("", &[][..]),
        };

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator).map(String::from).collect()
        };

        let mut good_splits = Vec::new();
        for split in splits {
            if char_len(&split) < self.opts.chunk_size {
                good_splits.push(split);
                continue;
            }
            if !good_splits.is_empty() {
                chunks.extend(self.merge_splits(&good_splits, separator));
                good_splits.clear();
            }
            if remaining.is_empty() {
                chunks.push(split);
            } else {
                chunks.extend(self.split_recursive(&split, remaining));
            }
        }
        if !good_splits.is_empty() {
            chunks.extend(self.merge_splits(&good_splits, separator));
        }

        chunks
    }

    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let chunk_size = self.opts.chunk_size;
        let overlap = self.opts.chunk_overlap;
        let separator_len = char_len(separator);

        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for split in splits {
            let split_len = char_len(split);
            let joined_len = total + split_len + if current.is_empty() { 0 } else { separator_len };

            if joined_len > chunk_size && !current.is_empty() {
                if let Some(doc) = join_docs(&current, separator) {
                    docs.push(doc);
                }
                while !current.is_empty()
                    && (total > overlap
                        || (total + split_len + separator_len > chunk_size && total > 0))
                {
                    total -= char_len(current[0]);
                    if current.len() > 1 {
                        total -= separator_len;
                    }
                    current.remove(0);
                }
            }

            if !current.is_empty() {
                total += separator_len;
            }
            current.push(split);
            total += split_len;
        }

        if let Some(doc) = join_docs(&current, separator) {
            docs.push(doc);
        }
        docs
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_docs(docs: &[&str], separator: &str) -> Option<String> {
    let joined = docs.join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl TextSplitter for RecursiveCharacterSplitter {
    fn name(&self) -> &str {
        "recursive_character"
    }

    fn split_text(&self, text: &str) -> Result<Vec<String>, SplitError> {
        self.opts.validate()?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.split_recursive(text, &self.separators))
    }
}
