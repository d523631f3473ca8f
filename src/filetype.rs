//! File-type tokens: extensions (".md") or MIME types ("text/markdown").

use std::path::Path;

const MARKDOWN_TYPES: &[&str] = &[".md", ".markdown", "text/markdown"];

/// Lowercase, trim, and drop MIME parameters such as `; charset=utf-8`.
pub fn normalize(filetype: &str) -> String {
    let base = filetype.split(';').next().unwrap_or_default();
    base.trim().to_ascii_lowercase()
}

pub fn is_markdown(filetype: &str) -> bool {
    MARKDOWN_TYPES.contains(&normalize(filetype).as_str())
}

/// Extension token for a path, e.g. `docs/intro.MD` → `.md`. Empty when the
/// path has no extension.
pub fn from_path(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}
