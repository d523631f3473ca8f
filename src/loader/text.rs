use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::context::Context;
use crate::document::Document;
use crate::error::LoadError;
use crate::loader::{DocumentLoader, Reader};

/// Loads a UTF-8 stream as a single document.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextLoader;

impl PlainTextLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentLoader for PlainTextLoader {
    fn name(&self) -> &str {
        "plain_text"
    }

    async fn load(&self, ctx: &Context, reader: Reader<'_>) -> Result<Vec<Document>, LoadError> {
        let mut buf = Vec::new();
        ctx.run(async {
            reader.read_to_end(&mut buf).await?;
            Ok::<_, LoadError>(())
        })
        .await?;

        let content = String::from_utf8(buf)
            .map_err(|e| LoadError::Parse(format!("invalid UTF-8: {}", e)))?;
        debug!(bytes = content.len(), "Loaded plain text document");

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Document::from_content(content)])
    }
}
