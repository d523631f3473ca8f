mod text;

pub use text::PlainTextLoader;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::context::Context;
use crate::document::Document;
use crate::error::LoadError;

/// Byte stream handed to a loader.
pub type Reader<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Turns a raw byte stream into documents. Concrete format parsers (PDF,
/// office documents) live outside this crate and plug in through this trait.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, ctx: &Context, reader: Reader<'_>) -> Result<Vec<Document>, LoadError>;
}

/// Fallback loader used when no loader was injected for a file type. Every
/// type is read as UTF-8 text; binary content fails in the loader with
/// [`LoadError::Parse`].
pub fn default_document_loader(_filetype: &str) -> Arc<dyn DocumentLoader> {
    Arc::new(PlainTextLoader::new())
}
