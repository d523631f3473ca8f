use std::fmt;

use crate::document::Document;
use crate::error::TransformError;
use crate::transformers::DocumentTransformer;

type TransformationFn = dyn Fn(Vec<Document>) -> Result<Vec<Document>, TransformError> + Send + Sync;

/// Adapter that turns any function into a [`DocumentTransformer`].
pub struct GenericTransformer {
    name: String,
    func: Box<TransformationFn>,
}

impl GenericTransformer {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Vec<Document>) -> Result<Vec<Document>, TransformError> + Send + Sync + 'static,
    {
        Self::named("generic", func)
    }

    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Document>) -> Result<Vec<Document>, TransformError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for GenericTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericTransformer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DocumentTransformer for GenericTransformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, docs: Vec<Document>) -> Result<Vec<Document>, TransformError> {
        (self.func)(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_round_trip() {
        let identity = GenericTransformer::new(Ok);
        let docs = vec![
            Document::new("1", "first").with_metadata("k", "v"),
            Document::new("2", "second"),
            Document::new("3", ""),
        ];
        let out = identity.transform(docs.clone()).unwrap();
        assert_eq!(out, docs);
        assert_eq!(identity.name(), "generic");
    }

    #[test]
    fn test_closure_with_captured_state() {
        let min_len = 4;
        let filter = GenericTransformer::named("min_len", move |docs: Vec<Document>| {
            Ok(docs
                .into_iter()
                .filter(|d| d.content.len() >= min_len)
                .collect())
        });
        let out = filter
            .transform(vec![Document::new("1", "abc"), Document::new("2", "abcd")])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "2");
        assert_eq!(filter.name(), "min_len");
    }
}
