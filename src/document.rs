use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use uuid::Uuid;

/// Free-form document metadata used for provenance and filtering.
pub type Metadata = HashMap<String, Value>;

/// Metadata key → required string value; all entries must match.
pub type Where = HashMap<String, String>;

/// Well-known metadata keys written by the pipeline and the stores.
pub mod keys {
    /// Id of the document a chunk was split from.
    pub const DOCUMENT_ID: &str = "document_id";
    pub const DATASET_ID: &str = "dataset_id";
    /// Caller-supplied source identifier, usually a file path.
    pub const SOURCE: &str = "source";
    pub const FILETYPE: &str = "filetype";
    pub const CHUNK_INDEX: &str = "chunk_index";
    /// Set on similarity search results.
    pub const SIMILARITY: &str = "similarity";
}

/// A unit of content flowing through load, transform, split, embed and store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            embedding: None,
        }
    }

    /// Create a document with a random id.
    pub fn from_content(content: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), content)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = Some(embedding);
    }

    pub fn embedding(&self) -> Option<&Vec<f32>> {
        self.embedding.as_ref()
    }

    /// Metadata value rendered the way `where` filters compare it: strings
    /// as-is, everything else as its JSON text.
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Conjunctive match against both filter kinds.
    pub fn matches(&self, where_filter: &Where, where_document: &[WhereDocument]) -> bool {
        where_filter
            .iter()
            .all(|(key, expected)| self.metadata_str(key).as_deref() == Some(expected.as_str()))
            && where_document.iter().all(|wd| wd.matches(&self.content))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhereDocumentOperator {
    #[serde(rename = "$contains")]
    Contains,
    #[serde(rename = "$not_contains")]
    NotContains,
    #[serde(rename = "$and")]
    And,
    #[serde(rename = "$or")]
    Or,
}

/// Predicate over document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereDocument {
    pub operator: WhereDocumentOperator,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub where_documents: Vec<WhereDocument>,
}

impl WhereDocument {
    pub fn contains(value: impl Into<String>) -> Self {
        Self::leaf(WhereDocumentOperator::Contains, value)
    }

    pub fn not_contains(value: impl Into<String>) -> Self {
        Self::leaf(WhereDocumentOperator::NotContains, value)
    }

    pub fn and(where_documents: Vec<WhereDocument>) -> Self {
        Self::group(WhereDocumentOperator::And, where_documents)
    }

    pub fn or(where_documents: Vec<WhereDocument>) -> Self {
        Self::group(WhereDocumentOperator::Or, where_documents)
    }

    fn leaf(operator: WhereDocumentOperator, value: impl Into<String>) -> Self {
        Self {
            operator,
            value: value.into(),
            where_documents: Vec::new(),
        }
    }

    fn group(operator: WhereDocumentOperator, where_documents: Vec<WhereDocument>) -> Self {
        Self {
            operator,
            value: String::new(),
            where_documents,
        }
    }

    /// Leaves need a value, groups need at least one child.
    pub fn validate(&self) -> Result<(), String> {
        match self.operator {
            WhereDocumentOperator::Contains | WhereDocumentOperator::NotContains => {
                if self.value.is_empty() {
                    return Err(format!("{:?} requires a non-empty value", self.operator));
                }
                Ok(())
            }
            WhereDocumentOperator::And | WhereDocumentOperator::Or => {
                if self.where_documents.is_empty() {
                    return Err(format!("{:?} requires at least one condition", self.operator));
                }
                self.where_documents.iter().try_for_each(WhereDocument::validate)
            }
        }
    }

    pub fn matches(&self, content: &str) -> bool {
        match self.operator {
            WhereDocumentOperator::Contains => content.contains(&self.value),
            WhereDocumentOperator::NotContains => !content.contains(&self.value),
            WhereDocumentOperator::And => self.where_documents.iter().all(|wd| wd.matches(content)),
            WhereDocumentOperator::Or => self.where_documents.iter().any(|wd| wd.matches(content)),
        }
    }
}

/// A named, persisted collection of documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_dimension: Option<usize>,
    pub document_count: usize,
    /// Only populated when requested through [`DatasetGetOpts`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<Document>,
}

impl Dataset {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetGetOpts {
    pub include_documents: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl DatasetGetOpts {
    pub fn with_documents() -> Self {
        Self {
            include_documents: true,
            ..Default::default()
        }
    }

    /// Apply offset and limit to an already ordered document list.
    pub fn page(&self, documents: Vec<Document>) -> Vec<Document> {
        let iter = documents.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

fn dataset_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").expect("valid regex"))
}

/// Dataset ids double as vector DB collection names.
pub fn validate_dataset_id(id: &str) -> Result<(), String> {
    if dataset_id_regex().is_match(id) {
        Ok(())
    } else {
        Err(format!(
            "dataset id {:?} must be 1-128 characters of letters, digits, '_', '-' or '.', starting with a letter or digit",
            id
        ))
    }
}
