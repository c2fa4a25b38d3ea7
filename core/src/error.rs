//! Error kinds for each stage of a build.
//!
//! Content problems (`DocumentError`) are folded into per-document responses and never abort a
//! build. `ConfigError` is the only kind that surfaces as a hard failure from session calls.

use thiserror::Error;

/// Invalid session setup or API misuse.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error(
        "shard count {0} is not supported (expected 1..={max})",
        max = crate::config::MAX_SHARDS
    )]
    ShardCount(u32),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("unsupported language '{0}'")]
    Language(String),

    #[error("invalid exclusion selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid attribute name for {field}: '{value}'")]
    Attribute { field: &'static str, value: String },

    #[error("document id must not be empty")]
    EmptyDocumentId,

    #[error("could not parse configuration: {0}")]
    Parse(String),
}

/// A single document could not be turned into indexable content.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("document is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("document has {nodes} nodes, over the {limit} node limit")]
    TooManyNodes { nodes: usize, limit: usize },

    #[error("document keeps {depth} formatting elements open, over the limit of {limit}")]
    TooDeeplyNested { depth: usize, limit: usize },
}

/// Per-document failure, reported inside that document's [`Response`](crate::session::Response).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    #[error("a document with id '{0}' has already been added")]
    DuplicateId(String),

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
}

/// Failure of a single finalize call. The session stays usable afterwards.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to encode {artifact}: {message}")]
    Encode { artifact: String, message: String },

    #[error("corpus has {0} documents, more than the artifact format can address")]
    TooManyDocuments(usize),
}

impl CompileError {
    pub(crate) fn encode(artifact: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Encode { artifact: artifact.into(), message: err.to_string() }
    }
}

/// Failure to read back an artifact produced by this crate.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {artifact}: {message}")]
    Malformed { artifact: &'static str, message: String },

    #[error("{artifact} format version {found} is not supported (expected {expected})")]
    Version { artifact: &'static str, found: u32, expected: u32 },
}

pub type CompileResult<T> = std::result::Result<T, CompileError>;
