//! The concurrency-safe entry point.
//!
//! Extraction and tokenization run on the caller's thread without holding any lock. Only the
//! final apply step takes the write lock, so each document lands in the index all at once.
//! `finalize` holds an upgradable read lock while compiling, which keeps writers out until the
//! artifacts are built.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::compile::compile;
use crate::config::SessionConfig;
use crate::error::{CompileError, ConfigError, DocumentError};
use crate::extract::{ExtractedDocument, Extractor};
use crate::index::{DocSeq, IndexBuilder, PreparedDocument};
use crate::persist::Artifact;
use crate::tokenizer::{Tokenizer, WordStemmer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Accumulating,
    /// Artifacts were produced from the current documents. Adding more moves the session
    /// back to `Accumulating`; finalize again to see them.
    Finalized,
}

/// Outcome of adding one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub success: bool,
    pub message: String,
    /// JSON diagnostics, only when the session is verbose.
    pub metadata: Option<String>,
    pub error: Option<DocumentError>,
}

impl Response {
    pub fn is_success(&self) -> bool { self.success }
}

/// Input item for [`BuildSession::add_many`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub url: Option<String>,
    pub html: Vec<u8>,
}

impl NewDocument {
    pub fn new(id: impl Into<String>, url: Option<String>, html: impl Into<Vec<u8>>) -> Self {
        Self { id: id.into(), url, html: html.into() }
    }
}

#[derive(Serialize)]
struct DocumentReport<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<DocSeq>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    words: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unique_words: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

struct Inner {
    builder: IndexBuilder,
    state: SessionState,
}

/// One independent indexing run. Share it by reference (or `Arc`) across worker threads.
pub struct BuildSession {
    config: SessionConfig,
    extractor: Extractor,
    tokenizer: Tokenizer,
    inner: RwLock<Inner>,
}

impl BuildSession {
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let tokenizer =
            Tokenizer::with_algorithm(config.stemming_algorithm()?, config.drop_stopwords);
        Self::with_tokenizer(config, tokenizer)
    }

    /// Uses `stemmer` in place of the one `config.language` would select.
    pub fn with_stemmer(
        config: SessionConfig,
        stemmer: Arc<dyn WordStemmer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tokenizer = Tokenizer::with_stemmer(stemmer, config.drop_stopwords);
        Self::with_tokenizer(config, tokenizer)
    }

    fn with_tokenizer(config: SessionConfig, tokenizer: Tokenizer) -> Result<Self, ConfigError> {
        let extractor = Extractor::new(&config)?;
        let inner = RwLock::new(Inner { builder: IndexBuilder::new(), state: SessionState::Empty });
        Ok(Self { config, extractor, tokenizer, inner })
    }

    pub fn config(&self) -> &SessionConfig { &self.config }

    pub fn state(&self) -> SessionState { self.inner.read().state }

    pub fn document_count(&self) -> usize { self.inner.read().builder.documents().len() }

    pub fn contains(&self, id: &str) -> bool { self.inner.read().builder.contains(id) }

    pub fn extracted(&self, id: &str) -> Option<ExtractedDocument> {
        self.inner.read().builder.document(id).map(|d| d.extracted.clone())
    }

    /// Adds one page. Content problems come back as an unsuccessful [`Response`]; only an
    /// empty id is an error.
    pub fn add_document(
        &self,
        id: &str,
        url: Option<&str>,
        html: &[u8],
    ) -> Result<Response, ConfigError> {
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyDocumentId);
        }
        Ok(match self.prepare(id, url, html) {
            Ok(prepared) => self.apply(prepared),
            Err(err) => self.rejected(id, err),
        })
    }

    /// Adds every item independently: extraction runs in parallel, items are then applied in
    /// input order. Returns one outcome per item.
    pub fn add_many<I>(&self, documents: I) -> Vec<Result<Response, ConfigError>>
    where
        I: IntoIterator<Item = NewDocument>,
    {
        let documents: Vec<NewDocument> = documents.into_iter().collect();
        let prepared: Vec<Result<Result<PreparedDocument, DocumentError>, ConfigError>> = documents
            .par_iter()
            .map(|doc| {
                if doc.id.trim().is_empty() {
                    return Err(ConfigError::EmptyDocumentId);
                }
                Ok(self.prepare(&doc.id, doc.url.as_deref(), &doc.html))
            })
            .collect();

        prepared
            .into_iter()
            .zip(&documents)
            .map(|(outcome, doc)| {
                Ok(match outcome? {
                    Ok(prepared) => self.apply(prepared),
                    Err(err) => self.rejected(&doc.id, err),
                })
            })
            .collect()
    }

    /// Compiles the current documents into artifacts. Calling it again without adding
    /// anything returns identical artifacts.
    pub fn finalize(&self) -> Result<Vec<Artifact>, CompileError> {
        let inner = self.inner.upgradable_read();
        let artifacts = compile(inner.builder.index(), inner.builder.documents(), &self.config)?;
        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        inner.state = SessionState::Finalized;
        Ok(artifacts)
    }

    fn prepare(
        &self,
        id: &str,
        url: Option<&str>,
        html: &[u8],
    ) -> Result<PreparedDocument, DocumentError> {
        // cheap early exit; ingest re-checks under the write lock
        if self.contains(id) {
            return Err(DocumentError::DuplicateId(id.to_string()));
        }
        let extracted = self.extractor.extract(html, id, url)?;
        Ok(PreparedDocument::prepare(extracted, &self.tokenizer))
    }

    fn apply(&self, prepared: PreparedDocument) -> Response {
        let id = prepared.id().to_string();
        let words = prepared.word_count;
        let unique_words = prepared.unique_words();
        let report = self.config.verbose.then(|| {
            let extracted = &prepared.extracted;
            (extracted.url.clone(), extracted.title.clone(), extracted.filters.len())
        });

        let outcome = {
            let mut inner = self.inner.write();
            let outcome = inner.builder.ingest(prepared);
            if outcome.is_ok() {
                inner.state = SessionState::Accumulating;
            }
            outcome
        };

        match outcome {
            Ok(seq) => {
                debug!(id = %id, seq, words, unique_words, "indexed document");
                let metadata = report.and_then(|(url, title, filters)| {
                    serde_json::to_string(&DocumentReport {
                        id: &id,
                        sequence: Some(seq),
                        url: Some(&url),
                        title: Some(&title),
                        words: Some(words),
                        unique_words: Some(unique_words),
                        filters: Some(filters),
                        error: None,
                    })
                    .ok()
                });
                Response {
                    success: true,
                    message: format!("Successfully added document: {id}"),
                    metadata,
                    error: None,
                }
            }
            Err(err) => self.rejected(&id, err),
        }
    }

    fn rejected(&self, id: &str, err: DocumentError) -> Response {
        warn!(id = %id, error = %err, "document rejected");
        let metadata = self.config.verbose.then(|| {
            serde_json::to_string(&DocumentReport {
                id,
                sequence: None,
                url: None,
                title: None,
                words: None,
                unique_words: None,
                filters: None,
                error: Some(err.to_string()),
            })
            .ok()
        });
        Response {
            success: false,
            message: format!("Error adding document {id}: {err}"),
            metadata: metadata.flatten(),
            error: Some(err),
        }
    }
}
