//! Search indexing for static sites.
//!
//! Feed rendered HTML pages to a [`BuildSession`], then call [`BuildSession::finalize`] to get
//! a deterministic set of [`Artifact`]s: a manifest, hash-partitioned index shards, filter
//! indexes and one fragment per page. The engine does no I/O; writing the artifacts is up to
//! the caller.
//!
//! ```no_run
//! use sitefind_core::{BuildSession, SessionConfig};
//!
//! let session = BuildSession::new(SessionConfig::builder().keep_url(false).build())?;
//! let response = session.add_document("docs/index.html", None, b"<h1>Docs</h1><p>Hello</p>")?;
//! assert!(response.success);
//! for artifact in session.finalize()? {
//!     println!("{} ({} bytes)", artifact.relative_path(), artifact.bytes().len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod compile;
pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod persist;
pub mod session;
pub mod tokenizer;

pub use config::{ExtractionLimits, ExtractionPolicy, SessionConfig};
pub use error::{CompileError, ConfigError, DecodeError, DocumentError, ExtractionError};
pub use extract::{ExtractedDocument, Extractor};
pub use index::{InvertedIndex, Posting, PostingList};
pub use persist::{Artifact, FilterIndex, Fragment, Manifest, ShardIndex};
pub use session::{BuildSession, NewDocument, Response, SessionState};
pub use tokenizer::{Token, Tokenizer, WordStemmer};
