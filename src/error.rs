//! Error taxonomy for an ingestion pass.
//!
//! Every variant here is fatal to the unit it occurs in. Duplicate captures
//! are not errors: they are reported as
//! [`CaptureOutcome::Duplicate`](crate::models::CaptureOutcome) and the pass
//! carries on.

use thiserror::Error;

/// Result alias used by the core pipeline.
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The network endpoint or a local file could not be read.
    #[error("source unavailable: {location}: {reason}")]
    SourceUnavailable { location: String, reason: String },

    /// An import path that yields no readable files.
    #[error("nothing to import at {0}")]
    EmptyImport(String),

    /// The payload is not well-formed XML.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// A record element is missing a field or carries an unparseable value.
    #[error("malformed record #{index}: {reason}")]
    MalformedRecord { index: usize, reason: String },

    /// A vocabulary field holds a label outside the closed token set.
    #[error("unknown token {value:?} in {field} of record #{index}")]
    UnknownToken {
        index: usize,
        field: &'static str,
        value: String,
    },

    /// A write was rejected by a check constraint or the persisted
    /// vocabulary differs from the built-in one.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The same link was inserted twice while populating the link catalog.
    #[error("link {start}-{end} appears more than once while populating links")]
    DuplicateLink { start: i64, end: i64 },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl IngestError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            IngestError::EmptyImport(_) => 1,
            IngestError::SourceUnavailable { .. } => 2,
            IngestError::MalformedDocument(_)
            | IngestError::MalformedRecord { .. }
            | IngestError::UnknownToken { .. } => 3,
            IngestError::SchemaViolation(_) | IngestError::DuplicateLink { .. } => 4,
            IngestError::Store(_) => STORE_EXIT_CODE,
        }
    }

    pub(crate) fn unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        IngestError::SourceUnavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

pub const STORE_EXIT_CODE: u8 = 5;

/// Exit code for configuration and usage errors raised outside the pipeline.
pub const CONFIG_EXIT_CODE: u8 = 64;
