//! Error types for the DraftFlow workflow
//!
//! Provides:
//! - One error enum covering every capability failure mode
//! - Stable error-type identifiers persisted on the article record
//! - A single fixed user-facing message (internal detail is never shown
//!   verbatim to the operator)

use thiserror::Error;

/// Result type alias using WorkflowError
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Workflow error kinds
///
/// Every transition handler catches these at its outer boundary and records
/// them on the article record; nothing is retried automatically.
#[derive(Error, Debug)]
pub enum WorkflowError {
    // Generation backend
    #[error("generation backend error: {message}")]
    Generation { message: String },

    // Literature search backend
    #[error("literature search returned no results")]
    SearchNoResults,

    #[error("literature search result set too broad: {count} hits")]
    SearchTooBroad { count: u64 },

    #[error("literature search transport error: {message}")]
    SearchTransport { message: String },

    // Publishing backend
    #[error("publishing backend error: {message}")]
    Publishing { message: String },

    // Chat transport
    #[error("chat transport rate limited (retry after {retry_after_secs:?}s)")]
    ChatRateLimited { retry_after_secs: Option<u64> },

    #[error("chat transport error: {message}")]
    ChatTransport { message: String },

    // Workflow preconditions
    #[error("candidate not found in stored candidates: {candidate_id}")]
    CandidateNotFound { candidate_id: String },

    #[error("no selected paper on record")]
    MissingSelection,

    // Tabular source
    #[error("tabular source schema error: {message}")]
    Schema { message: String },

    // Record store
    #[error("article not found: {article_id}")]
    ArticleNotFound { article_id: String },

    #[error("record store error: {message}")]
    Store { message: String },

    // Plumbing
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Stable identifier persisted into `error_type` on the article record.
    pub fn error_type(&self) -> &'static str {
        match self {
            WorkflowError::Generation { .. } => "GenerationError",
            WorkflowError::SearchNoResults => "SearchNoResults",
            WorkflowError::SearchTooBroad { .. } => "SearchTooBroad",
            WorkflowError::SearchTransport { .. } => "SearchTransportError",
            WorkflowError::Publishing { .. } => "PublishingError",
            WorkflowError::ChatRateLimited { .. } | WorkflowError::ChatTransport { .. } => {
                "ChatTransportError"
            }
            WorkflowError::CandidateNotFound { .. } => "CandidateNotFound",
            WorkflowError::MissingSelection => "MissingSelection",
            WorkflowError::Schema { .. } => "SchemaError",
            WorkflowError::ArticleNotFound { .. } => "ArticleNotFound",
            WorkflowError::Store { .. } => "StoreError",
            WorkflowError::Http(_) => "HttpError",
            WorkflowError::Serialization(_) => "SerializationError",
            WorkflowError::Other(_) => "UnknownError",
        }
    }

    /// Fixed operator-facing message. Every kind surfaces identically; the
    /// classified type and raw message are persisted and logged instead.
    pub fn user_message(&self) -> &'static str {
        "エラーが発生しました。"
    }
}
