//! DraftFlow Common Library
//!
//! Shared code for the DraftFlow services including:
//! - Article domain model and workflow phases
//! - Record store contract and in-memory implementation
//! - Error types and handling
//! - Configuration management
//! - JST time utilities

pub mod config;
pub mod domain;
pub mod errors;
pub mod store;
pub mod time;

// Re-export commonly used types
pub use config::AppConfig;
pub use domain::{ArticleState, PaperCandidate, Phase};
pub use errors::{Result, WorkflowError};
pub use store::{MemoryStore, RecordStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Marker key embedded into published post content as an HTML comment.
/// Used to find an already-published post for an article (publish
/// idempotency guard).
pub const ARTICLE_MARKER_KEY: &str = "SEO_WORKFLOW_ARTICLE_ID";
