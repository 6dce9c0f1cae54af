//! DraftFlow Capability Clients
//!
//! One module per external capability, each behind an object-safe trait so
//! the engine can be driven by test doubles:
//! - `generation`: text/JSON generation via the OpenAI chat API
//! - `search`: PubMed E-utilities literature search
//! - `publishing`: WordPress REST publishing
//! - `sheets`: Google Sheets planned-article rows
//! - `slack`: chat transport, request signature verification, and Block Kit
//!   message builders

pub mod blocks;
pub mod generation;
pub mod publishing;
pub mod search;
pub mod sheets;
pub mod slack;

pub use generation::{Generator, OpenAiGenerator};
pub use publishing::{Publisher, WordPressClient};
pub use search::{LiteratureSearch, PubMedClient};
pub use sheets::{PlannedRow, SheetsClient, TabularSource};
pub use slack::{ChatTransport, SlackClient};
