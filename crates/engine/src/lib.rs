//! DraftFlow Workflow Engine
//!
//! Drives the article pipeline: outline → paper selection → body → publish,
//! with human approval gates in between. The engine owns no I/O of its own;
//! every external effect goes through a capability trait so the whole state
//! machine can be exercised with test doubles.
//!
//! Transition handlers never propagate errors to their trigger source. Each
//! one catches failures at its outer boundary, records them on the article,
//! and posts a retry affordance instead.

mod dispatch;
mod engine;
mod retry;
pub mod spawn;
pub mod stage;

#[cfg(test)]
mod testutil;

pub use dispatch::NotifySummary;
pub use engine::{EngineSettings, WorkflowEngine};
