//! Background unit supervision
//!
//! Units of work (generation, search, publish) run detached from the trigger
//! that started them. A panicking unit must not take the process down or
//! poison anything; it is logged and dropped. Workflow-level failures never
//! reach this layer, the transition handlers record those on the article.

use std::future::Future;

use futures::FutureExt;

/// Spawn a fire-and-forget unit of work.
pub fn spawn_unit<F>(name: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(unit = name, detail = %detail, "background unit panicked");
        }
    });
}
