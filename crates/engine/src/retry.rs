//! Error recording and operator-driven retry
//!
//! A failed transition records what was interrupted and when, then offers a
//! retry affordance valid for a configured window. Retry restores the
//! interrupted phase and re-runs its unit of work with revision counts
//! untouched. Failures inside the error path itself are logged and swallowed;
//! there is no second level of recovery.

use serde_json::{json, Value};

use draftflow_clients::blocks;
use draftflow_common::domain::{ArticleState, Phase};
use draftflow_common::{time, Result, WorkflowError};

use crate::engine::{patch, WorkflowEngine};
use crate::stage;

/// Record fields that exist only while the article sits in ERROR.
const ERROR_FIELDS: &[&str] = &[
    "error_prev_phase",
    "error_type",
    "error_message",
    "error_user_message",
    "error_occurred_at",
    "retry_available_until",
];

/// Unit of work a retry resumes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeWork {
    Outline,
    Paper,
    Body,
    Publish,
}

/// Pick the furthest-advanced resumable work from the artifacts present.
fn infer_resume(state: &ArticleState) -> ResumeWork {
    if state.body_text.is_some() {
        ResumeWork::Publish
    } else if state.selected_pmid.is_some() {
        ResumeWork::Body
    } else if state.outline_text.is_some() {
        ResumeWork::Paper
    } else {
        ResumeWork::Outline
    }
}

fn resume_phase(work: ResumeWork) -> Phase {
    match work {
        ResumeWork::Outline => Phase::OutlineGenerating,
        ResumeWork::Paper => Phase::PaperSearching,
        ResumeWork::Body => Phase::BodyGenerating,
        ResumeWork::Publish => Phase::Publishing,
    }
}

impl WorkflowEngine {
    /// Record a transition failure on the article and notify the operator.
    ///
    /// Never fails: every step here is best-effort, since this already runs
    /// on the failure path.
    pub(crate) async fn handle_error(
        &self,
        article_id: &str,
        prev_phase: Phase,
        err: WorkflowError,
    ) {
        let error_type = err.error_type();
        let detail = err.to_string();
        tracing::error!(
            article_id,
            error_type,
            prev_phase = %prev_phase,
            detail = %detail,
            "workflow transition failed"
        );

        // Reload is best-effort: a store outage must not stop the notice.
        let state = self.store.get(article_id).await.ok().flatten();

        if state.is_some() {
            let updates = patch([
                ("error_prev_phase", json!(prev_phase.as_str())),
                ("error_type", json!(error_type)),
                ("error_message", json!(detail)),
                ("error_user_message", json!(err.user_message())),
                ("error_occurred_at", json!(time::now_jst_iso())),
                (
                    "retry_available_until",
                    json!(time::add_days_jst_iso(
                        self.settings.workflow.retry_window_days
                    )),
                ),
                ("slack_revision_thread_ts", Value::Null),
                ("phase", json!(Phase::Error)),
            ]);
            if let Err(e) = self.store.update(article_id, updates).await {
                tracing::error!(article_id, error = %e, "failed to record error state");
            }
        }

        let channel = state
            .as_ref()
            .map(|s| s.slack_channel_id.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.settings.notify_channel.clone());
        if let Err(e) = self
            .post(
                &channel,
                err.user_message(),
                Some(blocks::error_notice(article_id)),
                None,
            )
            .await
        {
            tracing::error!(article_id, error = %e, "failed to post error notice");
        }
    }

    /// Operator pressed retry on an errored article.
    pub async fn retry(&self, article_id: &str) {
        if let Err(e) = self.retry_inner(article_id).await {
            self.handle_error(article_id, Phase::Error, e).await;
        }
    }

    async fn retry_inner(&self, article_id: &str) -> Result<()> {
        let state = self.load(article_id).await?;

        let until = state.retry_available_until.as_deref().unwrap_or("");
        if time::is_expired(until) {
            // Window elapsed: the record stays in ERROR permanently.
            self.post(&state.slack_channel_id, "期限切れです。", None, None)
                .await?;
            return Ok(());
        }

        let prev_raw = state
            .error_prev_phase
            .as_deref()
            .unwrap_or("")
            .trim()
            .to_string();
        if prev_raw.is_empty() {
            self.post(&state.slack_channel_id, "再試行できません。", None, None)
                .await?;
            return Ok(());
        }

        self.store.delete_fields(article_id, ERROR_FIELDS).await?;

        let target = Phase::from(prev_raw.as_str());
        let (restore, work) = match target {
            Phase::OutlineGenerating => (target, ResumeWork::Outline),
            Phase::PaperSearching => (target, ResumeWork::Paper),
            Phase::BodyGenerating => (target, ResumeWork::Body),
            Phase::Publishing => (target, ResumeWork::Publish),
            // Unrecognized phase string on an old record: resume wherever the
            // artifacts say the article actually got to.
            Phase::Error => {
                let work = infer_resume(&state);
                (resume_phase(work), work)
            }
            other => (other, infer_resume(&state)),
        };

        self.store
            .update(article_id, patch([("phase", json!(restore))]))
            .await?;

        match work {
            ResumeWork::Outline => self.spawn_stage(&stage::OUTLINE, article_id),
            ResumeWork::Paper => self.spawn_stage(&stage::PAPER, article_id),
            ResumeWork::Body => self.spawn_stage(&stage::BODY, article_id),
            ResumeWork::Publish => self.spawn_publish(article_id),
        }
        Ok(())
    }
}
