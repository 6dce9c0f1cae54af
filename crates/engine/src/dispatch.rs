//! Inbound trigger dispatch
//!
//! Routes normalized chat actions, thread replies, and the daily planning job
//! into the matching transition. Anything that doesn't resolve to a known
//! action and article is dropped with a log line; inbound delivery is
//! at-least-once and unmatched triggers are expected.

use std::collections::HashSet;

use serde::Serialize;

use draftflow_clients::{blocks, PlannedRow};
use draftflow_common::domain::{ActionId, ActionPayload, ChatAction};
use draftflow_common::{time, Result};

use crate::engine::WorkflowEngine;
use crate::stage::{self, StageSpec};

/// Outcome of a planning notification run.
#[derive(Debug, Clone, Serialize)]
pub struct NotifySummary {
    pub count: usize,
    pub planned: Vec<PlannedRow>,
}

fn article_target(payload: ActionPayload) -> Option<(String, Option<String>)> {
    match payload {
        ActionPayload::Article {
            article_id,
            candidate_id,
        } => Some((article_id, candidate_id)),
        // Some buttons historically carried the bare article id.
        ActionPayload::Text(s) if !s.is_empty() => Some((s, None)),
        ActionPayload::Text(_) => None,
    }
}

impl WorkflowEngine {
    /// Dispatch one normalized chat action.
    pub async fn process_action(&self, action: ChatAction) {
        let Some(action_id) = ActionId::parse(&action.action_id) else {
            tracing::warn!(action_id = %action.action_id, "unknown action id");
            return;
        };
        let payload = ActionPayload::normalize(&action.value);

        match action_id {
            ActionId::CreateArticle => {
                let ActionPayload::Text(keyword) = payload else {
                    return;
                };
                if keyword.is_empty() {
                    return;
                }
                self.start_article(&keyword, &time::today_jst_ymd(), &action.channel_id)
                    .await;
            }
            ActionId::SkipArticle => {
                let ActionPayload::Text(keyword) = payload else {
                    return;
                };
                if let Err(e) = self
                    .post(
                        &action.channel_id,
                        &format!("スキップしました: {keyword}"),
                        None,
                        None,
                    )
                    .await
                {
                    tracing::warn!(error = %e, "skip notice failed");
                }
            }
            ActionId::ApproveOutline => {
                if let Some((id, _)) = article_target(payload) {
                    self.approve_outline(&id).await;
                }
            }
            ActionId::ReviseOutline => {
                if let Some((id, _)) = article_target(payload) {
                    self.request_revision(&stage::OUTLINE, &id, &action.message_ts)
                        .await;
                }
            }
            ActionId::SelectPaper => {
                if let Some((id, Some(pmid))) = article_target(payload) {
                    self.select_paper(&id, &pmid).await;
                }
            }
            ActionId::RevisePaper => {
                if let Some((id, _)) = article_target(payload) {
                    self.request_revision(&stage::PAPER, &id, &action.message_ts)
                        .await;
                }
            }
            ActionId::ApproveBody => {
                if let Some((id, _)) = article_target(payload) {
                    self.approve_body(&id).await;
                }
            }
            ActionId::ReviseBody => {
                if let Some((id, _)) = article_target(payload) {
                    self.request_revision(&stage::BODY, &id, &action.message_ts)
                        .await;
                }
            }
            ActionId::FinalApprove => {
                if let Some((id, _)) = article_target(payload) {
                    self.final_approve(&id).await;
                }
            }
            ActionId::FinalDiscard => {
                if let Some((id, _)) = article_target(payload) {
                    self.final_discard(&id).await;
                }
            }
            ActionId::ConfirmPublish => {
                if let Some((id, _)) = article_target(payload) {
                    self.confirm_publish(&id).await;
                }
            }
            ActionId::Retry => {
                if let Some((id, _)) = article_target(payload) {
                    self.retry(&id).await;
                }
            }
        }
    }

    /// Dispatch a thread reply. Only replies into an open feedback thread of
    /// an article actually waiting on feedback count; everything else is
    /// silently ignored.
    pub async fn process_thread_message(&self, thread_ts: &str, text: &str) {
        let thread_ts = thread_ts.trim();
        if thread_ts.is_empty() {
            return;
        }

        let state = match self.store.find_by_revision_thread(thread_ts).await {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "thread lookup failed");
                return;
            }
        };

        let feedback = text.trim();
        if feedback.is_empty() {
            return;
        }

        let Some(spec) = StageSpec::for_waiting_phase(state.phase) else {
            return;
        };
        self.receive_feedback(spec, &state.article_id, feedback).await;
    }

    /// Daily planning job: notify today's planned keywords with a start
    /// affordance, unless the daily article cap is already reached.
    pub async fn notify_planned(&self) -> Result<NotifySummary> {
        let today = time::today_jst_ymd();
        let rows = self.planning.planned_rows_for(&today).await?;

        // De-dupe by (keyword, date), first occurrence wins.
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let planned: Vec<PlannedRow> = rows
            .into_iter()
            .filter(|r| {
                !r.keyword.is_empty()
                    && !r.planned_date.is_empty()
                    && seen.insert((r.keyword.clone(), r.planned_date.clone()))
            })
            .collect();

        if !planned.is_empty() {
            let count = self.store.count_for_date(&today).await?;
            if count >= self.settings.workflow.daily_max_articles {
                self.post(
                    &self.settings.notify_channel,
                    &format!(
                        "本日分の記事作成は上限（{}件）に達しています。通知をスキップします。",
                        self.settings.workflow.daily_max_articles
                    ),
                    None,
                    None,
                )
                .await?;
                return Ok(NotifySummary {
                    count: 0,
                    planned: Vec::new(),
                });
            }
        }

        for row in &planned {
            self.post(
                &self.settings.notify_channel,
                &format!("本日の記事予定: {} ({})", row.keyword, row.planned_date),
                Some(blocks::notify_planned(&row.keyword, &row.planned_date)),
                None,
            )
            .await?;
        }

        Ok(NotifySummary {
            count: planned.len(),
            planned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{drain, TestHarness};
    use draftflow_common::domain::Phase;
    use draftflow_common::{ArticleState, RecordStore};
    use serde_json::json;

    fn action(action_id: &str, value: &str) -> ChatAction {
        ChatAction {
            action_id: action_id.into(),
            value: value.into(),
            channel_id: "C012345".into(),
            message_ts: "1700000000.000500".into(),
        }
    }

    #[tokio::test]
    async fn test_create_action_starts_article() {
        let h = TestHarness::new();
        let engine = h.engine();

        engine
            .process_action(action(
                "create_article",
                r#"{"keyword":"高血圧","planned_date":"2024-06-01"}"#,
            ))
            .await;
        drain().await;

        let today = time::today_jst_ymd();
        let id = time::generate_article_id("高血圧", &today);
        let state = h.state(&id).await;
        assert_eq!(state.keyword, "高血圧");
        assert_eq!(state.phase, Phase::OutlineReview);
    }

    #[tokio::test]
    async fn test_skip_action_posts_notice_only() {
        let h = TestHarness::new();
        let engine = h.engine();

        engine.process_action(action("skip_article", "高血圧")).await;
        drain().await;

        assert!(h.chat.saw_text("スキップしました: 高血圧"));
        assert_eq!(h.store_len().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_action_is_ignored() {
        let h = TestHarness::new();
        let engine = h.engine();
        engine.process_action(action("do_something_new", "x")).await;
        drain().await;
        assert!(h.chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_select_action_requires_candidate_id() {
        let h = TestHarness::new();
        let engine = h.engine();
        let id = h.seed_article(Phase::PaperReview).await;

        engine
            .process_action(action("select_paper", &format!(r#"{{"article_id":"{id}"}}"#)))
            .await;
        drain().await;

        assert_eq!(h.state(&id).await.phase, Phase::PaperReview);
    }

    #[tokio::test]
    async fn test_unmatched_thread_reply_is_ignored() {
        let h = TestHarness::new();
        let engine = h.engine();
        let id = h.seed_article(Phase::OutlineReview).await;
        let before = h.state(&id).await;

        engine
            .process_thread_message("1700000000.424242", "修正して")
            .await;
        drain().await;

        let after = h.state(&id).await;
        assert_eq!(after.phase, before.phase);
        assert_eq!(after.updated_at, before.updated_at);
        assert!(h.chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_thread_reply_outside_waiting_phase_is_ignored() {
        let h = TestHarness::new();
        let engine = h.engine();
        let id = h.seed_article(Phase::OutlineReview).await;
        h.set_field(&id, "slack_revision_thread_ts", json!("1700000000.000700"))
            .await;

        engine
            .process_thread_message("1700000000.000700", "修正して")
            .await;
        drain().await;

        assert_eq!(h.state(&id).await.outline_revision_count, 0);
    }

    #[tokio::test]
    async fn test_notify_planned_dedupes_rows() {
        let h = TestHarness::new();
        let today = time::today_jst_ymd();
        h.planning.push_row("高血圧", &today);
        h.planning.push_row("高血圧", &today);
        h.planning.push_row("糖尿病", &today);

        let engine = h.engine();
        let summary = engine.notify_planned().await.unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(h.chat.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_notify_planned_respects_daily_cap() {
        let mut h = TestHarness::new();
        h.settings.workflow.daily_max_articles = 1;
        let today = time::today_jst_ymd();
        h.planning.push_row("高血圧", &today);

        // One article already planned for today.
        let existing = ArticleState::new("ART-EXISTING", "既存", &today, "C012345");
        h.store.create(&existing).await.unwrap();

        let engine = h.engine();
        let summary = engine.notify_planned().await.unwrap();
        assert_eq!(summary.count, 0);
        assert!(summary.planned.is_empty());
        let messages = h.chat.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("上限"));
    }

    #[tokio::test]
    async fn test_notify_planned_empty_sheet_posts_nothing() {
        let h = TestHarness::new();
        let engine = h.engine();
        let summary = engine.notify_planned().await.unwrap();
        assert_eq!(summary.count, 0);
        assert!(h.chat.messages().is_empty());
    }
}
