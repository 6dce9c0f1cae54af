//! Workflow engine core
//!
//! One method per transition. Every public transition method is a
//! fire-and-forget boundary: it resolves to `()` and routes any failure into
//! the error/retry subsystem instead of propagating it to the trigger source
//! (a chat click or thread reply has nobody to return an error to).
//!
//! Record writes go through merge patches; a patch carrying `phase` moves the
//! machine, everything else is bookkeeping.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use draftflow_clients::publishing::NewPost;
use draftflow_clients::{blocks, ChatTransport, Generator, LiteratureSearch, Publisher, TabularSource};
use draftflow_common::config::WorkflowConfig;
use draftflow_common::domain::{ArticleState, PaperCandidate, Phase};
use draftflow_common::{time, RecordStore, Result, WorkflowError};

use crate::spawn::spawn_unit;
use crate::stage::{self, CeilingPolicy, StageKind, StageSpec};

pub(crate) const CEILING_FINAL_REVIEW_TEXT: &str =
    "修正回数が上限に達しました。破棄または承認を選択してください。";
pub(crate) const CEILING_PICK_EXISTING_TEXT: &str =
    "論文検索の修正は上限に達しました。候補から選択してください。";
pub(crate) const STALE_CANDIDATE_TEXT: &str =
    "選択された論文が候補に見つかりません。最新の候補から選択してください。";

/// Engine-facing configuration slice.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub workflow: WorkflowConfig,
    /// Channel for notifications not tied to an article's own channel.
    pub notify_channel: String,
}

/// The workflow engine. Cheap to clone; clones share all capability handles.
#[derive(Clone)]
pub struct WorkflowEngine {
    pub(crate) settings: Arc<EngineSettings>,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) generator: Arc<dyn Generator>,
    pub(crate) search: Arc<dyn LiteratureSearch>,
    pub(crate) publisher: Arc<dyn Publisher>,
    pub(crate) planning: Arc<dyn TabularSource>,
    pub(crate) chat: Arc<dyn ChatTransport>,
}

/// Build a merge patch from literal entries.
pub(crate) fn patch<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn RecordStore>,
        generator: Arc<dyn Generator>,
        search: Arc<dyn LiteratureSearch>,
        publisher: Arc<dyn Publisher>,
        planning: Arc<dyn TabularSource>,
        chat: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            store,
            generator,
            search,
            publisher,
            planning,
            chat,
        }
    }

    pub(crate) async fn load(&self, article_id: &str) -> Result<ArticleState> {
        self.store
            .get(article_id)
            .await?
            .ok_or_else(|| WorkflowError::ArticleNotFound {
                article_id: article_id.to_string(),
            })
    }

    pub(crate) async fn post(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<Value>,
        thread_ts: Option<&str>,
    ) -> Result<String> {
        self.chat.post_message(channel, text, blocks, thread_ts).await
    }

    /// Kick off a stage's unit of work in the background.
    pub(crate) fn spawn_stage(&self, spec: &'static StageSpec, article_id: &str) {
        let name = match spec.kind {
            StageKind::Outline => "outline_generation",
            StageKind::Paper => "paper_search",
            StageKind::Body => "body_generation",
        };
        let engine = self.clone();
        let id = article_id.to_string();
        spawn_unit(name, async move { engine.run_stage(spec, &id).await });
    }

    pub(crate) fn spawn_publish(&self, article_id: &str) {
        let engine = self.clone();
        let id = article_id.to_string();
        spawn_unit("publish", async move { engine.publish_article(&id).await });
    }

    // -------------------------
    // Article start
    // -------------------------

    pub async fn start_article(&self, keyword: &str, planned_date: &str, channel_id: &str) {
        let article_id = time::generate_article_id(keyword, planned_date);
        if let Err(e) = self
            .start_article_inner(keyword, planned_date, channel_id)
            .await
        {
            self.handle_error(&article_id, Phase::OutlineGenerating, e)
                .await;
        }
    }

    async fn start_article_inner(
        &self,
        keyword: &str,
        planned_date: &str,
        channel_id: &str,
    ) -> Result<()> {
        let keyword = keyword.trim();
        let planned_date = time::normalize_ymd(planned_date);
        if keyword.is_empty() || planned_date.is_empty() {
            return Ok(());
        }

        // Best-effort baseline of the planning row.
        let snapshot = self.planning.snapshot_for(keyword, &planned_date).await;

        let article_id = time::generate_article_id(keyword, &planned_date);
        let mut state = ArticleState::new(&article_id, keyword, &planned_date, channel_id);
        state.sheet_snapshot = snapshot;
        self.store.create(&state).await?;

        self.post(
            channel_id,
            &format!("記事作成を開始しました。article_id={article_id}"),
            None,
            None,
        )
        .await?;

        self.spawn_stage(&stage::OUTLINE, &article_id);
        Ok(())
    }

    // -------------------------
    // Stage operations (outline / paper / body)
    // -------------------------

    /// Run a stage's unit of work: produce the artifact and post it for
    /// review.
    pub async fn run_stage(&self, spec: &'static StageSpec, article_id: &str) {
        if let Err(e) = self.run_stage_inner(spec, article_id).await {
            self.handle_error(article_id, spec.generating, e).await;
        }
    }

    async fn run_stage_inner(&self, spec: &'static StageSpec, article_id: &str) -> Result<()> {
        let state = self.load(article_id).await?;
        let feedback = spec.feedback(&state).map(str::to_string);
        let count = spec.revision_count(&state);

        let (updates, review_blocks) = match spec.kind {
            StageKind::Outline => {
                let outline = self
                    .generator
                    .generate_outline(
                        &state.keyword,
                        state.outline_text.as_deref(),
                        feedback.as_deref(),
                        count,
                    )
                    .await?;
                let blocks = blocks::outline_review(article_id, &state.keyword, &outline);
                let updates = patch([
                    ("outline_text", json!(outline)),
                    (spec.feedback_field, Value::Null),
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(spec.review)),
                ]);
                (updates, blocks)
            }
            StageKind::Paper => {
                let query = self
                    .generator
                    .generate_query(
                        &state.keyword,
                        state.outline_text.as_deref().unwrap_or(""),
                        feedback.as_deref(),
                        count,
                    )
                    .await?;
                let candidates = self
                    .search
                    .fetch_top_abstracts(&query, self.settings.workflow.paper_retmax)
                    .await?;
                let blocks = blocks::paper_review(article_id, &state.keyword, &candidates);
                let updates = patch([
                    ("pubmed_query", json!(query)),
                    ("paper_candidates", serde_json::to_value(&candidates)?),
                    (spec.feedback_field, Value::Null),
                    ("selected_pmid", Value::Null),
                    ("selected_paper", Value::Null),
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(spec.review)),
                ]);
                (updates, blocks)
            }
            StageKind::Body => {
                let selected = resolve_selection(&state)?;
                let body = self
                    .generator
                    .generate_body(
                        &state.keyword,
                        state.outline_text.as_deref().unwrap_or(""),
                        &selected,
                        state.body_text.as_deref(),
                        feedback.as_deref(),
                        count,
                    )
                    .await?;
                let blocks = blocks::body_review(article_id, &state.keyword, &body);
                let updates = patch([
                    ("body_text", json!(body)),
                    (spec.feedback_field, Value::Null),
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(spec.review)),
                ]);
                (updates, blocks)
            }
        };

        self.store.update(article_id, updates).await?;

        let ts = self
            .post(
                &state.slack_channel_id,
                spec.review_prompt,
                Some(review_blocks),
                None,
            )
            .await?;
        // Best-effort pointer to the latest review message.
        let _ = self
            .store
            .update(article_id, patch([("slack_last_message_ts", json!(ts))]))
            .await;
        Ok(())
    }

    pub async fn approve_outline(&self, article_id: &str) {
        if let Err(e) = self.approve_outline_inner(article_id).await {
            self.handle_error(article_id, Phase::OutlineReview, e).await;
        }
    }

    async fn approve_outline_inner(&self, article_id: &str) -> Result<()> {
        let state = self.load(article_id).await?;
        self.store
            .update(
                article_id,
                patch([
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(Phase::OutlineConfirmed)),
                ]),
            )
            .await?;
        self.post(
            &state.slack_channel_id,
            "構成案を承認しました。論文候補を取得します。",
            None,
            None,
        )
        .await?;
        self.spawn_stage(&stage::PAPER, article_id);
        Ok(())
    }

    pub async fn approve_body(&self, article_id: &str) {
        if let Err(e) = self.approve_body_inner(article_id).await {
            self.handle_error(article_id, Phase::BodyReview, e).await;
        }
    }

    async fn approve_body_inner(&self, article_id: &str) -> Result<()> {
        let state = self.load(article_id).await?;
        self.store
            .update(
                article_id,
                patch([
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(Phase::ReadyToPublish)),
                ]),
            )
            .await?;
        self.post(
            &state.slack_channel_id,
            "本文を承認しました。投稿しますか？",
            Some(blocks::publish_confirm(article_id)),
            None,
        )
        .await?;
        Ok(())
    }

    /// Operator asked for a revision from a review message. `parent_ts` is
    /// the ts of that message and becomes the feedback thread anchor.
    pub async fn request_revision(
        &self,
        spec: &'static StageSpec,
        article_id: &str,
        parent_ts: &str,
    ) {
        if let Err(e) = self
            .request_revision_inner(spec, article_id, parent_ts)
            .await
        {
            self.handle_error(article_id, spec.review, e).await;
        }
    }

    async fn request_revision_inner(
        &self,
        spec: &'static StageSpec,
        article_id: &str,
        parent_ts: &str,
    ) -> Result<()> {
        let state = self.load(article_id).await?;

        if spec.revision_count(&state) >= self.settings.workflow.max_revisions {
            match spec.ceiling {
                CeilingPolicy::FinalReview => {
                    self.store
                        .update(
                            article_id,
                            patch([
                                ("slack_revision_thread_ts", Value::Null),
                                ("phase", json!(Phase::FinalReview)),
                            ]),
                        )
                        .await?;
                    self.post(
                        &state.slack_channel_id,
                        CEILING_FINAL_REVIEW_TEXT,
                        Some(blocks::final_review(article_id)),
                        None,
                    )
                    .await?;
                }
                CeilingPolicy::PickExisting => {
                    self.post(&state.slack_channel_id, CEILING_PICK_EXISTING_TEXT, None, None)
                        .await?;
                }
            }
            return Ok(());
        }

        self.store
            .update(
                article_id,
                patch([
                    ("slack_revision_thread_ts", json!(parent_ts)),
                    ("phase", json!(spec.waiting)),
                ]),
            )
            .await?;

        self.post(
            &state.slack_channel_id,
            spec.revise_prompt,
            Some(blocks::revision_instruction(spec.revise_prompt)),
            Some(parent_ts),
        )
        .await?;
        Ok(())
    }

    /// Thread reply arrived for a stage waiting on feedback.
    pub async fn receive_feedback(
        &self,
        spec: &'static StageSpec,
        article_id: &str,
        feedback: &str,
    ) {
        if let Err(e) = self.receive_feedback_inner(spec, article_id, feedback).await {
            self.handle_error(article_id, spec.waiting, e).await;
        }
    }

    async fn receive_feedback_inner(
        &self,
        spec: &'static StageSpec,
        article_id: &str,
        feedback: &str,
    ) -> Result<()> {
        let state = self.load(article_id).await?;
        let next_count = spec.revision_count(&state) + 1;

        self.store
            .update(
                article_id,
                patch([
                    (spec.feedback_field, json!(feedback)),
                    (spec.count_field, json!(next_count)),
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(spec.generating)),
                ]),
            )
            .await?;

        self.post(&state.slack_channel_id, spec.feedback_ack, None, None)
            .await?;
        self.spawn_stage(spec, article_id);
        Ok(())
    }

    // -------------------------
    // Paper selection
    // -------------------------

    pub async fn select_paper(&self, article_id: &str, pmid: &str) {
        match self.select_paper_inner(article_id, pmid).await {
            Ok(()) => {}
            // Candidate ids are ephemeral per search cycle. A miss means the
            // click raced a newer candidate list; the record stays untouched.
            Err(WorkflowError::CandidateNotFound { candidate_id }) => {
                tracing::warn!(article_id, candidate_id, "stale candidate selection");
                if let Ok(state) = self.load(article_id).await {
                    let _ = self
                        .post(&state.slack_channel_id, STALE_CANDIDATE_TEXT, None, None)
                        .await;
                }
            }
            Err(e) => self.handle_error(article_id, Phase::PaperReview, e).await,
        }
    }

    async fn select_paper_inner(&self, article_id: &str, pmid: &str) -> Result<()> {
        let state = self.load(article_id).await?;

        let selected = state
            .find_candidate(pmid)
            .cloned()
            .ok_or_else(|| WorkflowError::CandidateNotFound {
                candidate_id: pmid.to_string(),
            })?;

        self.store
            .update(
                article_id,
                patch([
                    ("selected_pmid", json!(selected.pmid)),
                    ("selected_paper", serde_json::to_value(&selected)?),
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(Phase::BodyGenerating)),
                ]),
            )
            .await?;

        self.post(
            &state.slack_channel_id,
            &format!("論文を選択しました（PMID={}）。本文を生成します。", selected.pmid),
            None,
            None,
        )
        .await?;
        self.spawn_stage(&stage::BODY, article_id);
        Ok(())
    }

    // -------------------------
    // Final review resolution
    // -------------------------

    /// Approve at FINAL_REVIEW: resume at the most advanced stage that has
    /// data.
    pub async fn final_approve(&self, article_id: &str) {
        if let Err(e) = self.final_approve_inner(article_id).await {
            self.handle_error(article_id, Phase::FinalReview, e).await;
        }
    }

    async fn final_approve_inner(&self, article_id: &str) -> Result<()> {
        let state = self.load(article_id).await?;
        let channel = state.slack_channel_id.clone();

        if state.body_text.is_some() {
            self.store
                .update(
                    article_id,
                    patch([
                        ("slack_revision_thread_ts", Value::Null),
                        ("phase", json!(Phase::ReadyToPublish)),
                    ]),
                )
                .await?;
            self.post(
                &channel,
                "最終承認しました。投稿しますか？",
                Some(blocks::publish_confirm(article_id)),
                None,
            )
            .await?;
            return Ok(());
        }

        if state.selected_pmid.is_some() {
            self.store
                .update(
                    article_id,
                    patch([
                        ("slack_revision_thread_ts", Value::Null),
                        ("phase", json!(Phase::BodyGenerating)),
                    ]),
                )
                .await?;
            self.post(&channel, "最終承認しました。本文を生成します。", None, None)
                .await?;
            self.spawn_stage(&stage::BODY, article_id);
            return Ok(());
        }

        if state.outline_text.is_some() {
            self.store
                .update(
                    article_id,
                    patch([
                        ("slack_revision_thread_ts", Value::Null),
                        ("phase", json!(Phase::PaperSearching)),
                    ]),
                )
                .await?;
            self.post(&channel, "最終承認しました。論文候補を取得します。", None, None)
                .await?;
            self.spawn_stage(&stage::PAPER, article_id);
            return Ok(());
        }

        self.store
            .update(
                article_id,
                patch([
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(Phase::OutlineGenerating)),
                ]),
            )
            .await?;
        self.post(&channel, "最終承認しました。構成案を生成します。", None, None)
            .await?;
        self.spawn_stage(&stage::OUTLINE, article_id);
        Ok(())
    }

    pub async fn final_discard(&self, article_id: &str) {
        if let Err(e) = self.final_discard_inner(article_id).await {
            self.handle_error(article_id, Phase::FinalReview, e).await;
        }
    }

    async fn final_discard_inner(&self, article_id: &str) -> Result<()> {
        let state = self.load(article_id).await?;
        self.store
            .update(
                article_id,
                patch([
                    ("slack_revision_thread_ts", Value::Null),
                    ("phase", json!(Phase::Discarded)),
                ]),
            )
            .await?;
        self.post(
            &state.slack_channel_id,
            "破棄しました。",
            Some(blocks::discarded(article_id)),
            None,
        )
        .await?;
        Ok(())
    }

    // -------------------------
    // Publish
    // -------------------------

    pub async fn confirm_publish(&self, article_id: &str) {
        if let Err(e) = self.confirm_publish_inner(article_id).await {
            self.handle_error(article_id, Phase::ReadyToPublish, e).await;
        }
    }

    async fn confirm_publish_inner(&self, article_id: &str) -> Result<()> {
        let state = self.load(article_id).await?;
        self.store
            .update(article_id, patch([("phase", json!(Phase::Publishing))]))
            .await?;
        self.post(&state.slack_channel_id, "投稿処理を開始します。", None, None)
            .await?;
        self.spawn_publish(article_id);
        Ok(())
    }

    pub async fn publish_article(&self, article_id: &str) {
        if let Err(e) = self.publish_article_inner(article_id).await {
            self.handle_error(article_id, Phase::Publishing, e).await;
        }
    }

    async fn publish_article_inner(&self, article_id: &str) -> Result<()> {
        let state = self.load(article_id).await?;

        // Marker guard: a previous attempt may have created the post before
        // failing to record it. Adopt instead of duplicating.
        if let Some(existing) = self.publisher.find_existing_by_marker(article_id).await? {
            self.store
                .update(
                    article_id,
                    patch([
                        ("wp_post_id", json!(existing.id)),
                        ("wp_post_url", json!(existing.url)),
                        ("phase", json!(Phase::Published)),
                    ]),
                )
                .await?;
            self.post(
                &state.slack_channel_id,
                "投稿が完了しました。",
                Some(blocks::published(article_id, &existing.url)),
                None,
            )
            .await?;
            return Ok(());
        }

        resolve_selection(&state)?;

        let outline = state.outline_text.as_deref().unwrap_or("");
        let body = state.body_text.as_deref().unwrap_or("");

        let (title, slug) = self
            .generator
            .generate_title_and_slug(&state.keyword, outline, body)
            .await?;
        let (categories, tags) = self
            .generator
            .generate_categories_and_tags(&state.keyword, outline, body)
            .await?;
        let (category_ids, tag_ids) = self.publisher.ensure_terms(&categories, &tags).await?;

        let created = self
            .publisher
            .publish_post(&NewPost {
                title: title.clone(),
                slug: slug.clone(),
                content: body.to_string(),
                category_ids,
                tag_ids,
                article_id: article_id.to_string(),
            })
            .await?;

        self.store
            .update(
                article_id,
                patch([
                    ("wp_post_id", json!(created.id)),
                    ("wp_post_url", json!(created.url)),
                    ("wp_title", json!(title)),
                    ("wp_slug", json!(slug)),
                    ("wp_categories", json!(categories)),
                    ("wp_tags", json!(tags)),
                    ("phase", json!(Phase::Published)),
                ]),
            )
            .await?;

        self.post(
            &state.slack_channel_id,
            "投稿が完了しました。",
            Some(blocks::published(article_id, &created.url)),
            None,
        )
        .await?;
        Ok(())
    }
}

/// Resolve the selected paper: the stored selection, falling back to a
/// candidate-list lookup by pmid.
pub(crate) fn resolve_selection(state: &ArticleState) -> Result<PaperCandidate> {
    if let Some(selected) = state.selected_paper.clone() {
        return Ok(selected);
    }
    state
        .selected_pmid
        .as_deref()
        .and_then(|pmid| state.find_candidate(pmid))
        .cloned()
        .ok_or(WorkflowError::MissingSelection)
}
