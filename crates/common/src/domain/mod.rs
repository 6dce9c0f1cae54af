//! Article domain model
//!
//! Provides:
//! - The workflow `Phase` state machine enum with defensive decoding
//! - `ArticleState`, the sole persistent entity (one document per article)
//! - Paper candidate records captured from literature search
//! - Normalized inbound chat-action types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Workflow phase: exactly one value at any time.
///
/// Stored as a string in the record document. Decoding an unrecognized value
/// yields [`Phase::Error`] rather than failing the load; a corrupt record must
/// never crash the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    OutlineGenerating,
    OutlineReview,
    OutlineWaitingFeedback,
    OutlineConfirmed,

    PaperSearching,
    PaperReview,
    PaperWaitingFeedback,
    // Retained for decode compatibility with old records.
    PaperConfirmed,

    BodyGenerating,
    BodyReview,
    BodyWaitingFeedback,

    FinalReview,
    ReadyToPublish,
    Publishing,
    Published,
    Discarded,

    #[serde(other)]
    Error,
}

impl Phase {
    /// The stored string form of this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::OutlineGenerating => "OUTLINE_GENERATING",
            Phase::OutlineReview => "OUTLINE_REVIEW",
            Phase::OutlineWaitingFeedback => "OUTLINE_WAITING_FEEDBACK",
            Phase::OutlineConfirmed => "OUTLINE_CONFIRMED",
            Phase::PaperSearching => "PAPER_SEARCHING",
            Phase::PaperReview => "PAPER_REVIEW",
            Phase::PaperWaitingFeedback => "PAPER_WAITING_FEEDBACK",
            Phase::PaperConfirmed => "PAPER_CONFIRMED",
            Phase::BodyGenerating => "BODY_GENERATING",
            Phase::BodyReview => "BODY_REVIEW",
            Phase::BodyWaitingFeedback => "BODY_WAITING_FEEDBACK",
            Phase::FinalReview => "FINAL_REVIEW",
            Phase::ReadyToPublish => "READY_TO_PUBLISH",
            Phase::Publishing => "PUBLISHING",
            Phase::Published => "PUBLISHED",
            Phase::Discarded => "DISCARDED",
            Phase::Error => "ERROR",
        }
    }

    /// Check whether this phase is terminal (the record is retained but the
    /// workflow never leaves it).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Published | Phase::Discarded)
    }

    /// Check whether this phase accepts thread-reply feedback.
    pub fn is_waiting_feedback(&self) -> bool {
        matches!(
            self,
            Phase::OutlineWaitingFeedback | Phase::PaperWaitingFeedback | Phase::BodyWaitingFeedback
        )
    }
}

impl From<&str> for Phase {
    fn from(s: &str) -> Self {
        match s.trim() {
            "OUTLINE_GENERATING" => Phase::OutlineGenerating,
            "OUTLINE_REVIEW" => Phase::OutlineReview,
            "OUTLINE_WAITING_FEEDBACK" => Phase::OutlineWaitingFeedback,
            "OUTLINE_CONFIRMED" => Phase::OutlineConfirmed,
            "PAPER_SEARCHING" => Phase::PaperSearching,
            "PAPER_REVIEW" => Phase::PaperReview,
            "PAPER_WAITING_FEEDBACK" => Phase::PaperWaitingFeedback,
            "PAPER_CONFIRMED" => Phase::PaperConfirmed,
            "BODY_GENERATING" => Phase::BodyGenerating,
            "BODY_REVIEW" => Phase::BodyReview,
            "BODY_WAITING_FEEDBACK" => Phase::BodyWaitingFeedback,
            "FINAL_REVIEW" => Phase::FinalReview,
            "READY_TO_PUBLISH" => Phase::ReadyToPublish,
            "PUBLISHING" => Phase::Publishing,
            "PUBLISHED" => Phase::Published,
            "DISCARDED" => Phase::Discarded,
            _ => Phase::Error,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Phase {
    fn default() -> Self {
        // A document without a phase is corrupt.
        Phase::Error
    }
}

fn default_phase() -> Phase {
    Phase::default()
}

/// One literature-search candidate. Candidate ids (PMIDs) are ephemeral per
/// search cycle: a selection is only valid against the stored candidate list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PaperCandidate {
    pub pmid: String,
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub url: String,
}

/// The persistent article record. One document per article, keyed by
/// `article_id`, mutated exclusively through the record store's update
/// primitive.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ArticleState {
    // Identity
    pub article_id: String,
    pub keyword: String,
    pub planned_date: String,

    /// Read-only row snapshot captured best-effort at start time.
    pub sheet_snapshot: Option<Map<String, Value>>,

    // Workflow
    #[serde(default = "default_phase")]
    pub phase: Phase,

    // Chat linkage
    pub slack_channel_id: String,
    pub slack_last_message_ts: Option<String>,
    /// Sole correlation key between an inbound thread reply and a waiting
    /// article. Set entering a WAITING_FEEDBACK phase, cleared on any other
    /// transition.
    pub slack_revision_thread_ts: Option<String>,

    // Outline stage
    pub outline_text: Option<String>,
    pub outline_feedback_text: Option<String>,
    pub outline_revision_count: u32,

    // Paper stage
    pub pubmed_query: Option<String>,
    pub paper_candidates: Vec<PaperCandidate>,
    pub selected_pmid: Option<String>,
    pub selected_paper: Option<PaperCandidate>,
    pub paper_feedback_text: Option<String>,
    pub paper_revision_count: u32,

    // Body stage
    pub body_text: Option<String>,
    pub body_feedback_text: Option<String>,
    pub body_revision_count: u32,

    // Publish artifacts (unset until publish succeeds)
    pub wp_post_id: Option<i64>,
    pub wp_post_url: Option<String>,
    pub wp_title: Option<String>,
    pub wp_slug: Option<String>,
    pub wp_categories: Vec<String>,
    pub wp_tags: Vec<String>,

    // Error + retry (all set together, all cleared together)
    pub error_prev_phase: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub error_user_message: Option<String>,
    pub error_occurred_at: Option<String>,
    pub retry_available_until: Option<String>,

    // Timestamps (JST ISO-8601)
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub phase_updated_at: Option<String>,
}

impl ArticleState {
    /// Initial record for a newly started article.
    pub fn new(
        article_id: impl Into<String>,
        keyword: impl Into<String>,
        planned_date: impl Into<String>,
        slack_channel_id: impl Into<String>,
    ) -> Self {
        Self {
            article_id: article_id.into(),
            keyword: keyword.into(),
            planned_date: planned_date.into(),
            slack_channel_id: slack_channel_id.into(),
            phase: Phase::OutlineGenerating,
            ..Default::default()
        }
    }

    /// Decode a stored document defensively: unknown phases become ERROR,
    /// missing fields take defaults, unknown fields are ignored.
    pub fn from_doc(doc: Value) -> Self {
        serde_json::from_value(doc).unwrap_or_else(|_| ArticleState {
            phase: Phase::Error,
            ..Default::default()
        })
    }

    /// Encode this record as a stored document.
    pub fn to_doc(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Resolve a candidate by pmid from the stored candidate list.
    pub fn find_candidate(&self, pmid: &str) -> Option<&PaperCandidate> {
        let pmid = pmid.trim();
        if pmid.is_empty() {
            return None;
        }
        self.paper_candidates.iter().find(|c| c.pmid == pmid)
    }
}

/// Action ids attached to interactive chat elements. One closed set used both
/// when building notification blocks and when dispatching inbound actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionId {
    CreateArticle,
    SkipArticle,
    ApproveOutline,
    ReviseOutline,
    SelectPaper,
    RevisePaper,
    ApproveBody,
    ReviseBody,
    FinalApprove,
    FinalDiscard,
    ConfirmPublish,
    Retry,
}

impl ActionId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::CreateArticle => "create_article",
            ActionId::SkipArticle => "skip_article",
            ActionId::ApproveOutline => "approve_outline",
            ActionId::ReviseOutline => "revise_outline",
            ActionId::SelectPaper => "select_paper",
            ActionId::RevisePaper => "revise_paper",
            ActionId::ApproveBody => "approve_body",
            ActionId::ReviseBody => "revise_body",
            ActionId::FinalApprove => "final_approve",
            ActionId::FinalDiscard => "final_discard",
            ActionId::ConfirmPublish => "confirm_publish",
            ActionId::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "create_article" => Some(ActionId::CreateArticle),
            "skip_article" => Some(ActionId::SkipArticle),
            "approve_outline" => Some(ActionId::ApproveOutline),
            "revise_outline" => Some(ActionId::ReviseOutline),
            "select_paper" => Some(ActionId::SelectPaper),
            "revise_paper" => Some(ActionId::RevisePaper),
            "approve_body" => Some(ActionId::ApproveBody),
            "revise_body" => Some(ActionId::ReviseBody),
            "final_approve" => Some(ActionId::FinalApprove),
            "final_discard" => Some(ActionId::FinalDiscard),
            "confirm_publish" => Some(ActionId::ConfirmPublish),
            "retry" => Some(ActionId::Retry),
            _ => None,
        }
    }
}

/// Normalized inbound chat action, as delivered by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatAction {
    pub action_id: String,
    pub value: String,
    pub channel_id: String,
    pub message_ts: String,
}

/// The decoded value of a chat action element.
///
/// Depending on the UI element, the raw value is either a plain string (a
/// keyword) or a JSON-encoded object carrying an article id and possibly a
/// candidate id. Normalization is deterministic and applied once, before any
/// transition dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    Text(String),
    Article {
        article_id: String,
        candidate_id: Option<String>,
    },
}

impl ActionPayload {
    /// Normalize a raw action value.
    ///
    /// - Plain strings are trimmed and returned as text.
    /// - JSON objects carrying `article_id` become `Article`, taking the
    ///   candidate id from `pmid` or `candidate_id` when present.
    /// - JSON objects without an article id are probed for `keyword` then
    ///   `value`; a JSON string is unwrapped.
    pub fn normalize(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return ActionPayload::Text(String::new());
        }

        let parsed: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return ActionPayload::Text(raw.to_string()),
        };

        match parsed {
            Value::Object(obj) => {
                if let Some(article_id) = non_empty_str(obj.get("article_id")) {
                    let candidate_id = non_empty_str(obj.get("pmid"))
                        .or_else(|| non_empty_str(obj.get("candidate_id")));
                    return ActionPayload::Article {
                        article_id,
                        candidate_id,
                    };
                }
                for key in ["keyword", "value"] {
                    if let Some(s) = non_empty_str(obj.get(key)) {
                        return ActionPayload::Text(s);
                    }
                }
                ActionPayload::Text(raw.to_string())
            }
            Value::String(s) if !s.trim().is_empty() => ActionPayload::Text(s.trim().to_string()),
            _ => ActionPayload::Text(raw.to_string()),
        }
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    let s = v?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_roundtrip() {
        for p in [
            Phase::OutlineGenerating,
            Phase::PaperReview,
            Phase::ReadyToPublish,
            Phase::Error,
        ] {
            assert_eq!(Phase::from(p.as_str()), p);
        }
    }

    #[test]
    fn test_unknown_phase_decodes_to_error() {
        let state = ArticleState::from_doc(json!({
            "article_id": "ART-20240601-abc123",
            "phase": "SOMETHING_NEW"
        }));
        assert_eq!(state.phase, Phase::Error);
        assert_eq!(state.article_id, "ART-20240601-abc123");
    }

    #[test]
    fn test_missing_phase_decodes_to_error() {
        let state = ArticleState::from_doc(json!({ "article_id": "a" }));
        assert_eq!(state.phase, Phase::Error);
    }

    #[test]
    fn test_partial_doc_takes_defaults() {
        let state = ArticleState::from_doc(json!({
            "article_id": "a",
            "keyword": "高血圧",
            "phase": "OUTLINE_REVIEW",
            "outline_text": "1. はじめに"
        }));
        assert_eq!(state.phase, Phase::OutlineReview);
        assert_eq!(state.outline_revision_count, 0);
        assert!(state.paper_candidates.is_empty());
        assert!(state.slack_revision_thread_ts.is_none());
    }

    #[test]
    fn test_candidate_abstract_field_name() {
        let state = ArticleState::from_doc(json!({
            "article_id": "a",
            "phase": "PAPER_REVIEW",
            "paper_candidates": [
                {"pmid": "111", "title": "t", "abstract": "abs", "url": "u"}
            ]
        }));
        assert_eq!(state.paper_candidates[0].abstract_text, "abs");
        assert!(state.find_candidate("111").is_some());
        assert!(state.find_candidate("222").is_none());
        assert!(state.find_candidate("").is_none());
    }

    #[test]
    fn test_payload_plain_text() {
        assert_eq!(
            ActionPayload::normalize("  高血圧 "),
            ActionPayload::Text("高血圧".into())
        );
    }

    #[test]
    fn test_payload_article_object() {
        let p = ActionPayload::normalize(r#"{"article_id":"ART-1","pmid":"999"}"#);
        assert_eq!(
            p,
            ActionPayload::Article {
                article_id: "ART-1".into(),
                candidate_id: Some("999".into()),
            }
        );
    }

    #[test]
    fn test_payload_keyword_object() {
        let p = ActionPayload::normalize(r#"{"keyword":"高血圧","planned_date":"2024-06-01"}"#);
        assert_eq!(p, ActionPayload::Text("高血圧".into()));
    }

    #[test]
    fn test_payload_json_string() {
        assert_eq!(
            ActionPayload::normalize(r#""ART-1""#),
            ActionPayload::Text("ART-1".into())
        );
    }

    #[test]
    fn test_action_id_roundtrip() {
        for id in [
            ActionId::CreateArticle,
            ActionId::SelectPaper,
            ActionId::ConfirmPublish,
            ActionId::Retry,
        ] {
            assert_eq!(ActionId::parse(id.as_str()), Some(id));
        }
        assert_eq!(ActionId::parse("unknown_action"), None);
    }
}
