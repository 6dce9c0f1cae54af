//! Stage parameterization
//!
//! Outline, paper, and body follow the same shape: generate an artifact, post
//! it for review, loop through revision feedback, advance on approval. One
//! [`StageSpec`] per stage captures the differences (phases, record fields,
//! texts, ceiling behavior) so the engine has a single implementation of each
//! operation instead of three forks.

use draftflow_common::domain::{ArticleState, Phase};

/// Which artifact a stage produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Outline,
    Paper,
    Body,
}

/// What happens when a revision is requested at the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeilingPolicy {
    /// Move to FINAL_REVIEW and offer approve-or-discard.
    FinalReview,
    /// Keep the phase and tell the operator to pick from the existing
    /// candidates. Paper search never dead-ends the article.
    PickExisting,
}

/// Static description of one review stage.
pub struct StageSpec {
    pub kind: StageKind,
    pub generating: Phase,
    pub review: Phase,
    pub waiting: Phase,
    pub ceiling: CeilingPolicy,
    /// Record field holding the pending feedback text.
    pub feedback_field: &'static str,
    /// Record field holding the revision count.
    pub count_field: &'static str,
    /// Posted with the review notification.
    pub review_prompt: &'static str,
    /// Posted into the feedback thread when a revision is requested.
    pub revise_prompt: &'static str,
    /// Posted when feedback is accepted and the stage re-runs.
    pub feedback_ack: &'static str,
}

pub static OUTLINE: StageSpec = StageSpec {
    kind: StageKind::Outline,
    generating: Phase::OutlineGenerating,
    review: Phase::OutlineReview,
    waiting: Phase::OutlineWaitingFeedback,
    ceiling: CeilingPolicy::FinalReview,
    feedback_field: "outline_feedback_text",
    count_field: "outline_revision_count",
    review_prompt: "構成案を作成しました。承認または修正指示をお願いします。",
    revise_prompt: "構成案の修正指示をこのスレッドに返信してください。",
    feedback_ack: "修正指示を受け取りました。構成案を再生成します。",
};

pub static PAPER: StageSpec = StageSpec {
    kind: StageKind::Paper,
    generating: Phase::PaperSearching,
    review: Phase::PaperReview,
    waiting: Phase::PaperWaitingFeedback,
    ceiling: CeilingPolicy::PickExisting,
    feedback_field: "paper_feedback_text",
    count_field: "paper_revision_count",
    review_prompt: "論文候補を取得しました。選択または修正指示をお願いします。",
    revise_prompt: "論文検索の修正指示をこのスレッドに返信してください。",
    feedback_ack: "修正指示を受け取りました。論文候補を再取得します。",
};

pub static BODY: StageSpec = StageSpec {
    kind: StageKind::Body,
    generating: Phase::BodyGenerating,
    review: Phase::BodyReview,
    waiting: Phase::BodyWaitingFeedback,
    ceiling: CeilingPolicy::FinalReview,
    feedback_field: "body_feedback_text",
    count_field: "body_revision_count",
    review_prompt: "本文を作成しました。承認または修正指示をお願いします。",
    revise_prompt: "本文の修正指示をこのスレッドに返信してください。",
    feedback_ack: "修正指示を受け取りました。本文を再生成します。",
};

impl StageSpec {
    /// Resolve the stage waiting on feedback in the given phase.
    pub fn for_waiting_phase(phase: Phase) -> Option<&'static StageSpec> {
        match phase {
            Phase::OutlineWaitingFeedback => Some(&OUTLINE),
            Phase::PaperWaitingFeedback => Some(&PAPER),
            Phase::BodyWaitingFeedback => Some(&BODY),
            _ => None,
        }
    }

    /// Current revision count on the record.
    pub fn revision_count(&self, state: &ArticleState) -> u32 {
        match self.kind {
            StageKind::Outline => state.outline_revision_count,
            StageKind::Paper => state.paper_revision_count,
            StageKind::Body => state.body_revision_count,
        }
    }

    /// Pending feedback text on the record.
    pub fn feedback<'a>(&self, state: &'a ArticleState) -> Option<&'a str> {
        match self.kind {
            StageKind::Outline => state.outline_feedback_text.as_deref(),
            StageKind::Paper => state.paper_feedback_text.as_deref(),
            StageKind::Body => state.body_feedback_text.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiting_phase_resolution() {
        assert_eq!(
            StageSpec::for_waiting_phase(Phase::OutlineWaitingFeedback).map(|s| s.kind),
            Some(StageKind::Outline)
        );
        assert_eq!(
            StageSpec::for_waiting_phase(Phase::PaperWaitingFeedback).map(|s| s.kind),
            Some(StageKind::Paper)
        );
        assert_eq!(
            StageSpec::for_waiting_phase(Phase::BodyWaitingFeedback).map(|s| s.kind),
            Some(StageKind::Body)
        );
        assert!(StageSpec::for_waiting_phase(Phase::OutlineReview).is_none());
    }

    #[test]
    fn test_stage_fields_are_distinct() {
        let specs = [&OUTLINE, &PAPER, &BODY];
        for (i, a) in specs.iter().enumerate() {
            for b in specs.iter().skip(i + 1) {
                assert_ne!(a.feedback_field, b.feedback_field);
                assert_ne!(a.count_field, b.count_field);
                assert_ne!(a.generating, b.generating);
            }
        }
    }

    #[test]
    fn test_ceiling_policies() {
        assert_eq!(OUTLINE.ceiling, CeilingPolicy::FinalReview);
        assert_eq!(BODY.ceiling, CeilingPolicy::FinalReview);
        assert_eq!(PAPER.ceiling, CeilingPolicy::PickExisting);
    }

    #[test]
    fn test_revision_count_reads_matching_field() {
        let state = ArticleState {
            outline_revision_count: 1,
            paper_revision_count: 2,
            body_revision_count: 3,
            ..Default::default()
        };
        assert_eq!(OUTLINE.revision_count(&state), 1);
        assert_eq!(PAPER.revision_count(&state), 2);
        assert_eq!(BODY.revision_count(&state), 3);
    }
}
