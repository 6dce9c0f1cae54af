//! Block Kit message builders
//!
//! Every interactive message the workflow posts is assembled here. Button and
//! select values are compact JSON so the gateway can normalize them back into
//! an [`ActionPayload`](draftflow_common::domain::ActionPayload); free-text
//! content is clipped to stay under Slack's block size limits.

use serde_json::{json, Value};

use draftflow_common::domain::ActionId;
use draftflow_common::PaperCandidate;

const MAX_BLOCK_TEXT: usize = 2800;
const MAX_OPTION_LABEL: usize = 75;
const MAX_ABSTRACT_PREVIEW: usize = 700;
const MAX_CANDIDATES_SHOWN: usize = 3;

fn clip(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn section_mrkdwn(text: &str) -> Value {
    json!({"type": "section", "text": {"type": "mrkdwn", "text": text}})
}

fn section_plain(text: &str) -> Value {
    json!({"type": "section", "text": {"type": "plain_text", "text": text}})
}

fn button(action_id: ActionId, label: &str, value: &Value, style: Option<&str>) -> Value {
    let mut b = json!({
        "type": "button",
        "action_id": action_id.as_str(),
        "text": {"type": "plain_text", "text": label},
        "value": value.to_string(),
    });
    if let Some(style) = style {
        b["style"] = json!(style);
    }
    b
}

fn article_value(article_id: &str) -> Value {
    json!({"article_id": article_id})
}

/// Daily planning notification with start/skip affordances.
pub fn notify_planned(keyword: &str, planned_date: &str) -> Value {
    let value = json!({"keyword": keyword, "planned_date": planned_date});
    json!([
        section_mrkdwn(&format!("*本日作成予定*  {planned_date}\nキーワード: {keyword}")),
        {
            "type": "actions",
            "elements": [
                button(ActionId::CreateArticle, "作成する", &value, None),
                button(ActionId::SkipArticle, "スキップ", &value, None),
            ],
        },
    ])
}

/// Outline review with approve/revise affordances.
pub fn outline_review(article_id: &str, keyword: &str, outline_text: &str) -> Value {
    let v = article_value(article_id);
    json!([
        section_mrkdwn(&format!("*構成案*  article_id={article_id}\nキーワード: {keyword}")),
        section_plain(&clip(outline_text, MAX_BLOCK_TEXT)),
        {
            "type": "actions",
            "elements": [
                button(ActionId::ApproveOutline, "承認", &v, Some("primary")),
                button(ActionId::ReviseOutline, "修正指示", &v, None),
            ],
        },
    ])
}

/// In-thread instruction posted when a revision thread opens.
pub fn revision_instruction(text: &str) -> Value {
    json!([section_plain(text)])
}

/// Paper candidates with a select element and a revise affordance.
pub fn paper_review(article_id: &str, keyword: &str, candidates: &[PaperCandidate]) -> Value {
    let shown = &candidates[..candidates.len().min(MAX_CANDIDATES_SHOWN)];

    let options: Vec<Value> = shown
        .iter()
        .map(|c| {
            let label = clip(&format!("{}  {}", c.pmid, clip(&c.title, 60)), MAX_OPTION_LABEL);
            json!({
                "text": {"type": "plain_text", "text": label},
                "value": json!({"article_id": article_id, "pmid": c.pmid}).to_string(),
            })
        })
        .collect();

    let mut blocks = vec![section_mrkdwn(&format!(
        "*論文候補*  article_id={article_id}\nキーワード: {keyword}"
    ))];
    for c in shown {
        blocks.push(section_mrkdwn(&format!(
            "PMID: {}\n{}\n{}\n{}",
            c.pmid,
            c.title,
            clip(&c.abstract_text, MAX_ABSTRACT_PREVIEW),
            c.url
        )));
    }
    blocks.push(json!({
        "type": "actions",
        "elements": [
            {
                "type": "static_select",
                "action_id": ActionId::SelectPaper.as_str(),
                "placeholder": {"type": "plain_text", "text": "論文を選択"},
                "options": options,
            },
            button(ActionId::RevisePaper, "修正指示", &article_value(article_id), None),
        ],
    }));
    Value::Array(blocks)
}

/// Body review with approve/revise affordances.
pub fn body_review(article_id: &str, keyword: &str, body_text: &str) -> Value {
    let v = article_value(article_id);
    json!([
        section_mrkdwn(&format!("*本文*  article_id={article_id}\nキーワード: {keyword}")),
        section_plain(&clip(body_text, MAX_BLOCK_TEXT)),
        {
            "type": "actions",
            "elements": [
                button(ActionId::ApproveBody, "承認", &v, Some("primary")),
                button(ActionId::ReviseBody, "修正指示", &v, None),
            ],
        },
    ])
}

/// Final approve-or-discard gate after a revision ceiling.
pub fn final_review(article_id: &str) -> Value {
    let v = article_value(article_id);
    json!([
        section_mrkdwn(&format!("*最終判断*  article_id={article_id}")),
        {
            "type": "actions",
            "elements": [
                button(ActionId::FinalApprove, "承認", &v, Some("primary")),
                button(ActionId::FinalDiscard, "破棄", &v, Some("danger")),
            ],
        },
    ])
}

/// Publish confirmation gate.
pub fn publish_confirm(article_id: &str) -> Value {
    let v = article_value(article_id);
    json!([
        section_mrkdwn(&format!("*投稿前 最終確認*  article_id={article_id}")),
        {
            "type": "actions",
            "elements": [
                button(ActionId::ConfirmPublish, "投稿する", &v, Some("primary")),
            ],
        },
    ])
}

pub fn published(article_id: &str, url: &str) -> Value {
    json!([section_mrkdwn(&format!("*投稿完了*  article_id={article_id}\n{url}"))])
}

pub fn discarded(article_id: &str) -> Value {
    json!([section_mrkdwn(&format!("*破棄*  article_id={article_id}"))])
}

/// Error notice with a retry affordance.
pub fn error_notice(article_id: &str) -> Value {
    json!([
        section_mrkdwn(&format!("*エラー*  article_id={article_id}")),
        {
            "type": "actions",
            "elements": [
                button(ActionId::Retry, "再試行", &article_value(article_id), None),
            ],
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftflow_common::domain::ActionPayload;

    fn candidate(pmid: &str) -> PaperCandidate {
        PaperCandidate {
            pmid: pmid.into(),
            title: format!("Title {pmid}"),
            abstract_text: "abstract".into(),
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"),
        }
    }

    #[test]
    fn test_start_button_value_normalizes_to_keyword() {
        let blocks = notify_planned("高血圧", "2024-06-01");
        let value = blocks[1]["elements"][0]["value"].as_str().unwrap();
        assert_eq!(
            ActionPayload::normalize(value),
            ActionPayload::Text("高血圧".into())
        );
    }

    #[test]
    fn test_select_option_carries_article_and_candidate() {
        let blocks = paper_review("ART-1", "高血圧", &[candidate("111"), candidate("222")]);
        let actions = blocks.as_array().unwrap().last().unwrap();
        let options = actions["elements"][0]["options"].as_array().unwrap();
        assert_eq!(options.len(), 2);

        let value = options[1]["text"]["text"].as_str().unwrap();
        assert!(value.starts_with("222"));
        let payload = ActionPayload::normalize(options[1]["value"].as_str().unwrap());
        assert_eq!(
            payload,
            ActionPayload::Article {
                article_id: "ART-1".into(),
                candidate_id: Some("222".into()),
            }
        );
    }

    #[test]
    fn test_paper_review_clamps_to_three_candidates() {
        let candidates: Vec<_> = ["1", "2", "3", "4"].iter().map(|p| candidate(p)).collect();
        let blocks = paper_review("ART-1", "kw", &candidates);
        // header + three candidate sections + actions
        assert_eq!(blocks.as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_review_blocks_clip_long_text() {
        let long = "あ".repeat(5000);
        let blocks = outline_review("ART-1", "kw", &long);
        let shown = blocks[1]["text"]["text"].as_str().unwrap();
        assert_eq!(shown.chars().count(), MAX_BLOCK_TEXT);
    }

    #[test]
    fn test_error_notice_has_retry_button() {
        let blocks = error_notice("ART-1");
        let b = &blocks[1]["elements"][0];
        assert_eq!(b["action_id"], "retry");
        let payload = ActionPayload::normalize(b["value"].as_str().unwrap());
        assert_eq!(
            payload,
            ActionPayload::Article {
                article_id: "ART-1".into(),
                candidate_id: None,
            }
        );
    }
}
