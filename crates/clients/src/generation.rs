//! Text generation backend (OpenAI chat completions)
//!
//! Five generation operations drive the workflow: outline, search query,
//! body, title/slug, and categories/tags. Each operation validates its own
//! output shape; the empty-output policy is deliberately per-operation
//! (outline/query/body must be non-empty, title/slug must decode, taxonomy
//! falls back to defaults).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use draftflow_common::config::OpenAiConfig;
use draftflow_common::{PaperCandidate, Result, WorkflowError};

const DEFAULT_CATEGORY: &str = "医療";
const MAX_CATEGORIES: usize = 2;
const MAX_TAGS: usize = 6;

/// Generation backend contract.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate_outline(
        &self,
        keyword: &str,
        prev_outline: Option<&str>,
        feedback: Option<&str>,
        revision_count: u32,
    ) -> Result<String>;

    async fn generate_query(
        &self,
        keyword: &str,
        outline_text: &str,
        feedback: Option<&str>,
        revision_count: u32,
    ) -> Result<String>;

    async fn generate_body(
        &self,
        keyword: &str,
        outline_text: &str,
        selected_paper: &PaperCandidate,
        prev_body: Option<&str>,
        feedback: Option<&str>,
        revision_count: u32,
    ) -> Result<String>;

    async fn generate_title_and_slug(
        &self,
        keyword: &str,
        outline_text: &str,
        body_text: &str,
    ) -> Result<(String, String)>;

    async fn generate_categories_and_tags(
        &self,
        keyword: &str,
        outline_text: &str,
        body_text: &str,
    ) -> Result<(Vec<String>, Vec<String>)>;
}

/// OpenAI chat-completions implementation.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: OpenAiConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(WorkflowError::Http)?;
        Ok(Self { client, config })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.api_base);
        let payload = json!({
            "model": self.config.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkflowError::Generation {
                message: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Generation {
                message: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| WorkflowError::Generation {
            message: format!("invalid response: {e}"),
        })?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(content)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate_outline(
        &self,
        keyword: &str,
        prev_outline: Option<&str>,
        feedback: Option<&str>,
        revision_count: u32,
    ) -> Result<String> {
        let system = "You are an assistant that drafts Japanese article outlines.\n\
                      Return plain text only. Do not use Markdown.\n\
                      Write a clear outline with numbered headings.\n";

        let mut user = format!("キーワード: {keyword}\n修正回数: {revision_count}\n");
        if let Some(prev) = prev_outline {
            user.push_str(&format!("\n前回の構成案:\n{prev}\n"));
        }
        if let Some(fb) = feedback {
            user.push_str(&format!("\n修正指示:\n{fb}\n"));
        }
        user.push_str(
            "\n要件:\n\
             - 医療系の記事を想定\n\
             - 見出しは過不足なく、読み手にとって自然な流れ\n\
             - 文章は日本語\n\
             - Markdownは禁止（記号を多用しない）\n\
             \n構成案を作成してください。",
        );

        let out = self.chat(system, &user).await?;
        if out.is_empty() {
            return Err(WorkflowError::Generation {
                message: "empty outline".into(),
            });
        }
        Ok(out)
    }

    async fn generate_query(
        &self,
        keyword: &str,
        outline_text: &str,
        feedback: Option<&str>,
        revision_count: u32,
    ) -> Result<String> {
        let system = "You are an assistant that creates PubMed search queries.\n\
                      Return ONLY a PubMed query string (no extra text).\n\
                      Avoid extremely broad queries.\n";

        let mut user = format!(
            "キーワード: {keyword}\n修正回数: {revision_count}\n\n記事構成:\n{outline_text}\n"
        );
        if let Some(fb) = feedback {
            user.push_str(&format!("\n修正指示:\n{fb}\n"));
        }
        user.push_str(
            "\n要件:\n\
             - PubMed(term) に使えるクエリ文字列を1つ\n\
             - 臨床系の関連論文が出るようにする\n\
             - 結果が広すぎないようにする\n\
             - 返答はクエリ文字列のみ\n",
        );

        let raw = self.chat(system, &user).await?;
        let query = raw.trim().trim_matches('"').trim().to_string();
        if query.is_empty() {
            return Err(WorkflowError::Generation {
                message: "empty search query".into(),
            });
        }
        Ok(query)
    }

    async fn generate_body(
        &self,
        keyword: &str,
        outline_text: &str,
        selected_paper: &PaperCandidate,
        prev_body: Option<&str>,
        feedback: Option<&str>,
        revision_count: u32,
    ) -> Result<String> {
        let system = "You are an assistant that drafts Japanese medical articles.\n\
                      Return plain text only. Do not use Markdown.\n\
                      Use the outline as structure.\n\
                      Cite paper in a simple way like: (PMID: XXXXXXXX).\n";

        let mut user = format!(
            "キーワード: {keyword}\n修正回数: {revision_count}\n\n構成:\n{outline_text}\n\n\
             参照論文:\nPMID: {}\nTitle: {}\nAbstract:\n{}\n",
            selected_paper.pmid, selected_paper.title, selected_paper.abstract_text
        );
        if let Some(prev) = prev_body {
            user.push_str(&format!("\n前回の本文:\n{prev}\n"));
        }
        if let Some(fb) = feedback {
            user.push_str(&format!("\n修正指示:\n{fb}\n"));
        }
        user.push_str(
            "\n要件:\n\
             - 構成に沿って本文を作成\n\
             - 可能な範囲で論文の知見を反映\n\
             - 誇張しない。論文に無いことは断定しない\n\
             - Markdown禁止\n\
             - 文章は自然な日本語\n\
             \n本文を作成してください。",
        );

        let out = self.chat(system, &user).await?;
        if out.is_empty() {
            return Err(WorkflowError::Generation {
                message: "empty body".into(),
            });
        }
        Ok(out)
    }

    async fn generate_title_and_slug(
        &self,
        keyword: &str,
        outline_text: &str,
        body_text: &str,
    ) -> Result<(String, String)> {
        let system = "You are an assistant that outputs JSON only.\n\
                      Return ONLY JSON with keys: title_ja, slug_en.\n\
                      slug_en must be lowercase, hyphen-separated, ascii.\n";

        let body_head: String = body_text.chars().take(2000).collect();
        let user = format!(
            "キーワード: {keyword}\n\n構成:\n{outline_text}\n\n本文:\n{body_head}\n\n\
             要件:\n\
             - title_ja は日本語の自然なタイトル\n\
             - slug_en は英語の短いslug\n\
             - JSONのみで返す\n"
        );

        let raw = self.chat(system, &user).await?;
        parse_title_and_slug(&raw)
    }

    async fn generate_categories_and_tags(
        &self,
        keyword: &str,
        outline_text: &str,
        body_text: &str,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let system = "You are an assistant that outputs JSON only.\n\
                      Return ONLY JSON with keys: categories, tags.\n\
                      categories and tags are arrays of Japanese strings.\n\
                      Avoid too many items.\n";

        let body_head: String = body_text.chars().take(1500).collect();
        let user = format!(
            "キーワード: {keyword}\n\n構成:\n{outline_text}\n\n本文:\n{body_head}\n\n\
             要件:\n\
             - categories: 1〜2個\n\
             - tags: 3〜6個\n\
             - すべて日本語\n\
             - JSONのみで返す\n"
        );

        let raw = self.chat(system, &user).await?;
        Ok(parse_categories_and_tags(&raw, keyword))
    }
}

/// Parse a model response expected to be a JSON object. Tolerates text around
/// the object (code fences, prose) by falling back to the outermost braces.
fn loose_json_object(raw: &str) -> Map<String, Value> {
    let raw = raw.trim();
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) {
        return obj;
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&raw[start..=end]) {
                return obj;
            }
        }
    }
    Map::new()
}

fn parse_title_and_slug(raw: &str) -> Result<(String, String)> {
    let obj = loose_json_object(raw);
    let title = obj
        .get("title_ja")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    let slug = obj
        .get("slug_en")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if title.is_empty() || slug.is_empty() {
        return Err(WorkflowError::Generation {
            message: "invalid title/slug json".into(),
        });
    }
    Ok((title, slug))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_categories_and_tags(raw: &str, keyword: &str) -> (Vec<String>, Vec<String>) {
    let obj = loose_json_object(raw);
    let mut categories = string_list(obj.get("categories"));
    let mut tags = string_list(obj.get("tags"));

    if categories.is_empty() {
        categories = vec![DEFAULT_CATEGORY.to_string()];
    }
    if tags.is_empty() {
        tags = vec![keyword.to_string()];
    }

    categories.truncate(MAX_CATEGORIES);
    tags.truncate(MAX_TAGS);
    (categories, tags)
}
