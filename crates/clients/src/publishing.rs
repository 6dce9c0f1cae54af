//! Publishing backend (WordPress REST API)
//!
//! Publishing embeds an HTML-comment marker carrying the article id into the
//! post content. The marker is the idempotency guard: before creating a post
//! the workflow searches for it, and an existing hit is adopted instead of
//! creating a duplicate.

use async_trait::async_trait;
use serde_json::{json, Value};

use draftflow_common::config::WordPressConfig;
use draftflow_common::{Result, WorkflowError, ARTICLE_MARKER_KEY};

/// A post that exists on the publishing backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub id: i64,
    pub url: String,
}

/// Input for creating a post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub category_ids: Vec<i64>,
    pub tag_ids: Vec<i64>,
    pub article_id: String,
}

/// Publishing backend contract.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Look for an already-published post carrying this article's marker.
    async fn find_existing_by_marker(&self, article_id: &str) -> Result<Option<PublishedPost>>;

    /// Resolve category and tag names to term ids, creating missing terms.
    /// Matching is by exact name.
    async fn ensure_terms(&self, categories: &[String], tags: &[String])
        -> Result<(Vec<i64>, Vec<i64>)>;

    /// Create and publish the post. Only HTTP 201 counts as success.
    async fn publish_post(&self, post: &NewPost) -> Result<PublishedPost>;
}

/// The marker comment appended to published content.
pub fn marker_comment(article_id: &str) -> String {
    format!("<!-- {ARTICLE_MARKER_KEY}={article_id} -->")
}

fn marker_text(article_id: &str) -> String {
    format!("{ARTICLE_MARKER_KEY}={article_id}")
}

/// Scan a post-list response for an item whose rendered content carries the
/// marker.
pub fn find_marker_match(items: &Value, article_id: &str) -> Option<PublishedPost> {
    let marker = marker_text(article_id);
    for item in items.as_array()? {
        let rendered = item
            .get("content")
            .and_then(|c| c.get("rendered"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if rendered.contains(&marker) {
            let id = item.get("id").and_then(Value::as_i64)?;
            let url = item.get("link").and_then(Value::as_str).unwrap_or("").to_string();
            return Some(PublishedPost { id, url });
        }
    }
    None
}

/// WordPress REST implementation.
pub struct WordPressClient {
    client: reqwest::Client,
    config: WordPressConfig,
}

impl WordPressClient {
    pub fn new(config: WordPressConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(WorkflowError::Http)?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn posts_url(&self) -> String {
        self.url(&format!("/wp-json/wp/v2/{}", self.config.post_type))
    }

    async fn ensure_term(&self, taxonomy: &str, name: &str) -> Result<Option<i64>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let list_url = self.url(&format!("/wp-json/wp/v2/{taxonomy}"));

        let resp = self
            .client
            .get(&list_url)
            .query(&[("search", name), ("per_page", "100")])
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .send()
            .await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Publishing {
                message: format!("term search HTTP {status}: {body}"),
            });
        }

        let items: Value = resp.json().await?;
        if let Some(items) = items.as_array() {
            for item in items {
                let existing = item.get("name").and_then(Value::as_str).unwrap_or("").trim();
                if existing == name {
                    return Ok(item.get("id").and_then(Value::as_i64));
                }
            }
        }

        let resp = self
            .client
            .post(&list_url)
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .json(&json!({ "name": name }))
            .send()
            .await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Publishing {
                message: format!("term create HTTP {status}: {body}"),
            });
        }

        let created: Value = resp.json().await?;
        Ok(created.get("id").and_then(Value::as_i64))
    }
}

#[async_trait]
impl Publisher for WordPressClient {
    async fn find_existing_by_marker(&self, article_id: &str) -> Result<Option<PublishedPost>> {
        let article_id = article_id.trim();
        if article_id.is_empty() {
            return Ok(None);
        }

        let search = marker_text(article_id);
        let resp = self
            .client
            .get(self.posts_url())
            .query(&[("search", search.as_str()), ("per_page", "20")])
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .send()
            .await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Publishing {
                message: format!("find_existing HTTP {status}: {body}"),
            });
        }

        let items: Value = resp.json().await?;
        Ok(find_marker_match(&items, article_id))
    }

    async fn ensure_terms(
        &self,
        categories: &[String],
        tags: &[String],
    ) -> Result<(Vec<i64>, Vec<i64>)> {
        let mut category_ids = Vec::new();
        for name in categories {
            if let Some(id) = self.ensure_term("categories", name).await? {
                category_ids.push(id);
            }
        }
        let mut tag_ids = Vec::new();
        for name in tags {
            if let Some(id) = self.ensure_term("tags", name).await? {
                tag_ids.push(id);
            }
        }
        Ok((category_ids, tag_ids))
    }

    async fn publish_post(&self, post: &NewPost) -> Result<PublishedPost> {
        let content = format!(
            "{}\n\n{}\n",
            post.content.trim(),
            marker_comment(&post.article_id)
        );

        let mut payload = json!({
            "status": "publish",
            "title": post.title,
            "slug": post.slug,
            "content": content,
        });
        if !post.category_ids.is_empty() {
            payload["categories"] = json!(post.category_ids);
        }
        if !post.tag_ids.is_empty() {
            payload["tags"] = json!(post.tag_ids);
        }

        let resp = self
            .client
            .post(self.posts_url())
            .basic_auth(&self.config.username, Some(&self.config.app_password))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status != reqwest::StatusCode::CREATED {
            let body = resp.text().await.unwrap_or_default();
            return Err(WorkflowError::Publishing {
                message: format!("publish HTTP {status}: {body}"),
            });
        }

        let created: Value = resp.json().await?;
        let id = created.get("id").and_then(Value::as_i64).unwrap_or(0);
        let url = created
            .get("link")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if id == 0 || url.is_empty() {
            return Err(WorkflowError::Publishing {
                message: "publish returned invalid response".into(),
            });
        }

        Ok(PublishedPost { id, url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_comment_format() {
        assert_eq!(
            marker_comment("ART-20240601-abc123"),
            "<!-- SEO_WORKFLOW_ARTICLE_ID=ART-20240601-abc123 -->"
        );
    }

    #[test]
    fn test_find_marker_match_scans_rendered_content() {
        let items = json!([
            {
                "id": 10,
                "link": "https://blog.example.com/other",
                "content": {"rendered": "<p>unrelated</p>"}
            },
            {
                "id": 11,
                "link": "https://blog.example.com/hit",
                "content": {"rendered": "<p>body</p><!-- SEO_WORKFLOW_ARTICLE_ID=ART-1 -->"}
            }
        ]);
        let hit = find_marker_match(&items, "ART-1").unwrap();
        assert_eq!(
            hit,
            PublishedPost {
                id: 11,
                url: "https://blog.example.com/hit".into()
            }
        );
    }

    #[test]
    fn test_find_marker_match_misses() {
        let items = json!([
            {
                "id": 12,
                "link": "https://blog.example.com/other",
                "content": {"rendered": "<!-- SEO_WORKFLOW_ARTICLE_ID=ART-other -->"}
            }
        ]);
        assert!(find_marker_match(&items, "ART-1").is_none());
        // Non-list payloads yield no match.
        assert!(find_marker_match(&json!({"error": "x"}), "ART-1").is_none());
    }
}
