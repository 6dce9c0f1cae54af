//! Shared test doubles for the engine test modules.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use draftflow_clients::publishing::{NewPost, PublishedPost, Publisher};
use draftflow_clients::{ChatTransport, Generator, LiteratureSearch, PlannedRow, TabularSource};
use draftflow_common::domain::{ArticleState, PaperCandidate, Phase};
use draftflow_common::{MemoryStore, RecordStore, Result, WorkflowError};

use crate::engine::{EngineSettings, WorkflowEngine};

#[derive(Default)]
pub(crate) struct MockGenerator {
    fail_outline: AtomicBool,
}

impl MockGenerator {
    pub fn fail_outline(&self) {
        self.fail_outline.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate_outline(
        &self,
        keyword: &str,
        _prev_outline: Option<&str>,
        _feedback: Option<&str>,
        _revision_count: u32,
    ) -> Result<String> {
        if self.fail_outline.load(Ordering::SeqCst) {
            return Err(WorkflowError::Generation {
                message: "mock outline failure".into(),
            });
        }
        Ok(format!("1. {keyword}とは\n2. 原因\n3. 治療\n4. まとめ"))
    }

    async fn generate_query(
        &self,
        _keyword: &str,
        _outline_text: &str,
        _feedback: Option<&str>,
        _revision_count: u32,
    ) -> Result<String> {
        Ok("hypertension[Title/Abstract] AND treatment".into())
    }

    async fn generate_body(
        &self,
        _keyword: &str,
        _outline_text: &str,
        selected_paper: &PaperCandidate,
        _prev_body: Option<&str>,
        _feedback: Option<&str>,
        _revision_count: u32,
    ) -> Result<String> {
        Ok(format!("本文です。(PMID: {})", selected_paper.pmid))
    }

    async fn generate_title_and_slug(
        &self,
        _keyword: &str,
        _outline_text: &str,
        _body_text: &str,
    ) -> Result<(String, String)> {
        Ok(("高血圧の基礎知識".into(), "hypertension-basics".into()))
    }

    async fn generate_categories_and_tags(
        &self,
        keyword: &str,
        _outline_text: &str,
        _body_text: &str,
    ) -> Result<(Vec<String>, Vec<String>)> {
        Ok((vec!["医療".into()], vec![keyword.into()]))
    }
}

#[derive(Default)]
pub(crate) struct MockSearch;

#[async_trait]
impl LiteratureSearch for MockSearch {
    async fn fetch_top_abstracts(
        &self,
        _query: &str,
        retmax: usize,
    ) -> Result<Vec<PaperCandidate>> {
        let mut candidates = vec![
            PaperCandidate {
                pmid: "11111111".into(),
                title: "Blood pressure control in adults".into(),
                abstract_text: "Background and results.".into(),
                url: "https://pubmed.ncbi.nlm.nih.gov/11111111/".into(),
            },
            PaperCandidate {
                pmid: "22222222".into(),
                title: "Hypertension treatment outcomes".into(),
                abstract_text: "Outcomes overview.".into(),
                url: "https://pubmed.ncbi.nlm.nih.gov/22222222/".into(),
            },
        ];
        candidates.truncate(retmax);
        Ok(candidates)
    }
}

#[derive(Default)]
pub(crate) struct MockPublisher {
    created: Mutex<Vec<NewPost>>,
}

impl MockPublisher {
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn find_existing_by_marker(&self, article_id: &str) -> Result<Option<PublishedPost>> {
        let created = self.created.lock().unwrap();
        Ok(created
            .iter()
            .position(|p| p.article_id == article_id)
            .map(|i| PublishedPost {
                id: 100 + i as i64,
                url: format!("https://blog.example.com/?p={}", 100 + i),
            }))
    }

    async fn ensure_terms(
        &self,
        categories: &[String],
        tags: &[String],
    ) -> Result<(Vec<i64>, Vec<i64>)> {
        Ok((
            (1..=categories.len() as i64).collect(),
            (1..=tags.len() as i64).collect(),
        ))
    }

    async fn publish_post(&self, post: &NewPost) -> Result<PublishedPost> {
        let mut created = self.created.lock().unwrap();
        let id = 100 + created.len() as i64;
        created.push(post.clone());
        Ok(PublishedPost {
            id,
            url: format!("https://blog.example.com/?p={id}"),
        })
    }
}

#[derive(Default)]
pub(crate) struct MockSheets {
    rows: Mutex<Vec<PlannedRow>>,
}

impl MockSheets {
    pub fn push_row(&self, keyword: &str, planned_date: &str) {
        self.rows.lock().unwrap().push(PlannedRow {
            keyword: keyword.into(),
            planned_date: planned_date.into(),
        });
    }
}

#[async_trait]
impl TabularSource for MockSheets {
    async fn planned_rows_for(&self, date: &str) -> Result<Vec<PlannedRow>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.planned_date == date)
            .cloned()
            .collect())
    }

    async fn snapshot_for(&self, keyword: &str, date: &str) -> Option<Map<String, Value>> {
        let mut snapshot = Map::new();
        snapshot.insert("keyword".into(), json!(keyword));
        snapshot.insert("planned_date".into(), json!(date));
        Some(snapshot)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PostedMessage {
    pub channel: String,
    pub text: String,
    pub thread_ts: Option<String>,
    pub blocks: Option<Value>,
}

#[derive(Default)]
pub(crate) struct MockChat {
    messages: Mutex<Vec<PostedMessage>>,
    counter: AtomicU64,
}

impl MockChat {
    pub fn messages(&self) -> Vec<PostedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn saw_text(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.text.contains(needle))
    }
}

#[async_trait]
impl ChatTransport for MockChat {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<Value>,
        thread_ts: Option<&str>,
    ) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(PostedMessage {
            channel: channel.to_string(),
            text: text.to_string(),
            thread_ts: thread_ts.map(str::to_string),
            blocks,
        });
        Ok(format!("1700000000.{n:06}"))
    }
}

/// Full engine wiring over in-memory doubles.
pub(crate) struct TestHarness {
    pub settings: EngineSettings,
    pub store: Arc<MemoryStore>,
    pub generator: Arc<MockGenerator>,
    pub search: Arc<MockSearch>,
    pub publisher: Arc<MockPublisher>,
    pub planning: Arc<MockSheets>,
    pub chat: Arc<MockChat>,
    seed_counter: AtomicU64,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            settings: EngineSettings {
                workflow: Default::default(),
                notify_channel: "C012345".into(),
            },
            store: Arc::new(MemoryStore::new()),
            generator: Arc::new(MockGenerator::default()),
            search: Arc::new(MockSearch),
            publisher: Arc::new(MockPublisher::default()),
            planning: Arc::new(MockSheets::default()),
            chat: Arc::new(MockChat::default()),
            seed_counter: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> WorkflowEngine {
        WorkflowEngine::new(
            self.settings.clone(),
            self.store.clone(),
            self.generator.clone(),
            self.search.clone(),
            self.publisher.clone(),
            self.planning.clone(),
            self.chat.clone(),
        )
    }

    pub async fn state(&self, article_id: &str) -> ArticleState {
        self.store
            .get(article_id)
            .await
            .unwrap()
            .expect("seeded article exists")
    }

    pub async fn set_field(&self, article_id: &str, key: &str, value: Value) {
        let mut update = Map::new();
        update.insert(key.to_string(), value);
        self.store.update(article_id, update).await.unwrap();
    }

    pub async fn seed_article(&self, phase: Phase) -> String {
        let n = self.seed_counter.fetch_add(1, Ordering::SeqCst);
        let article_id = format!("ART-20240601-{n:06}");
        let state = ArticleState::new(&article_id, "高血圧", "2024-06-01", "C012345");
        self.store.create(&state).await.unwrap();
        self.set_field(&article_id, "phase", json!(phase)).await;
        article_id
    }

    pub async fn seed_publishable_article(&self) -> String {
        let article_id = self.seed_article(Phase::Publishing).await;
        self.set_field(&article_id, "outline_text", json!("1. はじめに")).await;
        self.set_field(&article_id, "body_text", json!("本文です。")).await;
        self.set_field(&article_id, "selected_pmid", json!("11111111")).await;
        self.set_field(
            &article_id,
            "selected_paper",
            json!({"pmid": "11111111", "title": "t", "abstract": "a", "url": "u"}),
        )
        .await;
        article_id
    }

    pub async fn store_len(&self) -> usize {
        self.store.len().await
    }
}

/// Let spawned background units run to completion on the test runtime.
pub(crate) async fn drain() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
