//! Mocks and fixtures shared by the Scribe test suites.
//!
//! `MockWorker` answers generation requests from per-stage scripts and
//! records every request it sees. `MockStore` serves canned documents per
//! collection and can be told to fail specific collections or queries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;

use scribe_core::error::{Result, ScribeError};
use scribe_core::traits::{GenerationWorker, SimilaritySearch};
use scribe_core::types::{Document, GenerationRequest, Stage};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scripted generation worker.
///
/// Each stage has a queue of responses consumed in order; once the queue is
/// drained the stage's standing response (if any) is returned forever.
#[derive(Default)]
pub struct MockWorker {
    queues: Mutex<HashMap<Stage, VecDeque<Result<String>>>>,
    standing: Mutex<HashMap<Stage, String>>,
    delays: Mutex<HashMap<Stage, Duration>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one successful response for a stage.
    pub fn respond(self, stage: Stage, text: impl Into<String>) -> Self {
        lock(&self.queues)
            .entry(stage)
            .or_default()
            .push_back(Ok(text.into()));
        self
    }

    /// Queue one failure for a stage.
    pub fn fail(self, stage: Stage, message: impl Into<String>) -> Self {
        lock(&self.queues)
            .entry(stage)
            .or_default()
            .push_back(Err(ScribeError::Generation(message.into())));
        self
    }

    /// Response returned whenever the stage's queue is empty.
    pub fn always(self, stage: Stage, text: impl Into<String>) -> Self {
        lock(&self.standing).insert(stage, text.into());
        self
    }

    /// Sleep before answering requests for a stage.
    pub fn delay(self, stage: Stage, delay: Duration) -> Self {
        lock(&self.delays).insert(stage, delay);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    /// Requests received for one stage.
    pub fn requests_for(&self, stage: Stage) -> Vec<GenerationRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }

    pub fn calls(&self, stage: Stage) -> usize {
        lock(&self.requests).iter().filter(|r| r.stage == stage).count()
    }

    fn next_response(&self, stage: Stage) -> Result<String> {
        if let Some(response) = lock(&self.queues).get_mut(&stage).and_then(|q| q.pop_front()) {
            return response;
        }
        lock(&self.standing)
            .get(&stage)
            .cloned()
            .ok_or_else(|| ScribeError::Generation(format!("no scripted response for {}", stage)))
    }
}

impl GenerationWorker for MockWorker {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let stage = request.stage;
            lock(&self.requests).push(request);
            let delay = lock(&self.delays).get(&stage).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.next_response(stage)
        })
    }
}

/// One recorded similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub collection: String,
    pub query: String,
    pub limit: usize,
}

/// In-memory similarity store with canned results.
#[derive(Default)]
pub struct MockStore {
    collections: HashMap<String, Vec<Document>>,
    by_query: HashMap<(String, String), Vec<Document>>,
    failing_collections: HashSet<String>,
    failing_queries: HashSet<String>,
    queries: Mutex<Vec<RecordedQuery>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents returned for any query against `collection`.
    pub fn with_docs(mut self, collection: &str, docs: Vec<Document>) -> Self {
        self.collections.insert(collection.to_string(), docs);
        self
    }

    /// Documents returned for one exact query, taking precedence over `with_docs`.
    pub fn with_query_docs(mut self, collection: &str, query: &str, docs: Vec<Document>) -> Self {
        self.by_query
            .insert((collection.to_string(), query.to_string()), docs);
        self
    }

    pub fn fail_collection(mut self, collection: &str) -> Self {
        self.failing_collections.insert(collection.to_string());
        self
    }

    pub fn fail_query(mut self, query: &str) -> Self {
        self.failing_queries.insert(query.to_string());
        self
    }

    pub fn queries(&self) -> Vec<RecordedQuery> {
        lock(&self.queries).clone()
    }

    pub fn queries_for(&self, collection: &str) -> Vec<String> {
        lock(&self.queries)
            .iter()
            .filter(|q| q.collection == collection)
            .map(|q| q.query.clone())
            .collect()
    }
}

impl SimilaritySearch for MockStore {
    fn query(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Document>>> {
        lock(&self.queries).push(RecordedQuery {
            collection: collection.to_string(),
            query: query.to_string(),
            limit,
        });

        let result = if self.failing_collections.contains(collection)
            || self.failing_queries.contains(query)
        {
            Err(ScribeError::retrieval(collection, "store unavailable"))
        } else {
            let docs = self
                .by_query
                .get(&(collection.to_string(), query.to_string()))
                .or_else(|| self.collections.get(collection))
                .cloned()
                .unwrap_or_default();
            Ok(docs.into_iter().take(limit).collect())
        };
        Box::pin(async move { result })
    }
}

/// Canned generation outputs.
pub mod fixtures {
    use scribe_core::types::Document;

    /// A planner response in the shape the Planner expects.
    pub fn brief_json() -> String {
        serde_json::json!({
            "title": "The Benefits of Green Tea",
            "target_audience": "Health-conscious readers",
            "tone": "Friendly",
            "word_count": 600,
            "research_queries": ["green tea catechins", "green tea and metabolism"],
            "outline": ["Introduction", "Antioxidants", "Metabolism", "Conclusion"],
            "seo_keywords": ["green tea benefits", "catechins"]
        })
        .to_string()
    }

    /// A planner response with no research queries.
    pub fn brief_json_without_queries() -> String {
        serde_json::json!({
            "title": "Green Tea",
            "target_audience": "Everyone",
            "tone": "Casual",
            "word_count": 300,
            "research_queries": []
        })
        .to_string()
    }

    /// An SEO response wrapped in a markdown fence.
    pub fn seo_json() -> String {
        format!(
            "```json\n{}\n```",
            serde_json::json!({
                "optimized_content": "# Green Tea Benefits\n\nOptimized body.",
                "metadata": {
                    "title": "Green Tea Benefits: What Science Says",
                    "meta_description": "Discover the proven benefits of green tea.",
                    "keywords_used": ["green tea benefits", "catechins"],
                    "confidence": 0.85,
                    "url_slug": "green-tea-benefits"
                }
            })
        )
    }

    /// Draft text with exactly `words` words.
    pub fn draft(words: usize) -> String {
        vec!["tea"; words].join(" ")
    }

    pub fn research_doc(title: &str, content: &str) -> Document {
        Document::new(content).with_meta("title", title).with_score(0.9)
    }
}
