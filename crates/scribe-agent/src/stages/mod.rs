//! Stage functions.
//!
//! Every stage maps the current `ContentState` to a `StatePatch` and never
//! fails past its own boundary: collaborator errors become `errors` entries
//! (plus a fallback value where one exists) and every invocation appends
//! exactly one `agent_logs` entry.

pub mod editor;
pub mod planner;
pub mod researcher;
pub mod seo;
pub mod writer;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use scribe_core::config::{RetrievalConfig, StageTuning};
use scribe_core::error::{Result, ScribeError};
use scribe_core::traits::{GenerationWorker, SimilaritySearch};
use scribe_core::types::{AgentLog, GenerationRequest, Stage};
use scribe_core::{ContentState, StatePatch};

/// Runs one stage against a state snapshot.
///
/// The executor only talks to stages through this trait, so tests can swap
/// in scripted stages.
pub trait StageRunner: Send + Sync {
    fn run<'a>(&'a self, stage: Stage, state: &'a ContentState) -> BoxFuture<'a, StatePatch>;
}

/// Collaborators and tunables shared by all stages of a run.
#[derive(Clone)]
pub struct StageContext {
    pub worker: Arc<dyn GenerationWorker>,
    pub store: Arc<dyn SimilaritySearch>,
    pub tuning: StageTuning,
    pub retrieval: RetrievalConfig,
}

impl StageContext {
    pub fn new(worker: Arc<dyn GenerationWorker>, store: Arc<dyn SimilaritySearch>) -> Self {
        Self {
            worker,
            store,
            tuning: StageTuning::default(),
            retrieval: RetrievalConfig::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: StageTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// A generation request for `stage` at its configured temperature.
    pub(crate) fn request(&self, stage: Stage, system: &str) -> GenerationRequest {
        GenerationRequest::new(stage, system).with_temperature(self.tuning.temperature(stage))
    }
}

impl StageRunner for StageContext {
    fn run<'a>(&'a self, stage: Stage, state: &'a ContentState) -> BoxFuture<'a, StatePatch> {
        Box::pin(async move {
            match stage {
                Stage::Planner => planner::run(self, state).await,
                Stage::Researcher => researcher::run(self, state).await,
                Stage::Writer => writer::run(self, state).await,
                Stage::Editor => editor::run(self, state).await,
                Stage::Seo => seo::run(self, state).await,
            }
        })
    }
}

/// Patch carrying a single stage failure and its log entry.
pub(crate) fn failure_patch(stage: Stage, error: &ScribeError) -> StatePatch {
    let mut patch = StatePatch::new();
    patch.push_error(stage.error_message(error));
    patch.push_log(AgentLog::new(
        stage,
        serde_json::json!({ "error": error.to_string() }),
    ));
    patch
}

/// Extract a JSON object from a response that may wrap it in markdown fences.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    brace_span(trimmed).unwrap_or(trimmed)
}

/// The outermost `{...}` span of `text`, if any.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a structured generation response into `T`.
///
/// The response is tried as strict JSON first, so fenced code inside string
/// values survives. Fenced and embedded objects are fallbacks.
pub(crate) fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();
    let strict_err = match serde_json::from_str(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    let fenced = extract_json(trimmed);
    if fenced != trimmed {
        if let Ok(value) = serde_json::from_str(fenced) {
            return Ok(value);
        }
    }
    if let Some(span) = brace_span(trimmed) {
        if let Ok(value) = serde_json::from_str(span) {
            return Ok(value);
        }
    }
    Err(ScribeError::GenerationParse(strict_err.to_string()))
}
