use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Unique pipeline run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One named unit of work in the content pipeline.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planner,
    Researcher,
    Writer,
    Editor,
    Seo,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Planner,
        Stage::Researcher,
        Stage::Writer,
        Stage::Editor,
        Stage::Seo,
    ];

    /// Name used in error messages (`"<name> error: ..."`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Planner => "Planner",
            Self::Researcher => "Researcher",
            Self::Writer => "Writer",
            Self::Editor => "Editor",
            Self::Seo => "SEO",
        }
    }

    /// Tag written into `agent_logs` entries.
    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Researcher => "researcher",
            Self::Writer => "writer",
            Self::Editor => "editor",
            Self::Seo => "seo",
        }
    }

    /// Format a stage-level failure as it appears in `errors`.
    pub fn error_message(&self, message: impl std::fmt::Display) -> String {
        format!("{} error: {}", self.name(), message)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured planning artifact produced once by the Planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brief {
    pub title: String,
    #[serde(default, alias = "audience")]
    pub target_audience: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default, deserialize_with = "lenient_word_count")]
    pub word_count: u32,
    #[serde(default)]
    pub research_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outline: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seo_keywords: Vec<String>,
}

/// Accepts `800`, `800.0` or `"800"`. Anything else means no target.
fn lenient_word_count<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let count = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(count
        .filter(|c| c.is_finite() && *c >= 0.0)
        .map(|c| c.round().min(u32::MAX as f64) as u32)
        .unwrap_or(0))
}

impl Brief {
    /// Placeholder brief used when planning fails.
    pub fn fallback() -> Self {
        Self {
            title: "Guide to Green Tea".to_string(),
            target_audience: "Health enthusiasts".to_string(),
            tone: "Informative".to_string(),
            word_count: 500,
            research_queries: vec![
                "green tea health benefits".to_string(),
                "green tea antioxidants".to_string(),
                "caffeine in green tea".to_string(),
            ],
            outline: vec![],
            seo_keywords: vec![],
        }
    }
}

/// A scored document returned by the similarity-search store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub score: f32,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: serde_json::Map::new(),
            score: 0.0,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Label used when citing this document: metadata title, then source.
    pub fn source_label(&self) -> &str {
        ["title", "source"]
            .iter()
            .find_map(|k| {
                self.metadata
                    .get(*k)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or("Unknown")
    }

    /// Serialized form used for duplicate detection.
    pub fn dedup_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.content.clone())
    }
}

/// SEO metadata record produced by the SEO stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoMetadata {
    pub title: String,
    pub meta_description: String,
    #[serde(default)]
    pub keywords_used: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub url_slug: String,
}

/// One audit entry appended by every stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLog {
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl AgentLog {
    pub fn new(stage: Stage, payload: serde_json::Value) -> Self {
        Self {
            agent: stage.agent_name().to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Caller input to a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentRequest {
    pub content_request: String,
    #[serde(default)]
    pub settings: Option<HashMap<String, serde_json::Value>>,
}

impl ContentRequest {
    pub fn new(content_request: impl Into<String>) -> Self {
        Self {
            content_request: content_request.into(),
            settings: None,
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// Expected shape of a generation response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// A single call to the generation worker.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub stage: Stage,
    pub system: String,
    /// Labeled inputs rendered into the user message, in order.
    pub variables: Vec<(String, String)>,
    pub temperature: f32,
    pub format: OutputFormat,
}

impl GenerationRequest {
    pub fn new(stage: Stage, system: impl Into<String>) -> Self {
        Self {
            stage,
            system: system.into(),
            variables: vec![],
            temperature: 0.0,
            format: OutputFormat::Text,
        }
    }

    pub fn with_var(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((label.into(), value.into()));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn structured(mut self) -> Self {
        self.format = OutputFormat::Json;
        self
    }

    /// Render the variables as the user message body.
    pub fn render_user(&self) -> String {
        self.variables
            .iter()
            .map(|(label, value)| format!("{}:\n{}", label, value))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Look up a variable by label.
    pub fn var(&self, label: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Pipeline event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Run started.
    RunStarted { run_id: RunId },
    /// A stage invocation began.
    StageStarted { stage: Stage, visit: usize },
    /// A stage invocation finished and its patch was merged.
    StageFinished {
        stage: Stage,
        elapsed_ms: u64,
        errors_added: usize,
    },
    /// An edge predicate picked a route.
    Routed {
        from: Stage,
        route: String,
        to: String,
    },
    /// Run reached a terminal.
    RunComplete {
        run_id: RunId,
        stages_run: usize,
        errors: usize,
    },
}
