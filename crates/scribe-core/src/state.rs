//! Shared pipeline state and the patch merge engine.
//!
//! A `ContentState` is created once per run and mutated only by merging
//! `StatePatch`es returned from stages. Each field declares a `MergePolicy`
//! in `StateField::policy`; `ContentState::apply` consults that table for
//! every field, so a new field needs a policy entry rather than special-case
//! merge code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{AgentLog, Brief, ContentRequest, Document, SeoMetadata};

/// How a patch value is combined with the existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Written only while the slot is still empty.
    SetOnce,
    /// Replaced wholesale.
    Overwrite,
    /// Concatenated onto the existing sequence; order kept, duplicates allowed.
    AppendSequence,
    /// Map entries inserted key by key.
    MergeByKey,
}

/// Every field of the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    ContentRequest,
    Settings,
    Brief,
    ResearchQueries,
    ResearchFindings,
    RetrievedDocuments,
    DraftContent,
    EditedContent,
    EditNotes,
    FinalContent,
    SeoMetadata,
    ConfidenceScores,
    Errors,
    AgentLogs,
}

impl StateField {
    pub const ALL: [StateField; 14] = [
        StateField::ContentRequest,
        StateField::Settings,
        StateField::Brief,
        StateField::ResearchQueries,
        StateField::ResearchFindings,
        StateField::RetrievedDocuments,
        StateField::DraftContent,
        StateField::EditedContent,
        StateField::EditNotes,
        StateField::FinalContent,
        StateField::SeoMetadata,
        StateField::ConfidenceScores,
        StateField::Errors,
        StateField::AgentLogs,
    ];

    pub const fn policy(self) -> MergePolicy {
        match self {
            Self::ContentRequest | Self::Settings => MergePolicy::SetOnce,
            Self::RetrievedDocuments | Self::Errors | Self::AgentLogs => {
                MergePolicy::AppendSequence
            }
            Self::ConfidenceScores => MergePolicy::MergeByKey,
            Self::Brief
            | Self::ResearchQueries
            | Self::ResearchFindings
            | Self::DraftContent
            | Self::EditedContent
            | Self::EditNotes
            | Self::FinalContent
            | Self::SeoMetadata => MergePolicy::Overwrite,
        }
    }
}

/// The single record threaded through every stage of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentState {
    pub content_request: String,
    #[serde(default)]
    pub settings: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub brief: Option<Brief>,
    #[serde(default)]
    pub research_queries: Vec<String>,
    #[serde(default)]
    pub research_findings: Option<String>,
    #[serde(default)]
    pub retrieved_documents: Vec<Document>,
    #[serde(default)]
    pub draft_content: Option<String>,
    #[serde(default)]
    pub edited_content: Option<String>,
    #[serde(default)]
    pub edit_notes: Option<String>,
    #[serde(default)]
    pub final_content: Option<String>,
    #[serde(default)]
    pub seo_metadata: Option<SeoMetadata>,
    #[serde(default)]
    pub confidence_scores: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub agent_logs: Vec<AgentLog>,
}

/// A partial update returned by a stage. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub content_request: Option<String>,
    pub settings: Option<HashMap<String, serde_json::Value>>,
    pub brief: Option<Brief>,
    pub research_queries: Option<Vec<String>>,
    pub research_findings: Option<String>,
    pub retrieved_documents: Option<Vec<Document>>,
    pub draft_content: Option<String>,
    pub edited_content: Option<String>,
    pub edit_notes: Option<String>,
    pub final_content: Option<String>,
    pub seo_metadata: Option<SeoMetadata>,
    pub confidence_scores: Option<HashMap<String, f64>>,
    pub errors: Option<Vec<String>>,
    pub agent_logs: Option<Vec<AgentLog>>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one `errors` entry.
    pub fn push_error(&mut self, error: impl Into<String>) {
        self.errors.get_or_insert_with(Vec::new).push(error.into());
    }

    /// Add one `agent_logs` entry.
    pub fn push_log(&mut self, log: AgentLog) {
        self.agent_logs.get_or_insert_with(Vec::new).push(log);
    }

    /// Set a single confidence score.
    pub fn set_confidence(&mut self, key: impl Into<String>, score: f64) {
        self.confidence_scores
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), score);
    }

    /// Fields this patch touches.
    pub fn fields(&self) -> Vec<StateField> {
        StateField::ALL
            .into_iter()
            .filter(|f| self.touches(*f))
            .collect()
    }

    pub fn touches(&self, field: StateField) -> bool {
        match field {
            StateField::ContentRequest => self.content_request.is_some(),
            StateField::Settings => self.settings.is_some(),
            StateField::Brief => self.brief.is_some(),
            StateField::ResearchQueries => self.research_queries.is_some(),
            StateField::ResearchFindings => self.research_findings.is_some(),
            StateField::RetrievedDocuments => self.retrieved_documents.is_some(),
            StateField::DraftContent => self.draft_content.is_some(),
            StateField::EditedContent => self.edited_content.is_some(),
            StateField::EditNotes => self.edit_notes.is_some(),
            StateField::FinalContent => self.final_content.is_some(),
            StateField::SeoMetadata => self.seo_metadata.is_some(),
            StateField::ConfidenceScores => self.confidence_scores.is_some(),
            StateField::Errors => self.errors.is_some(),
            StateField::AgentLogs => self.agent_logs.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}

impl ContentState {
    /// Fresh state for one run; every stage-produced field empty.
    pub fn new(request: ContentRequest) -> Self {
        Self {
            content_request: request.content_request,
            settings: request.settings,
            ..Self::default()
        }
    }

    /// Merge a patch into this state, field by field, per `StateField::policy`.
    pub fn apply(&mut self, patch: StatePatch) {
        merge_string(
            StateField::ContentRequest.policy(),
            &mut self.content_request,
            patch.content_request,
        );
        merge_option(StateField::Settings.policy(), &mut self.settings, patch.settings);
        merge_option(StateField::Brief.policy(), &mut self.brief, patch.brief);
        merge_sequence(
            StateField::ResearchQueries.policy(),
            &mut self.research_queries,
            patch.research_queries,
        );
        merge_option(
            StateField::ResearchFindings.policy(),
            &mut self.research_findings,
            patch.research_findings,
        );
        merge_sequence(
            StateField::RetrievedDocuments.policy(),
            &mut self.retrieved_documents,
            patch.retrieved_documents,
        );
        merge_option(
            StateField::DraftContent.policy(),
            &mut self.draft_content,
            patch.draft_content,
        );
        merge_option(
            StateField::EditedContent.policy(),
            &mut self.edited_content,
            patch.edited_content,
        );
        merge_option(StateField::EditNotes.policy(), &mut self.edit_notes, patch.edit_notes);
        merge_option(
            StateField::FinalContent.policy(),
            &mut self.final_content,
            patch.final_content,
        );
        merge_option(
            StateField::SeoMetadata.policy(),
            &mut self.seo_metadata,
            patch.seo_metadata,
        );
        merge_map(
            StateField::ConfidenceScores.policy(),
            &mut self.confidence_scores,
            patch.confidence_scores,
        );
        merge_sequence(StateField::Errors.policy(), &mut self.errors, patch.errors);
        merge_sequence(StateField::AgentLogs.policy(), &mut self.agent_logs, patch.agent_logs);
    }

    /// Consuming form of `apply`.
    pub fn merged(mut self, patch: StatePatch) -> Self {
        self.apply(patch);
        self
    }

    pub fn confidence(&self, key: &str) -> Option<f64> {
        self.confidence_scores.as_ref().and_then(|m| m.get(key).copied())
    }

    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.as_ref().and_then(|m| m.get(key))
    }

    /// Serializable projection handed back to callers.
    pub fn output(&self) -> PipelineOutput {
        PipelineOutput {
            final_content: self.final_content.clone(),
            seo_metadata: self.seo_metadata.clone(),
            agent_logs: self.agent_logs.clone(),
            errors: self.errors.clone(),
        }
    }
}

/// Projection of the final state returned from the pipeline entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub final_content: Option<String>,
    pub seo_metadata: Option<SeoMetadata>,
    pub agent_logs: Vec<AgentLog>,
    pub errors: Vec<String>,
}

fn merge_string(policy: MergePolicy, slot: &mut String, update: Option<String>) {
    let Some(value) = update else { return };
    match policy {
        MergePolicy::SetOnce if !slot.is_empty() => {}
        _ => *slot = value,
    }
}

fn merge_option<T>(policy: MergePolicy, slot: &mut Option<T>, update: Option<T>) {
    let Some(value) = update else { return };
    match policy {
        MergePolicy::SetOnce if slot.is_some() => {}
        _ => *slot = Some(value),
    }
}

fn merge_sequence<T>(policy: MergePolicy, slot: &mut Vec<T>, update: Option<Vec<T>>) {
    let Some(values) = update else { return };
    match policy {
        MergePolicy::AppendSequence => slot.extend(values),
        MergePolicy::SetOnce if !slot.is_empty() => {}
        _ => *slot = values,
    }
}

fn merge_map<V>(
    policy: MergePolicy,
    slot: &mut Option<HashMap<String, V>>,
    update: Option<HashMap<String, V>>,
) {
    let Some(values) = update else { return };
    match (policy, slot.as_mut()) {
        (MergePolicy::MergeByKey, Some(existing)) => existing.extend(values),
        (MergePolicy::SetOnce, Some(_)) => {}
        _ => *slot = Some(values),
    }
}
