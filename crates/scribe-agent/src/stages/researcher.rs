use std::collections::HashSet;

use tracing::{debug, info, warn};

use scribe_core::error::ScribeError;
use scribe_core::types::{AgentLog, Document, Stage};
use scribe_core::{ContentState, StatePatch};

use super::StageContext;
use crate::prompts;

pub const RESEARCH_COLLECTION: &str = "research";
pub const NO_RESULTS: &str = "No relevant documents found in the knowledge base.";

/// Query the research collection once per query and synthesize the results.
///
/// A failing query is recorded and skipped. Documents already seen in this
/// invocation or already present in state are not appended again.
pub async fn run(ctx: &StageContext, state: &ContentState) -> StatePatch {
    let mut patch = StatePatch::new();

    let queries = if state.research_queries.is_empty() {
        vec![state.content_request.clone()]
    } else {
        state.research_queries.clone()
    };

    let mut seen: HashSet<String> = state
        .retrieved_documents
        .iter()
        .map(Document::dedup_key)
        .collect();
    let mut new_docs: Vec<Document> = Vec::new();
    let mut context: Vec<String> = Vec::new();

    for query in &queries {
        match ctx
            .store
            .query(RESEARCH_COLLECTION, query, ctx.retrieval.k)
            .await
        {
            Ok(docs) if docs.is_empty() => {
                debug!(query = %query, "No documents for query");
            }
            Ok(docs) => {
                context.push(format!("--- Results for query: '{}' ---", query));
                for doc in docs {
                    context.push(format!(
                        "Source: {}\nContent: {}\n",
                        doc.source_label(),
                        doc.content.trim()
                    ));
                    if seen.insert(doc.dedup_key()) {
                        new_docs.push(doc);
                    }
                }
            }
            Err(e) => {
                warn!(query = %query, error = %e, "Research query failed");
                let err = ScribeError::Research {
                    query: query.clone(),
                    message: e.to_string(),
                };
                patch.push_error(Stage::Researcher.error_message(&err));
            }
        }
    }

    let findings = if context.is_empty() {
        Some(NO_RESULTS.to_string())
    } else {
        let request = ctx
            .request(Stage::Researcher, prompts::RESEARCHER)
            .with_var(
                "Queries",
                queries
                    .iter()
                    .map(|q| format!("- {}", q))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
            .with_var("Retrieved Context", context.join("\n"));

        match ctx.worker.generate(request).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Research synthesis failed");
                patch.push_error(Stage::Researcher.error_message(&e));
                None
            }
        }
    };

    info!(
        queries = queries.len(),
        documents = new_docs.len(),
        "Research complete"
    );

    patch.push_log(AgentLog::new(
        Stage::Researcher,
        serde_json::json!({
            "document_count": new_docs.len(),
            "query_count": queries.len(),
        }),
    ));
    patch.research_findings = findings;
    if !new_docs.is_empty() {
        patch.retrieved_documents = Some(new_docs);
    }
    patch
}
