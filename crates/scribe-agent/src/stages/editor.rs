use tracing::{info, warn};

use scribe_core::error::{Result, ScribeError};
use scribe_core::types::{AgentLog, Stage};
use scribe_core::{ContentState, StatePatch};

use super::{failure_patch, StageContext};
use crate::prompts;

pub const STYLE_COLLECTION: &str = "style";
pub const STYLE_QUERY: &str = "brand voice formatting";
pub const DIVIDER: &str = "---DIVIDER---";
pub const NO_NOTES: &str = "Editor provided no specific notes.";

pub async fn run(ctx: &StageContext, state: &ContentState) -> StatePatch {
    match edit(ctx, state).await {
        Ok((content, notes)) => {
            info!(notes_len = notes.len(), "Draft edited");
            let mut patch = StatePatch::new();
            patch.push_log(AgentLog::new(
                Stage::Editor,
                serde_json::json!({ "changes_made": notes }),
            ));
            patch.edited_content = Some(content);
            patch.edit_notes = Some(notes);
            patch
        }
        Err(e) => {
            warn!(error = %e, "Editor failed");
            failure_patch(Stage::Editor, &e)
        }
    }
}

async fn edit(ctx: &StageContext, state: &ContentState) -> Result<(String, String)> {
    let style_guide = match ctx
        .store
        .query(STYLE_COLLECTION, STYLE_QUERY, ctx.retrieval.style_k)
        .await
    {
        Ok(docs) => docs
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
        Err(e) => {
            warn!(error = %e, "Style guide lookup failed, editing without it");
            String::new()
        }
    };

    let brief = match &state.brief {
        Some(brief) => serde_json::to_string_pretty(brief)?,
        None => "No brief available.".to_string(),
    };

    let request = ctx
        .request(Stage::Editor, prompts::EDITOR)
        .with_var("Brief", brief)
        .with_var("Style Guide", style_guide)
        .with_var("Draft Content", state.draft_content.as_deref().unwrap_or(""));

    let response = ctx.worker.generate(request).await?;
    let (content, notes) = split_sections(&response);
    if content.trim().is_empty() {
        return Err(ScribeError::Editing("model returned no edited content".into()));
    }
    Ok((content, notes))
}

/// Split an editor response into (content, notes) on the divider.
/// Without a divider the whole response is content.
pub fn split_sections(response: &str) -> (String, String) {
    match response.split_once(DIVIDER) {
        Some((content, notes)) => (content.trim().to_string(), notes.trim().to_string()),
        None => (response.to_string(), NO_NOTES.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use scribe_core::types::{ContentRequest, Document};
    use scribe_test_utils::{MockStore, MockWorker};

    fn drafted() -> ContentState {
        let mut state = ContentState::new(ContentRequest::new("x"));
        state.draft_content = Some("rough draft".into());
        state
    }

    #[test]
    fn test_split_sections() {
        let (content, notes) = split_sections("# Title\nBody\n---DIVIDER---\n- fixed typos");
        assert_eq!(content, "# Title\nBody");
        assert_eq!(notes, "- fixed typos");
    }

    #[tokio::test]
    async fn test_editor_without_divider_uses_placeholder() {
        let raw = "  Polished text with no divider  ";
        let ctx = StageContext::new(
            Arc::new(MockWorker::new().respond(Stage::Editor, raw)),
            Arc::new(MockStore::new()),
        );

        let patch = run(&ctx, &drafted()).await;
        assert_eq!(patch.edited_content.as_deref(), Some(raw));
        assert_eq!(patch.edit_notes.as_deref(), Some(NO_NOTES));
        assert!(patch.errors.is_none());
        assert_eq!(patch.agent_logs.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_editor_uses_style_guide() {
        let store = Arc::new(MockStore::new().with_docs(
            "style",
            vec![
                Document::new("Use active voice."),
                Document::new("Short paragraphs."),
                Document::new("never returned"),
            ],
        ));
        let worker = Arc::new(MockWorker::new().respond(Stage::Editor, "done---DIVIDER---notes"));
        let ctx = StageContext::new(worker.clone(), store.clone());

        let patch = run(&ctx, &drafted()).await;
        assert_eq!(patch.edited_content.as_deref(), Some("done"));
        assert_eq!(patch.edit_notes.as_deref(), Some("notes"));

        let query = &store.queries()[0];
        assert_eq!(query.query, STYLE_QUERY);
        assert_eq!(query.limit, 2);
        let req = &worker.requests()[0];
        assert_eq!(req.var("Style Guide"), Some("Use active voice.\n\nShort paragraphs."));
        assert_eq!(req.var("Draft Content"), Some("rough draft"));
    }

    #[tokio::test]
    async fn test_editor_style_failure_degrades() {
        let worker = Arc::new(MockWorker::new().respond(Stage::Editor, "ok"));
        let ctx = StageContext::new(worker.clone(), Arc::new(MockStore::new().fail_collection("style")));

        let patch = run(&ctx, &drafted()).await;
        assert_eq!(patch.edited_content.as_deref(), Some("ok"));
        assert!(patch.errors.is_none());
        assert_eq!(worker.requests()[0].var("Style Guide"), Some(""));
    }

    #[tokio::test]
    async fn test_editor_worker_failure() {
        let ctx = StageContext::new(
            Arc::new(MockWorker::new().fail(Stage::Editor, "timeout")),
            Arc::new(MockStore::new()),
        );
        let patch = run(&ctx, &drafted()).await;
        assert!(patch.edited_content.is_none());
        assert!(patch.errors.unwrap()[0].starts_with("Editor error: "));
    }

    #[tokio::test]
    async fn test_editor_empty_content_section_is_error() {
        let ctx = StageContext::new(
            Arc::new(MockWorker::new().respond(Stage::Editor, "\n---DIVIDER---\n- nothing to keep")),
            Arc::new(MockStore::new()),
        );
        let patch = run(&ctx, &drafted()).await;
        assert!(patch.edited_content.is_none());
        assert!(patch.edit_notes.is_none());
        assert_eq!(
            patch.errors.unwrap(),
            vec!["Editor error: Editing failed: model returned no edited content"]
        );
        assert_eq!(patch.agent_logs.unwrap().len(), 1);
    }
}
