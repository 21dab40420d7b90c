use std::collections::BTreeMap;

use tracing::{info, warn};

use scribe_core::error::{Result, ScribeError};
use scribe_core::types::{AgentLog, Brief, Stage};
use scribe_core::{ContentState, StatePatch};

use super::{parse_structured, StageContext};
use crate::prompts;

/// Produce the brief. Falls back to `Brief::fallback()` on any failure,
/// flagging the log entry with `"fallback": true`.
pub async fn run(ctx: &StageContext, state: &ContentState) -> StatePatch {
    let mut patch = StatePatch::new();

    let (brief, fallback) = match plan(ctx, state).await {
        Ok(brief) => (brief, false),
        Err(e) => {
            warn!(error = %e, "Planner failed, using fallback brief");
            patch.push_error(Stage::Planner.error_message(&e));
            (Brief::fallback(), true)
        }
    };

    info!(
        title = %brief.title,
        queries = brief.research_queries.len(),
        fallback,
        "Brief ready"
    );

    let mut payload = serde_json::to_value(&brief).unwrap_or_default();
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("fallback".into(), serde_json::Value::Bool(fallback));
    }
    patch.push_log(AgentLog::new(Stage::Planner, payload));
    patch.research_queries = Some(brief.research_queries.clone());
    patch.brief = Some(brief);
    patch
}

async fn plan(ctx: &StageContext, state: &ContentState) -> Result<Brief> {
    let mut request = ctx
        .request(Stage::Planner, prompts::PLANNER)
        .structured()
        .with_var("Content Request", state.content_request.as_str());

    if let Some(settings) = state.settings.as_ref().filter(|s| !s.is_empty()) {
        // sorted for stable prompts
        let sorted: BTreeMap<_, _> = settings.iter().collect();
        request = request.with_var("Preferences", serde_json::to_string_pretty(&sorted)?);
    }

    let raw = ctx.worker.generate(request).await?;
    let brief: Brief = parse_structured(&raw)?;
    if brief.title.trim().is_empty() {
        return Err(ScribeError::Planning("brief has no title".into()));
    }
    Ok(brief)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use scribe_core::types::ContentRequest;
    use scribe_test_utils::{fixtures, MockStore, MockWorker};

    fn ctx(worker: MockWorker) -> (StageContext, Arc<MockWorker>) {
        let worker = Arc::new(worker);
        let ctx = StageContext::new(worker.clone(), Arc::new(MockStore::new()));
        (ctx, worker)
    }

    #[tokio::test]
    async fn test_planner_parses_brief() {
        let (ctx, worker) = ctx(MockWorker::new().respond(Stage::Planner, fixtures::brief_json()));
        let state = ContentState::new(ContentRequest::new("Write about green tea"));

        let patch = run(&ctx, &state).await;
        let brief = patch.brief.unwrap();
        assert_eq!(brief.title, "The Benefits of Green Tea");
        assert_eq!(patch.research_queries.unwrap(), brief.research_queries);
        assert!(patch.errors.is_none());

        let logs = patch.agent_logs.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].payload["fallback"], false);

        let req = &worker.requests()[0];
        assert_eq!(req.var("Content Request"), Some("Write about green tea"));
        assert_eq!(req.format, scribe_core::types::OutputFormat::Json);
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_planner_worker_failure_uses_fallback() {
        let (ctx, _) = ctx(MockWorker::new().fail(Stage::Planner, "HTTP 500"));
        let state = ContentState::new(ContentRequest::new("anything"));

        let patch = run(&ctx, &state).await;
        assert_eq!(patch.brief.as_ref(), Some(&Brief::fallback()));
        assert_eq!(patch.research_queries.unwrap(), Brief::fallback().research_queries);

        let errors = patch.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Planner error: "));

        let logs = patch.agent_logs.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].payload["fallback"], true);
    }

    #[tokio::test]
    async fn test_planner_malformed_output_uses_fallback() {
        let (ctx, _) = ctx(MockWorker::new().respond(Stage::Planner, "I think the title should be..."));
        let patch = run(&ctx, &ContentState::new(ContentRequest::new("x"))).await;
        assert_eq!(patch.brief, Some(Brief::fallback()));
        assert!(patch.errors.unwrap()[0].starts_with("Planner error: "));
    }

    #[tokio::test]
    async fn test_planner_keeps_lenient_brief() {
        let raw = r#"{"title":"Tea","target_audience":"All","tone":"Calm","word_count":800.0,"research_queries":["tea"]}"#;
        let (ctx, _) = ctx(MockWorker::new().respond(Stage::Planner, raw));
        let patch = run(&ctx, &ContentState::new(ContentRequest::new("x"))).await;

        let brief = patch.brief.unwrap();
        assert_eq!(brief.title, "Tea");
        assert_eq!(brief.word_count, 800);
        assert_eq!(patch.research_queries.unwrap(), vec!["tea"]);
        assert!(patch.errors.is_none());
    }

    #[tokio::test]
    async fn test_planner_bare_json_with_code_fence_in_outline() {
        let raw = serde_json::json!({
            "title": "Brewing Scripts",
            "word_count": "600",
            "research_queries": ["tea timers"],
            "outline": ["Intro", "```python\nprint('steep')\n```"]
        })
        .to_string();
        let (ctx, _) = ctx(MockWorker::new().respond(Stage::Planner, raw));
        let patch = run(&ctx, &ContentState::new(ContentRequest::new("x"))).await;

        let brief = patch.brief.unwrap();
        assert_eq!(brief.title, "Brewing Scripts");
        assert_eq!(brief.word_count, 600);
        assert!(brief.outline[1].starts_with("```python"));
        assert!(patch.errors.is_none());
    }

    #[tokio::test]
    async fn test_planner_passes_settings_as_preferences() {
        let (ctx, worker) = ctx(MockWorker::new().respond(Stage::Planner, fixtures::brief_json()));
        let request = ContentRequest::new("x")
            .with_setting("tone", serde_json::json!("playful"))
            .with_setting("audience", serde_json::json!("students"));

        run(&ctx, &ContentState::new(request)).await;
        let prefs = worker.requests()[0].var("Preferences").unwrap().to_string();
        assert!(prefs.find("audience").unwrap() < prefs.find("tone").unwrap());
        assert!(prefs.contains("playful"));
    }
}
