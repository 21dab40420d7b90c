use tracing::{info, warn};

use scribe_core::error::{Result, ScribeError};
use scribe_core::types::{word_count, AgentLog, Stage};
use scribe_core::{ContentState, StatePatch};

use super::{failure_patch, StageContext};
use crate::prompts;

pub async fn run(ctx: &StageContext, state: &ContentState) -> StatePatch {
    match write(ctx, state).await {
        Ok(draft) => {
            let words = word_count(&draft);
            info!(words, "Draft written");
            let mut patch = StatePatch::new();
            patch.push_log(AgentLog::new(
                Stage::Writer,
                serde_json::json!({ "word_count": words }),
            ));
            patch.draft_content = Some(draft);
            patch
        }
        Err(e) => {
            warn!(error = %e, "Writer failed");
            failure_patch(Stage::Writer, &e)
        }
    }
}

async fn write(ctx: &StageContext, state: &ContentState) -> Result<String> {
    let brief = match &state.brief {
        Some(brief) => serde_json::to_string_pretty(brief)?,
        None => "No brief available.".to_string(),
    };
    let research = state
        .research_findings
        .as_deref()
        .unwrap_or("No research findings available.");

    let request = ctx
        .request(Stage::Writer, prompts::WRITER)
        .with_var("Brief", brief)
        .with_var("Research Findings", research);

    let draft = ctx.worker.generate(request).await?;
    if draft.trim().is_empty() {
        return Err(ScribeError::Writing("model returned an empty draft".into()));
    }
    Ok(draft)
}
