use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use scribe_core::error::{Result, ScribeError};
use scribe_core::types::{AgentLog, SeoMetadata, Stage};
use scribe_core::{ContentState, StatePatch};

use super::{failure_patch, parse_structured, StageContext};
use crate::prompts;

pub const SEO_COLLECTION: &str = "seo";
pub const MAX_TITLE_CHARS: usize = 60;
pub const MAX_DESCRIPTION_CHARS: usize = 160;

#[derive(Deserialize)]
struct SeoResponse {
    #[serde(default)]
    optimized_content: Option<String>,
    metadata: Option<SeoMetadata>,
}

pub async fn run(ctx: &StageContext, state: &ContentState) -> StatePatch {
    match optimize(ctx, state).await {
        Ok((content, metadata)) => {
            info!(
                title = %metadata.title,
                slug = %metadata.url_slug,
                confidence = metadata.confidence,
                "Content optimized"
            );
            let mut patch = StatePatch::new();
            patch.set_confidence("seo", metadata.confidence);
            patch.push_log(AgentLog::new(
                Stage::Seo,
                serde_json::json!({ "metadata": &metadata }),
            ));
            patch.final_content = Some(content);
            patch.seo_metadata = Some(metadata);
            patch
        }
        Err(e) => {
            warn!(error = %e, "SEO optimization failed");
            failure_patch(Stage::Seo, &e)
        }
    }
}

async fn optimize(ctx: &StageContext, state: &ContentState) -> Result<(String, SeoMetadata)> {
    let content = state.edited_content.as_deref().unwrap_or("");
    let keywords = state
        .brief
        .as_ref()
        .map(|b| b.seo_keywords.join(", "))
        .unwrap_or_default();

    let competitor_data = if keywords.is_empty() {
        String::new()
    } else {
        match ctx
            .store
            .query(SEO_COLLECTION, &keywords, ctx.retrieval.seo_k)
            .await
        {
            Ok(docs) => docs
                .iter()
                .map(|d| d.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                warn!(error = %e, "Competitor lookup failed, optimizing without it");
                String::new()
            }
        }
    };

    let request = ctx
        .request(Stage::Seo, prompts::SEO)
        .structured()
        .with_var("Brief Keywords", keywords.as_str())
        .with_var("Competitor Data", competitor_data)
        .with_var("Content to Optimize", content);

    let raw = ctx.worker.generate(request).await?;
    let response: SeoResponse = parse_structured(&raw)?;
    let metadata = response
        .metadata
        .ok_or_else(|| ScribeError::Seo("response has no metadata".into()))?;

    let final_content = response
        .optimized_content
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| content.to_string());

    Ok((final_content, normalize(metadata)))
}

/// Clamp lengths and confidence, and clean up the slug.
pub fn normalize(mut metadata: SeoMetadata) -> SeoMetadata {
    metadata.title = truncate_chars(metadata.title.trim(), MAX_TITLE_CHARS);
    metadata.meta_description =
        truncate_chars(metadata.meta_description.trim(), MAX_DESCRIPTION_CHARS);
    metadata.confidence = if metadata.confidence.is_finite() {
        metadata.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    metadata.url_slug = match slugify(&metadata.url_slug) {
        slug if slug.is_empty() => slugify(&metadata.title),
        slug => slug,
    };
    metadata
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect::<String>().trim_end().to_string()
}

/// Lowercase ASCII words joined by single hyphens.
pub fn slugify(s: &str) -> String {
    static NON_SLUG: OnceLock<Regex> = OnceLock::new();
    let re = NON_SLUG.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"));
    re.replace_all(&s.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}
