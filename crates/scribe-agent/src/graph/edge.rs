use std::sync::Arc;

use scribe_core::types::word_count;
use scribe_core::ContentState;

/// Minimum editing confidence before `should_retry_editing` asks for another pass.
pub const EDIT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Label returned by an edge predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Rewrite,
    Proceed,
    ReEdit,
    Error,
    Continue,
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rewrite => "rewrite",
            Self::Proceed => "proceed",
            Self::ReEdit => "re_edit",
            Self::Error => "error",
            Self::Continue => "continue",
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Decision function evaluated against the post-merge state.
pub type EdgePredicate = Arc<dyn Fn(&ContentState) -> Route + Send + Sync>;

/// `rewrite` when the draft is empty, or when the brief sets a target and the
/// draft falls below `min_word_ratio` of it.
pub fn should_retry_writing(state: &ContentState, min_word_ratio: f64) -> Route {
    let draft = state.draft_content.as_deref().unwrap_or("");
    if draft.trim().is_empty() {
        return Route::Rewrite;
    }

    let target = state.brief.as_ref().map(|b| b.word_count).unwrap_or(0);
    if target > 0 && (word_count(draft) as f64) < min_word_ratio * target as f64 {
        return Route::Rewrite;
    }
    Route::Proceed
}

/// `re_edit` when the editing confidence is below the threshold. A missing
/// score counts as confident.
pub fn should_retry_editing(state: &ContentState) -> Route {
    match state.confidence("editing") {
        Some(score) if score < EDIT_CONFIDENCE_THRESHOLD => Route::ReEdit,
        _ => Route::Proceed,
    }
}

pub fn check_errors(state: &ContentState) -> Route {
    if state.errors.is_empty() {
        Route::Continue
    } else {
        Route::Error
    }
}
