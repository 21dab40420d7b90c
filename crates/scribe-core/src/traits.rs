use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{Document, GenerationRequest};

/// The language-model call behind every stage.
pub trait GenerationWorker: Send + Sync + 'static {
    /// Run one generation and return the raw response text.
    ///
    /// Requests with `OutputFormat::Json` expect a single JSON object back;
    /// parsing is left to the caller.
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>>;
}

/// Ranked documents for a query within a named collection.
pub trait SimilaritySearch: Send + Sync + 'static {
    /// Return up to `limit` documents, best match first.
    ///
    /// An empty result means "no context", not an error.
    fn query(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Document>>>;
}
