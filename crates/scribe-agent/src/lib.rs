pub mod artifacts;
pub mod graph;
pub mod prompts;
pub mod stages;

pub use artifacts::ArtifactWriter;
pub use graph::{
    check_errors, should_retry_editing, should_retry_writing, ExecutionResult, Graph,
    PipelineExecutor, Route, StageResult, Target, Transition,
};
pub use stages::{StageContext, StageRunner};

use std::sync::Arc;

use scribe_core::config::PipelineConfig;
use scribe_core::event::EventBus;
use scribe_core::types::ContentRequest;
use scribe_core::{ContentState, PipelineOutput};

/// The default content pipeline bound to a set of collaborators.
pub struct ContentPipeline {
    context: StageContext,
    executor: PipelineExecutor,
}

impl ContentPipeline {
    pub fn new(context: StageContext, config: &PipelineConfig) -> Self {
        Self {
            context,
            executor: PipelineExecutor::new(Graph::content_pipeline(config), config),
        }
    }

    /// Use a custom executor (graph, limits) with the same stages.
    pub fn with_executor(mut self, executor: PipelineExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.executor = self.executor.with_event_bus(event_bus);
        self
    }

    /// Run one request to a terminal and return the full result.
    pub async fn run(&self, request: ContentRequest) -> ExecutionResult {
        self.executor
            .execute(&self.context, ContentState::new(request))
            .await
    }
}

/// Run the default pipeline once and return the caller-facing projection.
pub async fn run_pipeline(
    context: StageContext,
    config: &PipelineConfig,
    request: ContentRequest,
) -> PipelineOutput {
    ContentPipeline::new(context, config)
        .run(request)
        .await
        .state
        .output()
}
