use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use scribe_core::config::PipelineConfig;
use scribe_core::event::EventBus;
use scribe_core::types::{AgentLog, PipelineEvent, RunId, Stage};
use scribe_core::{ContentState, StatePatch};

use super::edge::{check_errors, should_retry_writing, EdgePredicate, Route};
use crate::stages::StageRunner;

/// Where control goes after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stage(Stage),
    /// Normal completion.
    End,
    /// Early stop on a failure path.
    Halt,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage(stage) => write!(f, "{}", stage),
            Self::End => f.write_str("END"),
            Self::Halt => f.write_str("HALT"),
        }
    }
}

/// Outgoing edge of a stage.
#[derive(Clone)]
pub enum Transition {
    Static(Target),
    Conditional {
        predicate: EdgePredicate,
        routes: Vec<(Route, Target)>,
        /// Route taken when the chosen target hits the visit limit
        /// or the predicate returns an unmapped label.
        fallback: Route,
    },
}

impl Transition {
    pub fn to(stage: Stage) -> Self {
        Self::Static(Target::Stage(stage))
    }

    pub fn end() -> Self {
        Self::Static(Target::End)
    }

    pub fn conditional(
        predicate: EdgePredicate,
        routes: Vec<(Route, Target)>,
        fallback: Route,
    ) -> Self {
        Self::Conditional {
            predicate,
            routes,
            fallback,
        }
    }
}

fn lookup(routes: &[(Route, Target)], route: Route) -> Option<Target> {
    routes.iter().find(|(r, _)| *r == route).map(|(_, t)| *t)
}

/// Stage graph: an entry stage plus one transition per stage.
/// A stage without a transition ends the run.
#[derive(Clone)]
pub struct Graph {
    entry: Stage,
    transitions: HashMap<Stage, Transition>,
}

impl Graph {
    pub fn new(entry: Stage) -> Self {
        Self {
            entry,
            transitions: HashMap::new(),
        }
    }

    /// Planner → Researcher → Writer ⟲ → Editor → SEO → END.
    ///
    /// Writer loops back to itself while `should_retry_writing` says `rewrite`.
    pub fn content_pipeline(config: &PipelineConfig) -> Self {
        let min_word_ratio = config.min_word_ratio;
        let retry_writing: EdgePredicate =
            Arc::new(move |state| should_retry_writing(state, min_word_ratio));

        Self::new(Stage::Planner)
            .with_transition(Stage::Planner, Transition::to(Stage::Researcher))
            .with_transition(Stage::Researcher, Transition::to(Stage::Writer))
            .with_transition(
                Stage::Writer,
                Transition::conditional(
                    retry_writing,
                    vec![
                        (Route::Rewrite, Target::Stage(Stage::Writer)),
                        (Route::Proceed, Target::Stage(Stage::Editor)),
                    ],
                    Route::Proceed,
                ),
            )
            .with_transition(Stage::Editor, Transition::to(Stage::Seo))
            .with_transition(Stage::Seo, Transition::end())
    }

    /// Route `stage` through `check_errors`: halt on any recorded error,
    /// otherwise continue to `next`.
    pub fn halt_on_errors(self, stage: Stage, next: Target) -> Self {
        self.with_transition(
            stage,
            Transition::conditional(
                Arc::new(check_errors),
                vec![(Route::Error, Target::Halt), (Route::Continue, next)],
                Route::Error,
            ),
        )
    }

    pub fn with_transition(mut self, stage: Stage, transition: Transition) -> Self {
        self.transitions.insert(stage, transition);
        self
    }

    pub fn entry(&self) -> Stage {
        self.entry
    }

    pub fn transition(&self, stage: Stage) -> Option<&Transition> {
        self.transitions.get(&stage)
    }
}

/// Result of executing a single stage.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: Stage,
    /// 1-based visit number of this stage within the run.
    pub visit: usize,
    pub elapsed_ms: u64,
    pub errors_added: usize,
    pub timed_out: bool,
}

/// Result of executing the whole graph.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: RunId,
    /// Final state snapshot.
    pub state: ContentState,
    /// Per-stage results in execution order.
    pub stages_run: Vec<StageResult>,
    /// `End` or `Halt`.
    pub terminal: Target,
    /// Reached `End` with no recorded errors.
    pub succeeded: bool,
    pub total_elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn runs_of(&self, stage: Stage) -> usize {
        self.stages_run.iter().filter(|r| r.stage == stage).count()
    }
}

/// Drives a `Graph` one stage at a time over a single `ContentState`.
///
/// Each stage's patch is merged before the outgoing edge is evaluated, so
/// predicates always see the post-merge state. Stage failures never abort
/// the run; they arrive as `errors` entries inside the patch.
pub struct PipelineExecutor {
    graph: Graph,
    max_stage_visits: usize,
    stage_timeout: Option<Duration>,
    event_bus: Option<Arc<EventBus>>,
}

impl PipelineExecutor {
    pub fn new(graph: Graph, config: &PipelineConfig) -> Self {
        Self {
            graph,
            max_stage_visits: config.max_stage_visits.max(1),
            stage_timeout: (config.stage_timeout_secs > 0)
                .then(|| Duration::from_secs(config.stage_timeout_secs)),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Override the per-stage time limit. `None` waits indefinitely.
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn publish(&self, event: PipelineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    pub async fn execute(&self, runner: &dyn StageRunner, initial: ContentState) -> ExecutionResult {
        let start = Instant::now();
        let run_id = RunId::new();
        let mut state = initial;
        let mut stages_run: Vec<StageResult> = Vec::new();
        let mut visits: HashMap<Stage, usize> = HashMap::new();
        let mut current = Target::Stage(self.graph.entry());

        info!(run_id = %run_id, entry = %self.graph.entry(), "Pipeline run started");
        self.publish(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
        });

        let terminal = loop {
            let stage = match current {
                Target::Stage(stage) => stage,
                terminal => break terminal,
            };

            let visit = {
                let count = visits.entry(stage).or_insert(0);
                *count += 1;
                *count
            };
            info!(stage = %stage, visit, "Running stage");
            self.publish(PipelineEvent::StageStarted { stage, visit });

            let stage_start = Instant::now();
            let (patch, timed_out) = self.run_stage(runner, stage, &state).await;

            let errors_before = state.errors.len();
            state.apply(patch);
            let errors_added = state.errors.len() - errors_before;
            let elapsed_ms = stage_start.elapsed().as_millis() as u64;

            debug!(stage = %stage, elapsed_ms, errors_added, "Stage complete");
            self.publish(PipelineEvent::StageFinished {
                stage,
                elapsed_ms,
                errors_added,
            });
            stages_run.push(StageResult {
                stage,
                visit,
                elapsed_ms,
                errors_added,
                timed_out,
            });

            current = self.next_target(stage, &mut state, &visits);
        };

        let succeeded = terminal == Target::End && check_errors(&state) == Route::Continue;
        let total_elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            run_id = %run_id,
            terminal = %terminal,
            stages = stages_run.len(),
            errors = state.errors.len(),
            succeeded,
            total_elapsed_ms,
            "Pipeline run complete"
        );
        self.publish(PipelineEvent::RunComplete {
            run_id: run_id.clone(),
            stages_run: stages_run.len(),
            errors: state.errors.len(),
        });

        ExecutionResult {
            run_id,
            state,
            stages_run,
            terminal,
            succeeded,
            total_elapsed_ms,
        }
    }

    async fn run_stage(
        &self,
        runner: &dyn StageRunner,
        stage: Stage,
        state: &ContentState,
    ) -> (StatePatch, bool) {
        let fut = runner.run(stage, state);
        let Some(limit) = self.stage_timeout else {
            return (fut.await, false);
        };

        match tokio::time::timeout(limit, fut).await {
            Ok(patch) => (patch, false),
            Err(_) => {
                let message = format!("timed out after {}s", limit.as_secs_f64());
                warn!(stage = %stage, timeout_secs = limit.as_secs_f64(), "Stage timed out");
                let mut patch = StatePatch::new();
                patch.push_error(stage.error_message(&message));
                patch.push_log(AgentLog::new(
                    stage,
                    serde_json::json!({ "error": message, "timed_out": true }),
                ));
                (patch, true)
            }
        }
    }

    fn next_target(
        &self,
        from: Stage,
        state: &mut ContentState,
        visits: &HashMap<Stage, usize>,
    ) -> Target {
        let Some(transition) = self.graph.transition(from) else {
            debug!(stage = %from, "No outgoing transition, run complete");
            return Target::End;
        };

        let exhausted = |target: Target| match target {
            Target::Stage(stage) => {
                visits.get(&stage).copied().unwrap_or(0) >= self.max_stage_visits
            }
            _ => false,
        };

        let (target, fallback) = match transition {
            Transition::Static(target) => (*target, None),
            Transition::Conditional {
                predicate,
                routes,
                fallback,
            } => {
                let route = predicate(&*state);
                let fallback_target = lookup(routes, *fallback);
                let target = match lookup(routes, route) {
                    Some(target) => target,
                    None => {
                        warn!(stage = %from, route = %route, "Unmapped route, using fallback");
                        fallback_target.unwrap_or(Target::Halt)
                    }
                };
                debug!(stage = %from, route = %route, target = %target, "Routed");
                self.publish(PipelineEvent::Routed {
                    from,
                    route: route.label().to_string(),
                    to: target.to_string(),
                });
                (target, fallback_target)
            }
        };

        if !exhausted(target) {
            return target;
        }

        let next = fallback
            .filter(|t| *t != target && !exhausted(*t))
            .unwrap_or(Target::Halt);
        warn!(
            stage = %from,
            blocked = %target,
            next = %next,
            limit = self.max_stage_visits,
            "Visit limit reached"
        );
        let mut patch = StatePatch::new();
        patch.push_error(from.error_message(format!(
            "visit limit of {} reached for {}, continuing to {}",
            self.max_stage_visits, target, next
        )));
        state.apply(patch);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;
    use scribe_core::types::ContentRequest;

    /// Appends a log per call and, for chosen stages, an error.
    struct Scripted {
        failing: Vec<Stage>,
        delay: Option<(Stage, Duration)>,
    }

    impl Scripted {
        fn ok() -> Self {
            Self {
                failing: vec![],
                delay: None,
            }
        }
    }

    impl StageRunner for Scripted {
        fn run<'a>(&'a self, stage: Stage, _state: &'a ContentState) -> BoxFuture<'a, StatePatch> {
            Box::pin(async move {
                if let Some((slow, d)) = self.delay {
                    if slow == stage {
                        tokio::time::sleep(d).await;
                    }
                }
                let mut patch = StatePatch::new();
                patch.push_log(AgentLog::new(stage, serde_json::json!({})));
                if stage == Stage::Writer {
                    patch.draft_content = Some("draft".into());
                }
                if self.failing.contains(&stage) {
                    patch.push_error(stage.error_message("boom"));
                }
                patch
            })
        }
    }

    fn initial() -> ContentState {
        ContentState::new(ContentRequest::new("Write about tea"))
    }

    fn rewrite_n_times(n: usize) -> Transition {
        let calls = Arc::new(AtomicUsize::new(0));
        Transition::conditional(
            Arc::new(move |_state| {
                if calls.fetch_add(1, Ordering::SeqCst) < n {
                    Route::Rewrite
                } else {
                    Route::Proceed
                }
            }),
            vec![
                (Route::Rewrite, Target::Stage(Stage::Writer)),
                (Route::Proceed, Target::Stage(Stage::Editor)),
            ],
            Route::Proceed,
        )
    }

    fn stage_order(result: &ExecutionResult) -> Vec<Stage> {
        result.stages_run.iter().map(|r| r.stage).collect()
    }

    #[tokio::test]
    async fn test_linear_run() {
        let config = PipelineConfig::default();
        let executor = PipelineExecutor::new(Graph::content_pipeline(&config), &config);

        let result = executor.execute(&Scripted::ok(), initial()).await;
        assert_eq!(stage_order(&result), Stage::ALL.to_vec());
        assert_eq!(result.terminal, Target::End);
        assert!(result.succeeded);
        assert_eq!(result.state.agent_logs.len(), 5);
    }

    #[tokio::test]
    async fn test_writer_retry_runs_n_plus_one_times() {
        let config = PipelineConfig::default();
        for n in 0..4 {
            let graph = Graph::content_pipeline(&config).with_transition(Stage::Writer, rewrite_n_times(n));
            let executor = PipelineExecutor::new(graph, &config);

            let result = executor.execute(&Scripted::ok(), initial()).await;
            assert_eq!(result.runs_of(Stage::Writer), n + 1);
            let order = stage_order(&result);
            let editor_at = order.iter().position(|s| *s == Stage::Editor).unwrap();
            assert!(order[..editor_at].iter().filter(|s| **s == Stage::Writer).count() == n + 1);
            assert!(result.state.errors.is_empty());
        }
    }

    #[tokio::test]
    async fn test_visit_limit_takes_fallback_route() {
        let config = PipelineConfig {
            max_stage_visits: 3,
            ..PipelineConfig::default()
        };
        let graph = Graph::content_pipeline(&config).with_transition(Stage::Writer, rewrite_n_times(usize::MAX));
        let executor = PipelineExecutor::new(graph, &config);

        let result = executor.execute(&Scripted::ok(), initial()).await;
        assert_eq!(result.runs_of(Stage::Writer), 3);
        assert_eq!(result.runs_of(Stage::Seo), 1);
        assert_eq!(result.terminal, Target::End);
        assert_eq!(result.state.errors.len(), 1);
        assert!(result.state.errors[0].starts_with("Writer error: visit limit of 3"));
        assert!(!result.succeeded);
    }

    #[tokio::test]
    async fn test_stage_errors_do_not_abort() {
        let config = PipelineConfig::default();
        let executor = PipelineExecutor::new(Graph::content_pipeline(&config), &config);
        let runner = Scripted {
            failing: vec![Stage::Researcher, Stage::Editor],
            delay: None,
        };

        let result = executor.execute(&runner, initial()).await;
        assert_eq!(stage_order(&result), Stage::ALL.to_vec());
        assert_eq!(result.state.errors.len(), 2);
        assert_eq!(result.terminal, Target::End);
        assert!(!result.succeeded);
        assert_eq!(result.stages_run[1].errors_added, 1);
    }

    #[tokio::test]
    async fn test_halt_on_errors() {
        let config = PipelineConfig::default();
        let graph = Graph::content_pipeline(&config)
            .halt_on_errors(Stage::Researcher, Target::Stage(Stage::Writer));
        let executor = PipelineExecutor::new(graph, &config);
        let runner = Scripted {
            failing: vec![Stage::Researcher],
            delay: None,
        };

        let result = executor.execute(&runner, initial()).await;
        assert_eq!(stage_order(&result), vec![Stage::Planner, Stage::Researcher]);
        assert_eq!(result.terminal, Target::Halt);
        assert!(!result.succeeded);

        let clean = executor.execute(&Scripted::ok(), initial()).await;
        assert_eq!(clean.terminal, Target::End);
        assert!(clean.succeeded);
    }

    #[tokio::test]
    async fn test_append_only_fields_never_shrink() {
        let config = PipelineConfig::default();
        let graph = Graph::content_pipeline(&config).with_transition(Stage::Writer, rewrite_n_times(2));
        let runner = Scripted {
            failing: Stage::ALL.to_vec(),
            delay: None,
        };

        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let executor = PipelineExecutor::new(graph, &config).with_event_bus(bus);
        let result = executor.execute(&runner, initial()).await;

        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StageFinished { errors_added, .. } = event {
                assert_eq!(errors_added, 1);
                finished += 1;
            }
        }
        assert_eq!(finished, result.stages_run.len());
        assert_eq!(result.state.errors.len(), result.stages_run.len());
        assert_eq!(result.state.agent_logs.len(), result.stages_run.len());
    }

    #[tokio::test]
    async fn test_events_published_in_order() {
        let config = PipelineConfig::default();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let executor =
            PipelineExecutor::new(Graph::content_pipeline(&config), &config).with_event_bus(bus);

        executor.execute(&Scripted::ok(), initial()).await;

        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(PipelineEvent::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::RunComplete { stages_run: 5, errors: 0, .. })
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Routed { from: Stage::Writer, route, to }
                if route == "proceed" && to == "Editor"
        )));
    }

    #[tokio::test]
    async fn test_stage_timeout_records_error_and_continues() {
        let config = PipelineConfig::default();
        let executor = PipelineExecutor::new(Graph::content_pipeline(&config), &config)
            .with_stage_timeout(Some(Duration::from_millis(20)));
        let runner = Scripted {
            failing: vec![],
            delay: Some((Stage::Editor, Duration::from_secs(5))),
        };

        let result = executor.execute(&runner, initial()).await;
        assert_eq!(stage_order(&result), Stage::ALL.to_vec());
        let editor = &result.stages_run[3];
        assert!(editor.timed_out);
        assert_eq!(result.state.errors.len(), 1);
        assert!(result.state.errors[0].starts_with("Editor error: timed out after"));
        let editor_logs = result
            .state
            .agent_logs
            .iter()
            .filter(|l| l.agent == "editor")
            .count();
        assert_eq!(editor_logs, 1);
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let config = PipelineConfig {
            stage_timeout_secs: 0,
            ..PipelineConfig::default()
        };
        let executor = PipelineExecutor::new(Graph::content_pipeline(&config), &config);
        assert!(executor.stage_timeout.is_none());
        assert_eq!(executor.graph().entry(), Stage::Planner);
    }
}
