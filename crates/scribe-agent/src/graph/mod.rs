//! Stage graph and its executor.
//!
//! A run walks a fixed set of stages from an entry stage. Each stage has at
//! most one outgoing `Transition`: either a static target or an edge
//! predicate whose `Route` label picks the target. Terminals are `End` and
//! `Halt`.

pub mod edge;
pub mod executor;

pub use edge::{check_errors, should_retry_editing, should_retry_writing, EdgePredicate, Route};
pub use executor::{ExecutionResult, Graph, PipelineExecutor, StageResult, Target, Transition};
