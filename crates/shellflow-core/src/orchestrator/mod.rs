//! Workflow execution state machine.
//!
//! ```text
//! Idle -> RunningPreChecks -> RunningActions | RunningSteps -> Completed | Failed
//! ```
//!
//! [`plan`] substitutes every atom a run needs before anything executes;
//! [`machine`] drives the phases through a [`CommandRunner`](crate::runner::CommandRunner),
//! one atom at a time, stopping at the first failure.

pub mod machine;
pub mod plan;

pub use machine::{Failure, Orchestrator, RunSummary};
pub use plan::{required_variables, RunRequest};
