//! Workflow orchestration for the biograph pipeline.
//!
//! A workflow is a [`TaskGraph`]: named tasks with hard or soft dependency
//! edges, run by a topological executor with bounded concurrency. External
//! calls inside a task go through the shared per-API
//! [`ResilientCaller`](biograph_resilience::ResilientCaller)s, so retries
//! happen per call and a task is never restarted wholesale.
//!
//! ```no_run
//! # async fn demo(orchestrator: biograph_orchestration::Orchestrator) -> biograph_common::Result<()> {
//! use biograph_orchestration::WorkflowParams;
//!
//! let run = orchestrator
//!     .run("incremental", WorkflowParams::with_terms(["KRAS G12D"]))
//!     .await?;
//! println!("{}", run.summary());
//! # Ok(())
//! # }
//! ```

pub mod consistency;
pub mod context;
pub mod dag;
mod executor;
pub mod orchestrator;
pub mod registry;
pub mod run;
pub mod task;
pub mod tasks;
pub mod workflow;

pub use consistency::{ConsistencyReport, ConsistencyValidator, StoreComparison};
pub use context::{Api, ApiCallers, RateLimits, RunContext, Services, TaskContext};
pub use dag::TaskGraph;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunHandle};
pub use registry::{RunRegistry, RunStore};
pub use run::{RunStatus, TaskError, TaskMetrics, TaskResult, TaskStatus, WorkflowRun};
pub use task::{Counters, Dependency, DependencyKind, Task};
pub use tasks::ConfigCheck;
pub use workflow::{WorkflowDefinition, WorkflowKind, WorkflowParams};
