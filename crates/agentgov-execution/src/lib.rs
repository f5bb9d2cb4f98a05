//! Goal execution engine: turns a Goal Template into a concrete plan DAG
//! and drives it to completion, one Think -> Act -> Observe step at a time.

pub mod arena;
pub mod defaults;
pub mod executor;
pub mod planner;
pub mod queue;
pub mod retry;
pub mod traits;

pub use arena::{classify_cycle, CycleClass, PlanArena};
pub use defaults::{EchoToolAdapter, NullKnowledgeLookup};
pub use executor::{request_emergency_budget, GoalExecutor, GoalOutcome};
pub use planner::TemplatePlanner;
pub use queue::{OutputEvent, Priority, QueueEvent};
pub use retry::{backoff_delay, wait_or_cancel};
pub use traits::{classify_query, KnowledgeLookup, LookupClass, Planner, ToolAdapter};
