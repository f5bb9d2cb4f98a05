//! Single-consumer event loop driving one goal's execution: one ordered
//! queue, one consumer, a priority so cancellation always preempts
//! in-flight step work, and a broadcast of `OutputEvent`s for observers.

use agentgov_core::ids::{ApprovalId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Normal = 0,
    Cancel = 10,
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    StepReady { index: usize },
    ApprovalResolved { approval_id: ApprovalId },
    Cancel,
}

impl QueueEvent {
    pub fn priority(&self) -> Priority {
        match self {
            QueueEvent::Cancel => Priority::Cancel,
            _ => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub enum OutputEvent {
    StepStarted { step_id: StepId },
    StepCompleted { step_id: StepId, output: serde_json::Value },
    StepFailed { step_id: StepId, detail: String },
    ApprovalRequested { approval_id: ApprovalId, step_id: StepId },
    GoalCompleted,
    GoalCancelled,
    GoalFailed { reason: String },
    PlanDeadlock { detail: String },
}
