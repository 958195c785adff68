//! Autonomous principals
//!
//! One cooperative worker per principal with `can_execute`. The worker
//! drives the principal's decide/execute cycle against the kernel, gates
//! on resources, sleeps on demand and shuts down in order. The decision
//! logic itself is a collaborator behind [`DecisionEngine`]; the kernel
//! ships only deterministic engines.

mod decision;
mod scheduler;
mod wake;
mod worker;

pub use decision::{AgentAction, DecisionEngine, Observation, ScriptedEngine};
pub use scheduler::Scheduler;
pub use wake::{EventMatch, WakeCondition};
pub use worker::{LoopState, WorkerHandle};
