//! Core library for agora - an in-process kernel for emergent
//! multi-agent economies
//!
//! # Architecture
//! - `artifact`: the universal object store, exclusive writer for all state
//! - `ledger`: balances and atomic movements of depletable resources
//! - `rate`: rolling-window capacity for renewable resources
//! - `contract` / `permission`: artifact-level access policies and the
//!   engine that evaluates them in a bounded sandbox
//! - `kernel`: composition root, primitive surface, genesis bootstrap,
//!   snapshot and replay
//! - `agent`: one cooperative worker per autonomous principal, plus the
//!   decision-engine collaborator interface
//! - `event`: the append-only log every mutation lands in
//!
//! Dependency order runs leaves-first: rate and ledger know nothing above
//! them, the kernel knows everything below it, and nothing reaches around
//! the kernel to mutate state.

#![deny(unsafe_code)]

pub mod artifact;
pub mod config;
pub mod contract;
pub mod error;
pub mod event;
pub mod kernel;
pub mod ledger;
pub mod permission;
pub mod rate;

pub mod agent;

// Primary surface re-exports
pub use agent::{
    AgentAction, DecisionEngine, EventMatch, LoopState, Observation, Scheduler, ScriptedEngine,
    WakeCondition,
};
pub use artifact::{Artifact, ArtifactPatch, ArtifactSpec, ArtifactStore, MethodSpec};
pub use config::KernelConfig;
pub use contract::{Action, ContractPolicy, Decision, PermissionRequest};
pub use error::{KernelError, Result};
pub use event::{Event, EventKind, EventLog};
pub use kernel::{InvokeCtx, JsonFileSink, Kernel, KernelSnapshot, MethodHandler, SnapshotSink};
pub use ledger::{Ledger, RESOURCE_BUDGET, RESOURCE_SCRIP};
pub use rate::RateTracker;
