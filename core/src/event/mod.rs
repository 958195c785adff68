//! Event envelope
//!
//! Every state-mutating outcome in the kernel is recorded as exactly one
//! event. The log is the only history the substrate keeps; dashboards,
//! replay and wake conditions all read from it.

mod log;

pub use log::EventLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a recorded outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ArtifactCreated,
    ArtifactWritten,
    ArtifactEdited,
    ArtifactDeleted,
    /// Renewable capacity used inside a rolling window
    ResourceConsumed,
    /// Depletable balance burned
    ResourceSpent,
    /// Depletable or allocatable balance granted
    ResourceAllocated,
    Transfer,
    PermissionDecision,
    DanglingContractFallback,
    AgentStateChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactCreated => "artifact_created",
            Self::ArtifactWritten => "artifact_written",
            Self::ArtifactEdited => "artifact_edited",
            Self::ArtifactDeleted => "artifact_deleted",
            Self::ResourceConsumed => "resource_consumed",
            Self::ResourceSpent => "resource_spent",
            Self::ResourceAllocated => "resource_allocated",
            Self::Transfer => "transfer",
            Self::PermissionDecision => "permission_decision",
            Self::DanglingContractFallback => "dangling_contract_fallback",
            Self::AgentStateChange => "agent_state_change",
        }
    }
}

/// One recorded outcome
///
/// `sequence` is globally monotonic across all kinds; two events never share
/// a number and no gap is ever observed by a replay reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Principal the outcome is attributed to
    pub principal: String,
    /// Kind-specific payload
    #[serde(default)]
    pub data: serde_json::Value,
}
