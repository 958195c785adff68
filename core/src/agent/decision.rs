//! Decision engine interface
//!
//! The scheduler pays resource costs, builds a read-only observation and
//! asks the engine what to do. `None` means "skip this iteration". An LLM
//! client lives behind this trait in a full deployment; the deterministic
//! engines here drive tests and demo runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::wake::WakeCondition;
use crate::artifact::{ArtifactPatch, ArtifactSpec};
use crate::error::Result;
use crate::event::Event;

/// One step a principal can take
#[derive(Debug, Clone)]
pub enum AgentAction {
    Read {
        id: String,
    },
    Write {
        /// `None` creates under a generated id
        id: Option<String>,
        spec: ArtifactSpec,
    },
    Edit {
        id: String,
        patch: ArtifactPatch,
    },
    Delete {
        id: String,
    },
    Invoke {
        id: String,
        method: String,
        args: serde_json::Value,
    },
    Transfer {
        to: String,
        resource: String,
        amount: f64,
    },
    /// Suspend the loop until the condition wakes it
    Sleep(WakeCondition),
}

/// Read-only snapshot handed to the engine each iteration
#[derive(Debug, Clone)]
pub struct Observation {
    pub principal: String,
    pub iteration: u64,
    /// Ledger balances held by the principal
    pub balances: HashMap<String, f64>,
    /// Remaining window capacity for the gated resources
    pub remaining: HashMap<String, f64>,
    /// Events appended since the previous observation
    pub recent_events: Vec<Event>,
    /// Failure surfaced from the previous iteration, if any
    pub last_error: Option<String>,
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Produce the next action, or `None` to skip this iteration
    async fn decide_action(
        &self,
        principal: &str,
        observation: &Observation,
    ) -> Result<Option<AgentAction>>;
}

/// Deterministic engine replaying a fixed script
pub struct ScriptedEngine {
    queue: Mutex<VecDeque<AgentAction>>,
    script: Vec<AgentAction>,
    cycle: bool,
}

impl ScriptedEngine {
    /// Run the script once, then idle forever
    pub fn new(script: Vec<AgentAction>) -> Self {
        Self {
            queue: Mutex::new(script.clone().into()),
            script,
            cycle: false,
        }
    }

    /// Restart the script whenever it runs dry
    pub fn cycling(script: Vec<AgentAction>) -> Self {
        Self {
            queue: Mutex::new(script.clone().into()),
            script,
            cycle: true,
        }
    }

    pub fn remaining_steps(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    async fn decide_action(
        &self,
        _principal: &str,
        _observation: &Observation,
    ) -> Result<Option<AgentAction>> {
        let mut queue = self.queue.lock();
        if queue.is_empty() && self.cycle && !self.script.is_empty() {
            *queue = self.script.clone().into();
        }
        Ok(queue.pop_front())
    }
}
