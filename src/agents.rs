//! Principal definitions
//!
//! A YAML file describes the principals seeded into a run: identity,
//! starting balances, optional access contract and a scripted behavior.
//! Behaviors are deliberately simple deterministic loops; a real decision
//! engine (an LLM client) plugs in behind the same trait.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agora_core::kernel::genesis::MINT_ID;
use agora_core::{
    AgentAction, ArtifactSpec, DecisionEngine, Kernel, Scheduler, ScriptedEngine, WakeCondition,
    RESOURCE_BUDGET, RESOURCE_SCRIP,
};

#[derive(Debug, Deserialize)]
pub struct AgentFile {
    #[serde(default)]
    pub agents: Vec<AgentDef>,
}

#[derive(Debug, Deserialize)]
pub struct AgentDef {
    pub id: String,
    /// Starting scrip balance
    #[serde(default)]
    pub scrip: f64,
    /// Starting budget balance
    #[serde(default)]
    pub budget: f64,
    /// Access contract for the principal artifact itself
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub behavior: Behavior,
}

/// Built-in deterministic behaviors
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Behavior {
    /// Never acts
    #[default]
    Idle,
    /// Mints scrip on a fixed cadence
    Minter {
        amount: f64,
        #[serde(default = "default_pause")]
        pause_seconds: f64,
    },
    /// Publishes data artifacts on a fixed cadence
    Writer {
        #[serde(default)]
        note: Option<String>,
        #[serde(default = "default_pause")]
        pause_seconds: f64,
    },
    /// Sends scrip to another principal on a fixed cadence
    Trader {
        to: String,
        amount: f64,
        #[serde(default = "default_pause")]
        pause_seconds: f64,
    },
}

fn default_pause() -> f64 {
    1.0
}

pub fn load(path: &Path) -> Result<AgentFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read agent file {}", path.display()))?;
    let file: AgentFile =
        serde_yml::from_str(&content).context("failed to parse agent definitions")?;
    Ok(file)
}

/// Create the principal artifacts, seed balances, and start a worker per
/// definition. Everything goes through kernel primitives: the loader holds
/// no special authority beyond asserting each principal's own identity.
pub async fn install(
    kernel: &Arc<Kernel>,
    scheduler: &Scheduler,
    file: AgentFile,
) -> Result<Vec<String>> {
    let autonomous = kernel.config().execution.use_autonomous_loops;
    let mut started = Vec::new();

    for def in file.agents {
        let mut spec = ArtifactSpec::agent();
        if let Some(contract) = &def.contract {
            spec = spec.with_contract(contract.clone());
        }
        kernel
            .write(&def.id, &def.id, spec)
            .await
            .with_context(|| format!("failed to create principal {}", def.id))?;

        if def.scrip > 0.0 {
            kernel.ledger().credit(&def.id, RESOURCE_SCRIP, def.scrip)?;
        }
        if def.budget > 0.0 {
            kernel.ledger().credit(&def.id, RESOURCE_BUDGET, def.budget)?;
        }

        if autonomous {
            scheduler
                .start_worker(&def.id, engine_for(&def.behavior))
                .with_context(|| format!("failed to start worker for {}", def.id))?;
            started.push(def.id);
        }
    }
    Ok(started)
}

fn engine_for(behavior: &Behavior) -> Arc<dyn DecisionEngine> {
    match behavior {
        Behavior::Idle => Arc::new(ScriptedEngine::new(vec![])),
        Behavior::Minter {
            amount,
            pause_seconds,
        } => Arc::new(ScriptedEngine::cycling(vec![
            AgentAction::Invoke {
                id: MINT_ID.to_string(),
                method: "mint".to_string(),
                args: serde_json::json!({ "amount": amount }),
            },
            pause(*pause_seconds),
        ])),
        Behavior::Writer {
            note,
            pause_seconds,
        } => {
            let note = note.clone().unwrap_or_else(|| "tick".to_string());
            Arc::new(ScriptedEngine::cycling(vec![
                AgentAction::Write {
                    id: None,
                    spec: ArtifactSpec::data(serde_json::json!({ "note": note })),
                },
                pause(*pause_seconds),
            ]))
        }
        Behavior::Trader {
            to,
            amount,
            pause_seconds,
        } => Arc::new(ScriptedEngine::cycling(vec![
            AgentAction::Transfer {
                to: to.clone(),
                resource: RESOURCE_SCRIP.to_string(),
                amount: *amount,
            },
            pause(*pause_seconds),
        ])),
    }
}

fn pause(seconds: f64) -> AgentAction {
    AgentAction::Sleep(WakeCondition::after(Duration::from_secs_f64(seconds)))
}
