//! Scheduler — worker lifecycle management
//!
//! Starts one worker per autonomous principal, hands out resume signals,
//! and shuts the fleet down concurrently with a bounded drain.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::decision::DecisionEngine;
use super::worker::{self, LoopState, WorkerHandle};
use crate::config::LoopSettings;
use crate::error::{KernelError, Result};
use crate::kernel::Kernel;

pub struct Scheduler {
    kernel: Arc<Kernel>,
    settings: LoopSettings,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl Scheduler {
    /// Scheduler tuned from the kernel's loop settings
    pub fn new(kernel: Arc<Kernel>) -> Self {
        let settings = kernel.config().execution.agent_loop.clone();
        Self {
            kernel,
            settings,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start the loop for one principal. The principal must exist as an
    /// executable artifact; a live worker for it may not already exist.
    pub fn start_worker(&self, principal: &str, engine: Arc<dyn DecisionEngine>) -> Result<()> {
        let artifact = self.kernel.store().get(principal).ok_or_else(|| {
            KernelError::NotFound {
                id: principal.to_string(),
            }
        })?;
        if !artifact.can_execute {
            return Err(KernelError::invalid(format!(
                "{principal} has no decision loop (can_execute is false)"
            )));
        }

        let mut workers = self.workers.lock();
        if let Some(existing) = workers.get(principal) {
            if existing.state() != LoopState::Stopped {
                return Err(KernelError::invalid(format!(
                    "{principal} already has a running worker"
                )));
            }
        }
        let handle = worker::spawn(
            principal.to_string(),
            self.kernel.clone(),
            engine,
            self.settings.clone(),
        );
        workers.insert(principal.to_string(), handle);
        tracing::info!(%principal, "worker started");
        Ok(())
    }

    /// Gracefully stop one worker
    pub async fn stop_worker(&self, principal: &str, timeout: Duration) -> Result<()> {
        let handle = self.workers.lock().remove(principal).ok_or_else(|| {
            KernelError::NotFound {
                id: principal.to_string(),
            }
        })?;
        handle.shutdown(timeout).await;
        tracing::info!(%principal, "worker stopped");
        Ok(())
    }

    /// Stop every worker concurrently, each with the same drain budget
    pub async fn stop_all(&self, timeout: Duration) {
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, handle)| handle).collect()
        };
        if handles.is_empty() {
            return;
        }
        tracing::info!(count = handles.len(), "stopping all workers");
        futures::future::join_all(
            handles
                .into_iter()
                .map(|handle| handle.shutdown(timeout)),
        )
        .await;
    }

    /// Unpark an error-paused or sleeping worker
    pub async fn resume(&self, principal: &str) -> Result<()> {
        // Clone the control sender out so the await below does not hold the
        // worker map lock.
        let sender = {
            let workers = self.workers.lock();
            let handle = workers.get(principal).ok_or_else(|| KernelError::NotFound {
                id: principal.to_string(),
            })?;
            handle.control_sender()
        };
        let _ = sender.send(worker::ControlMsg::Resume).await;
        Ok(())
    }

    pub fn state_of(&self, principal: &str) -> Option<LoopState> {
        self.workers.lock().get(principal).map(|h| h.state())
    }

    pub fn principals(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.workers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentAction, EventMatch, ScriptedEngine, WakeCondition};
    use crate::artifact::ArtifactSpec;
    use crate::config::KernelConfig;
    use crate::event::EventKind;

    fn fast_config() -> KernelConfig {
        let mut config = KernelConfig::default();
        config.execution.agent_loop.min_loop_delay_ms = 5;
        config.execution.agent_loop.max_loop_delay_ms = 50;
        config.execution.agent_loop.resource_check_interval_ms = 10;
        config.execution.agent_loop.max_consecutive_errors = 3;
        config
    }

    async fn kernel_with_agent(config: KernelConfig, principal: &str) -> Arc<Kernel> {
        let kernel = Kernel::new(config).unwrap();
        kernel
            .write(principal, principal, ArtifactSpec::agent())
            .await
            .unwrap();
        kernel
    }

    async fn wait_for_state(
        scheduler: &Scheduler,
        principal: &str,
        expected: LoopState,
        budget: Duration,
    ) {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            if scheduler.state_of(principal) == Some(expected) {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "{principal} never reached {expected}, stuck at {:?}",
                    scheduler.state_of(principal)
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_start_requires_executable_artifact() {
        let kernel = Kernel::new(fast_config()).unwrap();
        let scheduler = Scheduler::new(kernel.clone());
        let engine = Arc::new(ScriptedEngine::new(vec![]));

        let err = scheduler.start_worker("ghost", engine.clone()).unwrap_err();
        assert!(matches!(err, KernelError::NotFound { .. }));

        kernel
            .write(
                "rock",
                "rock",
                ArtifactSpec::data(serde_json::Value::Null),
            )
            .await
            .unwrap();
        let err = scheduler.start_worker("rock", engine).unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_worker_executes_script_and_stops() {
        let kernel = kernel_with_agent(fast_config(), "alice").await;
        let scheduler = Scheduler::new(kernel.clone());
        let engine = Arc::new(ScriptedEngine::new(vec![AgentAction::Write {
            id: Some("made_by_loop".into()),
            spec: ArtifactSpec::data(serde_json::json!({ "from": "alice" })),
        }]));
        scheduler.start_worker("alice", engine).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while kernel.store().get("made_by_loop").is_none() {
            assert!(tokio::time::Instant::now() < deadline, "script never ran");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        scheduler.stop_worker("alice", Duration::from_secs(1)).await.unwrap();
        assert!(scheduler.state_of("alice").is_none());
        assert!(kernel
            .events()
            .count_matching(|e| e.kind == EventKind::AgentStateChange
                && e.principal == "alice"
                && e.data["state"] == "stopped")
            >= 1);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let kernel = kernel_with_agent(fast_config(), "alice").await;
        let scheduler = Scheduler::new(kernel);
        scheduler
            .start_worker("alice", Arc::new(ScriptedEngine::new(vec![])))
            .unwrap();
        let err = scheduler
            .start_worker("alice", Arc::new(ScriptedEngine::new(vec![])))
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument { .. }));
        scheduler.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_error_threshold_pauses_and_resume_unparks() {
        let kernel = kernel_with_agent(fast_config(), "alice").await;
        let scheduler = Scheduler::new(kernel.clone());
        // Reading a missing artifact fails every iteration.
        let engine = Arc::new(ScriptedEngine::cycling(vec![AgentAction::Read {
            id: "does_not_exist".into(),
        }]));
        scheduler.start_worker("alice", engine).unwrap();

        wait_for_state(&scheduler, "alice", LoopState::Paused, Duration::from_secs(5)).await;

        // A manual resume puts it back to work (and it will pause again).
        scheduler.resume("alice").await.unwrap();
        wait_for_state(&scheduler, "alice", LoopState::Paused, Duration::from_secs(5)).await;

        scheduler.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_matching_event() {
        let kernel = kernel_with_agent(fast_config(), "alice").await;
        let scheduler = Scheduler::new(kernel.clone());
        let engine = Arc::new(ScriptedEngine::new(vec![
            AgentAction::Sleep(WakeCondition::Event(EventMatch {
                kind: Some(EventKind::ArtifactCreated),
                principal: Some("bob".into()),
            })),
            AgentAction::Write {
                id: Some("awake".into()),
                spec: ArtifactSpec::data(serde_json::Value::Null),
            },
        ]));
        scheduler.start_worker("alice", engine).unwrap();

        wait_for_state(&scheduler, "alice", LoopState::Sleeping, Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(kernel.store().get("awake").is_none());

        kernel
            .write("bob", "bobs_thing", ArtifactSpec::data(serde_json::Value::Null))
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while kernel.store().get("awake").is_none() {
            assert!(tokio::time::Instant::now() < deadline, "worker never woke");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        scheduler.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_timed_sleep_wakes_by_deadline() {
        let kernel = kernel_with_agent(fast_config(), "alice").await;
        let scheduler = Scheduler::new(kernel.clone());
        let engine = Arc::new(ScriptedEngine::new(vec![
            AgentAction::Sleep(WakeCondition::after(Duration::from_millis(50))),
            AgentAction::Write {
                id: Some("after_nap".into()),
                spec: ArtifactSpec::data(serde_json::Value::Null),
            },
        ]));
        scheduler.start_worker("alice", engine).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while kernel.store().get("after_nap").is_none() {
            assert!(tokio::time::Instant::now() < deadline, "nap never ended");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_empty_budget_parks_worker_until_credited() {
        let mut config = fast_config();
        config.costs.operations.insert("decide".to_string(), 1.0);
        let kernel = kernel_with_agent(config, "alice").await;
        let scheduler = Scheduler::new(kernel.clone());
        let engine = Arc::new(ScriptedEngine::new(vec![AgentAction::Write {
            id: Some("funded".into()),
            spec: ArtifactSpec::data(serde_json::Value::Null),
        }]));
        scheduler.start_worker("alice", engine).unwrap();

        // No budget: the decision never runs.
        wait_for_state(&scheduler, "alice", LoopState::Paused, Duration::from_secs(5)).await;
        assert!(kernel.store().get("funded").is_none());

        kernel
            .ledger()
            .credit("alice", crate::ledger::RESOURCE_BUDGET, 5.0)
            .unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while kernel.store().get("funded").is_none() {
            assert!(tokio::time::Instant::now() < deadline, "worker never unparked");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        scheduler.stop_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_resource_exhaustion_pauses_and_recovers() {
        let mut config = fast_config();
        config.rate_limiting.insert(
            "llm_tokens".to_string(),
            crate::config::RateLimitSettings {
                window_seconds: 0.2,
                capacity: 10.0,
                enabled: true,
            },
        );
        config.execution.agent_loop.resources_to_check = vec!["llm_tokens".to_string()];
        let kernel = kernel_with_agent(config, "alice").await;
        let scheduler = Scheduler::new(kernel.clone());

        kernel.rates().consume("alice", "llm_tokens", 10.0).unwrap();
        scheduler
            .start_worker("alice", Arc::new(ScriptedEngine::cycling(vec![])))
            .unwrap();

        wait_for_state(&scheduler, "alice", LoopState::Paused, Duration::from_secs(5)).await;
        // The window rolls over and the worker recovers on its own.
        wait_for_state(&scheduler, "alice", LoopState::Running, Duration::from_secs(5)).await;
        scheduler.stop_all(Duration::from_secs(1)).await;
    }
}
