//! The cooperative worker loop
//!
//! One long-lived task per autonomous principal. Control flows in over a
//! channel (resume/stop), state flows out over a watch, and a cancellation
//! token forces exit at the next suspension point when a graceful stop
//! overruns its timeout. Cancellation is cooperative: an iteration that
//! has begun a kernel primitive always completes it, so the kernel's
//! no-partial-mutation guarantee needs no help from this loop.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::decision::{AgentAction, DecisionEngine, Observation};
use super::wake::WakeCondition;
use crate::config::LoopSettings;
use crate::error::Result;
use crate::event::EventKind;
use crate::kernel::Kernel;
use crate::ledger::RESOURCE_BUDGET;

/// Cap on events carried into one observation
const MAX_OBSERVED_EVENTS: usize = 64;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Starting,
    Running,
    Sleeping,
    Paused,
    Stopping,
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(tag)
    }
}

pub(super) enum ControlMsg {
    Resume,
    Stop,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// Handle to a spawned worker
pub struct WorkerHandle {
    principal: String,
    control: mpsc::Sender<ControlMsg>,
    state_rx: watch::Receiver<LoopState>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn state(&self) -> LoopState {
        *self.state_rx.borrow()
    }

    /// Unpark an error-paused or sleeping worker
    pub async fn resume(&self) {
        let _ = self.control.send(ControlMsg::Resume).await;
    }

    pub(super) fn control_sender(&self) -> mpsc::Sender<ControlMsg> {
        self.control.clone()
    }

    /// Graceful stop: ask, wait up to `timeout` for the current iteration
    /// to drain, then force cancellation at the next suspension point.
    pub(super) async fn shutdown(mut self, timeout: Duration) {
        let _ = self.control.send(ControlMsg::Stop).await;
        if tokio::time::timeout(timeout, &mut self.join).await.is_ok() {
            return;
        }
        tracing::warn!(principal = %self.principal, "worker overran stop timeout, cancelling");
        self.cancel.cancel();
        if tokio::time::timeout(Duration::from_millis(500), &mut self.join)
            .await
            .is_err()
        {
            self.join.abort();
            let _ = (&mut self.join).await;
        }
    }
}

/// Spawn the loop for one principal
pub(super) fn spawn(
    principal: String,
    kernel: Arc<Kernel>,
    engine: Arc<dyn DecisionEngine>,
    settings: LoopSettings,
) -> WorkerHandle {
    let (control_tx, control_rx) = mpsc::channel(16);
    let (state_tx, state_rx) = watch::channel(LoopState::Starting);
    let cancel = CancellationToken::new();

    let worker = AgentWorker {
        observed_seq: kernel.events().next_sequence(),
        principal: principal.clone(),
        kernel,
        engine,
        settings,
        control: control_rx,
        state_tx,
        cancel: cancel.clone(),
        iteration: 0,
        consecutive_errors: 0,
        last_error: None,
        sleeping: None,
        paused_on_errors: false,
    };
    let join = tokio::spawn(worker.run());

    WorkerHandle {
        principal,
        control: control_tx,
        state_rx,
        cancel,
        join,
    }
}

struct SleepState {
    condition: WakeCondition,
    since_seq: u64,
    deadline: Option<Instant>,
}

struct AgentWorker {
    principal: String,
    kernel: Arc<Kernel>,
    engine: Arc<dyn DecisionEngine>,
    settings: LoopSettings,
    control: mpsc::Receiver<ControlMsg>,
    state_tx: watch::Sender<LoopState>,
    cancel: CancellationToken,
    iteration: u64,
    consecutive_errors: u32,
    last_error: Option<String>,
    observed_seq: u64,
    sleeping: Option<SleepState>,
    paused_on_errors: bool,
}

impl AgentWorker {
    async fn run(mut self) {
        self.publish(LoopState::Running);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.drain_control() == Flow::Stop {
                break;
            }

            // Sleeping: poll the wake condition, nothing else runs.
            if let Some(sleep) = self.sleeping.take() {
                if self.wake_due(&sleep) {
                    self.publish(LoopState::Running);
                } else {
                    self.sleeping = Some(sleep);
                    if self.idle(self.settings.min_loop_delay()).await == Flow::Stop {
                        break;
                    }
                    continue;
                }
            }

            // Error pause: only a manual resume (or stop) unparks it.
            if self.paused_on_errors {
                match self.wait_control().await {
                    Flow::Stop => break,
                    Flow::Continue => continue,
                }
            }

            // Resource gates: rolling-window capacity and the budget the
            // next decision will cost.
            if let Some(resource) = self.exhausted_resource() {
                if self.state() != LoopState::Paused {
                    tracing::debug!(
                        principal = %self.principal,
                        %resource,
                        "pausing on resource exhaustion"
                    );
                    self.publish(LoopState::Paused);
                }
                if self.idle(self.settings.resource_check_interval()).await == Flow::Stop {
                    break;
                }
                if self.exhausted_resource().is_none() {
                    self.publish(LoopState::Running);
                }
                continue;
            }
            if self.state() == LoopState::Paused {
                self.publish(LoopState::Running);
            }

            // The engine's own cost is paid before it runs; a failed or
            // skipped iteration does not refund it.
            let decide_cost = self.kernel.config().costs.operation("decide");
            if decide_cost > 0.0 {
                if self
                    .kernel
                    .ledger()
                    .debit(&self.principal, RESOURCE_BUDGET, decide_cost)
                    .is_err()
                {
                    // Lost a race against the gate check; re-gate.
                    continue;
                }
            }

            self.iteration += 1;
            let observation = self.observe();
            let delay = match self.engine.decide_action(&self.principal, &observation).await {
                Ok(None) => self.settings.min_loop_delay(),
                Ok(Some(AgentAction::Sleep(condition))) => {
                    self.begin_sleep(condition);
                    continue;
                }
                Ok(Some(action)) => match self.execute(action).await {
                    Ok(()) => {
                        self.consecutive_errors = 0;
                        self.last_error = None;
                        self.settings.min_loop_delay()
                    }
                    Err(err) => self.note_failure(err.to_string()),
                },
                Err(err) => self.note_failure(err.to_string()),
            };
            if self.paused_on_errors {
                continue;
            }
            if self.idle(delay).await == Flow::Stop {
                break;
            }
        }

        self.publish(LoopState::Stopping);
        self.publish(LoopState::Stopped);
    }

    /// Execute one decided action through the kernel primitives
    async fn execute(&self, action: AgentAction) -> Result<()> {
        let me = self.principal.as_str();
        match action {
            AgentAction::Read { id } => {
                self.kernel.read(me, &id).await?;
            }
            AgentAction::Write { id: Some(id), spec } => {
                self.kernel.write(me, &id, spec).await?;
            }
            AgentAction::Write { id: None, spec } => {
                self.kernel.write_new(me, spec).await?;
            }
            AgentAction::Edit { id, patch } => {
                self.kernel.edit(me, &id, patch).await?;
            }
            AgentAction::Delete { id } => {
                self.kernel.delete(me, &id).await?;
            }
            AgentAction::Invoke { id, method, args } => {
                self.kernel.invoke(me, &id, &method, args).await?;
            }
            AgentAction::Transfer {
                to,
                resource,
                amount,
            } => {
                self.kernel.transfer(me, &to, &resource, amount).await?;
            }
            // Handled before execute.
            AgentAction::Sleep(_) => {}
        }
        Ok(())
    }

    fn observe(&mut self) -> Observation {
        let mut recent = self.kernel.events().replay_from(self.observed_seq);
        self.observed_seq = self.kernel.events().next_sequence();
        if recent.len() > MAX_OBSERVED_EVENTS {
            recent.drain(..recent.len() - MAX_OBSERVED_EVENTS);
        }
        let mut remaining = HashMap::new();
        for resource in &self.settings.resources_to_check {
            remaining.insert(
                resource.clone(),
                self.kernel.rates().remaining(&self.principal, resource),
            );
        }
        Observation {
            principal: self.principal.clone(),
            iteration: self.iteration,
            balances: self.kernel.ledger().balances(&self.principal),
            remaining,
            recent_events: recent,
            last_error: self.last_error.clone(),
        }
    }

    fn begin_sleep(&mut self, condition: WakeCondition) {
        let deadline = condition.duration().map(|d| Instant::now() + d);
        self.sleeping = Some(SleepState {
            since_seq: self.kernel.events().next_sequence(),
            deadline,
            condition,
        });
        self.publish(LoopState::Sleeping);
    }

    fn wake_due(&self, sleep: &SleepState) -> bool {
        match &sleep.condition {
            WakeCondition::After { .. } => sleep
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(true),
            WakeCondition::Event(matcher) => self
                .kernel
                .events()
                .replay_from(sleep.since_seq)
                .iter()
                .any(|event| matcher.matches(event)),
            WakeCondition::ResourceAtLeast { resource, amount } => {
                self.kernel.rates().remaining(&self.principal, resource) >= *amount
            }
        }
    }

    fn exhausted_resource(&self) -> Option<String> {
        if let Some(resource) = self
            .settings
            .resources_to_check
            .iter()
            .find(|resource| self.kernel.rates().remaining(&self.principal, resource) <= 0.0)
        {
            return Some(resource.clone());
        }
        let decide_cost = self.kernel.config().costs.operation("decide");
        if decide_cost > 0.0
            && self.kernel.ledger().balance(&self.principal, RESOURCE_BUDGET) < decide_cost
        {
            return Some(RESOURCE_BUDGET.to_string());
        }
        None
    }

    fn note_failure(&mut self, detail: String) -> Duration {
        self.consecutive_errors += 1;
        self.last_error = Some(detail.clone());
        tracing::warn!(
            principal = %self.principal,
            errors = self.consecutive_errors,
            %detail,
            "worker iteration failed"
        );
        if self.consecutive_errors >= self.settings.max_consecutive_errors {
            self.paused_on_errors = true;
            self.publish(LoopState::Paused);
            return Duration::ZERO;
        }
        self.backoff_delay()
    }

    fn backoff_delay(&self) -> Duration {
        let base = self.settings.min_loop_delay().max(Duration::from_millis(1));
        let exp = 2u32.saturating_pow(self.consecutive_errors.saturating_sub(1).min(16));
        let delay = base.saturating_mul(exp).min(self.settings.max_loop_delay());
        // Jitter keeps a fleet of erroring workers out of lock-step.
        let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.1);
        delay.mul_f64(jitter).min(self.settings.max_loop_delay())
    }

    fn state(&self) -> LoopState {
        *self.state_tx.borrow()
    }

    fn publish(&self, state: LoopState) {
        if self.state() == state {
            return;
        }
        let _ = self.state_tx.send(state);
        self.kernel.events().append(
            EventKind::AgentStateChange,
            self.principal.clone(),
            serde_json::json!({ "state": state }),
        );
    }

    fn drain_control(&mut self) -> Flow {
        loop {
            match self.control.try_recv() {
                Ok(ControlMsg::Stop) => return Flow::Stop,
                Ok(ControlMsg::Resume) => self.apply_resume(),
                Err(mpsc::error::TryRecvError::Empty) => return Flow::Continue,
                Err(mpsc::error::TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }

    fn apply_resume(&mut self) {
        self.paused_on_errors = false;
        self.consecutive_errors = 0;
        let was_sleeping = self.sleeping.take().is_some();
        if was_sleeping || self.state() == LoopState::Paused {
            self.publish(LoopState::Running);
        }
    }

    /// Suspend between iterations; control and cancellation cut it short
    async fn idle(&mut self, delay: Duration) -> Flow {
        tokio::select! {
            _ = self.cancel.cancelled() => Flow::Stop,
            msg = self.control.recv() => match msg {
                Some(ControlMsg::Stop) | None => Flow::Stop,
                Some(ControlMsg::Resume) => {
                    self.apply_resume();
                    Flow::Continue
                }
            },
            _ = tokio::time::sleep(delay) => Flow::Continue,
        }
    }

    /// Block until resumed, stopped or cancelled (error-pause parking)
    async fn wait_control(&mut self) -> Flow {
        tokio::select! {
            _ = self.cancel.cancelled() => Flow::Stop,
            msg = self.control.recv() => match msg {
                Some(ControlMsg::Stop) | None => Flow::Stop,
                Some(ControlMsg::Resume) => {
                    self.apply_resume();
                    Flow::Continue
                }
            },
        }
    }
}
