//! The kernel — composition root and primitive surface
//!
//! One composed value owns every component and mediates every mutation.
//! The five primitives (`read`, `write`, `edit`, `invoke`, `delete`) plus
//! `transfer` all take an asserted caller identity; nothing else in the
//! crate mutates the store or the ledger.
//!
//! Cost timing is asymmetric on purpose: budget and rate capacity are
//! consumed before the gated activity (failing afterwards does not refund
//! them), while scrip payments settle only once the activity has
//! succeeded.

pub mod genesis;
mod invokable;
mod snapshot;

#[cfg(test)]
mod integration_tests;

pub use invokable::{InvokeCtx, MethodHandler};
pub use snapshot::{JsonFileSink, KernelSnapshot, SnapshotSink};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::artifact::{Artifact, ArtifactPatch, ArtifactSpec, ArtifactStore};
use crate::config::KernelConfig;
use crate::contract::{Action, CostPayer, Decision, DenyCode, InvokeHost, PermissionRequest};
use crate::error::{KernelError, Result};
use crate::event::EventLog;
use crate::ledger::{Ledger, RESOURCE_BUDGET, RESOURCE_SCRIP};
use crate::permission::PermissionEngine;
use crate::rate::RateTracker;

pub struct Kernel {
    config: KernelConfig,
    events: Arc<EventLog>,
    store: Arc<ArtifactStore>,
    ledger: Arc<Ledger>,
    rates: Arc<RateTracker>,
    permissions: PermissionEngine,
    invokables: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl Kernel {
    /// Build a kernel and run the genesis bootstrap.
    ///
    /// Permission checks are bypassed only inside this constructor; the
    /// `genesis_` namespace is sealed before it returns and every later
    /// operation, including by the synthetic creator, goes through the
    /// normal primitives.
    pub fn new(config: KernelConfig) -> Result<Arc<Self>> {
        let events = match &config.event_log.path {
            Some(path) => Arc::new(EventLog::with_sink(path)?),
            None => Arc::new(EventLog::new()),
        };
        let store = Arc::new(ArtifactStore::new(events.clone()));
        let ledger = Arc::new(Ledger::new(events.clone()));
        let rates = Arc::new(RateTracker::from_settings(&config.rate_limiting, events.clone()));
        let permissions = PermissionEngine::new(
            store.clone(),
            ledger.clone(),
            events.clone(),
            config.contracts.clone(),
        );

        let kernel = Arc::new(Self {
            config,
            events,
            store,
            ledger,
            rates,
            permissions,
            invokables: RwLock::new(HashMap::new()),
        });

        genesis::bootstrap(&kernel)?;
        kernel.store.close_genesis();
        Ok(kernel)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn rates(&self) -> &Arc<RateTracker> {
        &self.rates
    }

    /// Bind native code to an executable artifact id
    pub fn register_invokable(&self, id: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        self.invokables.write().insert(id.into(), handler);
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    /// Fetch an artifact, subject to its contract
    pub async fn read(&self, caller: &str, id: &str) -> Result<Artifact> {
        self.read_with_depth(caller, id, caller, 0).await
    }

    /// Read on behalf of a handler already running at some nesting level,
    /// so contract cycles through kernel interfaces still hit the depth
    /// bound instead of looping until the sandbox clock expires.
    pub(crate) async fn read_with_depth(
        &self,
        caller: &str,
        id: &str,
        billing_principal: &str,
        depth: u32,
    ) -> Result<Artifact> {
        let target = self.lookup(id)?;
        let decision = self
            .authorize(caller, Action::Read, &target, None, billing_principal, depth)
            .await?;
        self.ensure_payment_possible(&decision, caller, billing_principal)?;
        self.charge_budget(billing_principal, "read")?;
        self.settle_payment(&decision, caller, billing_principal);
        Ok(target)
    }

    /// Create or fully rewrite an artifact.
    ///
    /// Creating a fresh id needs no permission: there is no target to ask.
    /// Rewrites go through the existing artifact's contract.
    pub async fn write(&self, caller: &str, id: &str, spec: ArtifactSpec) -> Result<Artifact> {
        match self.store.get(id) {
            Some(existing) => {
                let decision = self
                    .authorize(caller, Action::Write, &existing, None, caller, 0)
                    .await?;
                self.ensure_payment_possible(&decision, caller, caller)?;
                self.charge_budget(caller, "write")?;
                let written = self.store.write(id, spec, caller)?;
                self.settle_payment(&decision, caller, caller);
                Ok(written)
            }
            None => {
                self.charge_budget(caller, "write")?;
                self.store.write(id, spec, caller)
            }
        }
    }

    /// Create an artifact under a generated id
    pub async fn write_new(&self, caller: &str, spec: ArtifactSpec) -> Result<Artifact> {
        let id = format!("art_{}", uuid::Uuid::new_v4().simple());
        self.write(caller, &id, spec).await
    }

    /// Surgical modification, subject to the artifact's contract
    pub async fn edit(&self, caller: &str, id: &str, patch: ArtifactPatch) -> Result<Artifact> {
        let target = self.lookup(id)?;
        let decision = self.authorize(caller, Action::Edit, &target, None, caller, 0).await?;
        self.ensure_payment_possible(&decision, caller, caller)?;
        self.charge_budget(caller, "edit")?;
        let edited = self.store.edit(id, patch, caller)?;
        self.settle_payment(&decision, caller, caller);
        Ok(edited)
    }

    /// Remove an artifact. References to it are left dangling and resolve
    /// through the fail-open fallback.
    pub async fn delete(&self, caller: &str, id: &str) -> Result<Artifact> {
        let target = self.lookup(id)?;
        let decision = self.authorize(caller, Action::Delete, &target, None, caller, 0).await?;
        self.ensure_payment_possible(&decision, caller, caller)?;
        self.charge_budget(caller, "delete")?;
        let removed = self.store.delete(id, caller)?;
        self.settle_payment(&decision, caller, caller);
        Ok(removed)
    }

    /// Call a declared method on an executable artifact
    pub async fn invoke(
        &self,
        caller: &str,
        id: &str,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.invoke_with_depth(caller, id, method, args, caller, 0).await
    }

    /// Move the caller's own funds. Both endpoints must have standing.
    pub async fn transfer(
        &self,
        caller: &str,
        to: &str,
        resource: &str,
        amount: f64,
    ) -> Result<()> {
        let from = self.lookup(caller)?;
        let recipient = self.lookup(to)?;
        if !from.has_standing {
            return Err(KernelError::invalid(format!("{caller} has no standing")));
        }
        if !recipient.has_standing {
            return Err(KernelError::invalid(format!("{to} has no standing")));
        }
        self.ledger.transfer(caller, to, resource, amount)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub(crate) fn invoke_with_depth<'a>(
        &'a self,
        caller: &'a str,
        id: &'a str,
        method: &'a str,
        args: serde_json::Value,
        billing_principal: &'a str,
        depth: u32,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let target = self.lookup(id)?;
            if !target.can_execute {
                return Err(KernelError::invalid(format!("{id} is not executable")));
            }
            let handler = self.invokables.read().get(id).cloned();
            let Some(handler) = handler else {
                return Err(KernelError::invalid(format!(
                    "{id} declares no invokable methods"
                )));
            };

            let decision = self
                .authorize(
                    caller,
                    Action::Invoke,
                    &target,
                    Some((method, args.clone())),
                    billing_principal,
                    depth,
                )
                .await?;
            self.ensure_payment_possible(&decision, caller, billing_principal)?;

            // Physics first: compute is gone whether or not the call works out.
            self.charge_budget(billing_principal, "invoke")?;

            let ctx = InvokeCtx {
                kernel: self,
                self_id: id,
                caller,
                billing_principal,
                depth,
            };
            let result = handler.call(ctx, method, args).await?;

            // Economics after: the action succeeded, settle the fee.
            self.settle_payment(&decision, caller, billing_principal);
            Ok(result)
        })
    }

    fn lookup(&self, id: &str) -> Result<Artifact> {
        self.store
            .get(id)
            .ok_or_else(|| KernelError::NotFound { id: id.to_string() })
    }

    async fn authorize(
        &self,
        caller: &str,
        action: Action,
        target: &Artifact,
        method: Option<(&str, serde_json::Value)>,
        billing_principal: &str,
        depth: u32,
    ) -> Result<Decision> {
        let mut request = PermissionRequest::new(caller, action, target)
            .with_billing(billing_principal)
            .at_depth(depth);
        if let Some((name, args)) = method {
            request = request.with_method(name, args);
        }

        let decision = self
            .permissions
            .check(request, target.access_contract_id.as_deref(), self)
            .await?;
        if decision.allowed {
            return Ok(decision);
        }

        let reason = decision
            .reason
            .unwrap_or_else(|| "denied by contract".to_string());
        Err(match decision.deny_code {
            Some(DenyCode::Timeout) => KernelError::SandboxTimeout {
                timeout: self.config.contracts.sandbox_timeout(),
            },
            Some(DenyCode::ContractError) => KernelError::ContractError { detail: reason },
            _ => KernelError::PermissionDenied { reason },
        })
    }

    /// Budget cost of an operation, debited before the operation runs
    fn charge_budget(&self, billing_principal: &str, operation: &str) -> Result<()> {
        let cost = self.config.costs.operation(operation);
        if cost > 0.0 {
            self.ledger.debit(billing_principal, RESOURCE_BUDGET, cost)?;
        }
        Ok(())
    }

    /// Verify the payer can cover the decision's fee before acting, so the
    /// post-action settlement cannot strand an unpaid debt.
    fn ensure_payment_possible(
        &self,
        decision: &Decision,
        caller: &str,
        billing_principal: &str,
    ) -> Result<()> {
        if decision.cost <= 0.0 {
            return Ok(());
        }
        let payer = self.payer_of(decision, caller, billing_principal);
        if decision.recipient.as_deref() == Some(payer) {
            return Ok(());
        }
        let available = self.ledger.balance(payer, RESOURCE_SCRIP);
        if available < decision.cost {
            return Err(KernelError::InsufficientResource {
                resource: RESOURCE_SCRIP.to_string(),
                available,
                requested: decision.cost,
            });
        }
        Ok(())
    }

    /// Apply the decision's fee after the action succeeded. A payment that
    /// still fails here (a concurrent spend won the race) is logged and
    /// dropped; the completed action stands.
    fn settle_payment(&self, decision: &Decision, caller: &str, billing_principal: &str) {
        if decision.cost <= 0.0 {
            return;
        }
        let payer = self.payer_of(decision, caller, billing_principal);
        let outcome = match decision.recipient.as_deref() {
            Some(recipient) if recipient != payer => {
                self.ledger
                    .transfer(payer, recipient, RESOURCE_SCRIP, decision.cost)
            }
            Some(_) => Ok(()),
            None => self.ledger.debit(payer, RESOURCE_SCRIP, decision.cost),
        };
        if let Err(err) = outcome {
            tracing::warn!(%payer, cost = decision.cost, %err, "fee settlement failed after action");
        }
    }

    fn payer_of<'a>(
        &self,
        decision: &Decision,
        caller: &'a str,
        billing_principal: &'a str,
    ) -> &'a str {
        match decision.payer {
            CostPayer::BillingPrincipal => billing_principal,
            CostPayer::Caller => caller,
        }
    }
}

#[async_trait]
impl InvokeHost for Kernel {
    async fn invoke_nested(
        &self,
        caller: &str,
        target: &str,
        method: &str,
        args: serde_json::Value,
        billing_principal: &str,
        depth: u32,
    ) -> Result<serde_json::Value> {
        self.invoke_with_depth(caller, target, method, args, billing_principal, depth)
            .await
    }
}
