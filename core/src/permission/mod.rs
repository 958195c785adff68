//! Permission engine
//!
//! Routes every (caller, action, target) triple through the target's access
//! contract. The engine only decides; the kernel applies whatever side
//! effects the decision carries. Contract resolution is fail-open on
//! dangling pointers: a missing contract falls back to the configured
//! default and the fallback is recorded as a warning event.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::artifact::ArtifactStore;
use crate::config::{ContractSettings, DefaultPolicy};
use crate::contract::{
    ContractPolicy, CreatorOnlyPolicy, Decision, FreewarePolicy, InvokeHost, PermissionRequest,
    PrivatePolicy, RulePolicy, Sandbox,
};
use crate::error::{KernelError, Result};
use crate::event::{EventKind, EventLog};
use crate::ledger::Ledger;

pub struct PermissionEngine {
    store: Arc<ArtifactStore>,
    ledger: Arc<Ledger>,
    events: Arc<EventLog>,
    settings: ContractSettings,
    /// Native decision functions keyed by contract artifact id. Dispatching
    /// here instead of through the rule evaluator is the sanctioned
    /// short-circuit: results are identical to evaluating the equivalent
    /// rule document.
    natives: RwLock<HashMap<String, Arc<dyn ContractPolicy>>>,
    freeware: Arc<dyn ContractPolicy>,
    creator_only: Arc<dyn ContractPolicy>,
    private: Arc<dyn ContractPolicy>,
}

impl PermissionEngine {
    pub fn new(
        store: Arc<ArtifactStore>,
        ledger: Arc<Ledger>,
        events: Arc<EventLog>,
        settings: ContractSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            events,
            settings,
            natives: RwLock::new(HashMap::new()),
            freeware: Arc::new(FreewarePolicy),
            creator_only: Arc::new(CreatorOnlyPolicy),
            private: Arc::new(PrivatePolicy),
        }
    }

    /// Bind a native policy to a contract artifact id
    pub fn register_native(&self, contract_id: impl Into<String>, policy: Arc<dyn ContractPolicy>) {
        self.natives.write().insert(contract_id.into(), policy);
    }

    pub fn settings(&self) -> &ContractSettings {
        &self.settings
    }

    /// Decide one request. Exactly one `permission_decision` event is
    /// emitted per call, allowed or denied; the event is informational and
    /// does not count as a state mutation of the target.
    pub async fn check(
        &self,
        request: PermissionRequest,
        contract_ref: Option<&str>,
        host: &dyn InvokeHost,
    ) -> Result<Decision> {
        if request.depth > self.settings.max_permission_depth {
            self.emit_decision(&request, "depth", false, Some("contract depth exceeded"));
            return Err(KernelError::DepthExceeded {
                depth: request.depth,
                max_depth: self.settings.max_permission_depth,
            });
        }

        let (policy, identity) = self.resolve(&request, contract_ref);
        let decision = self.evaluate(&request, policy.as_ref(), &identity, host).await;
        self.emit_decision(
            &request,
            &identity,
            decision.allowed,
            decision.reason.as_deref(),
        );
        Ok(decision)
    }

    /// Contract resolution: explicit pointer, then dangling fallback, then
    /// the configured default policy.
    fn resolve(
        &self,
        request: &PermissionRequest,
        contract_ref: Option<&str>,
    ) -> (Arc<dyn ContractPolicy>, String) {
        let Some(contract_id) = contract_ref else {
            return self.default_policy();
        };

        if let Some(resolved) = self.lookup(contract_id) {
            return resolved;
        }

        // Dangling pointer. Permanent lock-out yields no useful pressure,
        // so degrade to the configured fallback and record the fact.
        self.events.append(
            EventKind::DanglingContractFallback,
            request.caller.clone(),
            serde_json::json!({
                "target": request.target_id,
                "missing": contract_id,
                "fallback": self.settings.default_on_missing,
            }),
        );
        tracing::warn!(
            target_id = %request.target_id,
            missing = %contract_id,
            "dangling access contract, using fallback"
        );

        self.lookup(&self.settings.default_on_missing)
            .unwrap_or_else(|| self.default_policy())
    }

    fn lookup(&self, contract_id: &str) -> Option<(Arc<dyn ContractPolicy>, String)> {
        if let Some(native) = self.natives.read().get(contract_id) {
            return Some((native.clone(), contract_id.to_string()));
        }
        let artifact = self.store.get(contract_id)?;
        match RulePolicy::from_content(&artifact.content) {
            Ok(policy) => Some((Arc::new(policy), contract_id.to_string())),
            Err(err) => Some((
                Arc::new(BrokenContract {
                    detail: err.to_string(),
                }),
                contract_id.to_string(),
            )),
        }
    }

    fn default_policy(&self) -> (Arc<dyn ContractPolicy>, String) {
        let policy = match self.settings.default_when_null {
            DefaultPolicy::CreatorOnly => self.creator_only.clone(),
            DefaultPolicy::Freeware => self.freeware.clone(),
            DefaultPolicy::Private => self.private.clone(),
        };
        let identity = policy.name().to_string();
        (policy, identity)
    }

    /// Run one policy inside the sandbox with the wall-clock budget.
    /// Abnormal termination and timeouts both land as denials, never as
    /// kernel faults.
    async fn evaluate(
        &self,
        request: &PermissionRequest,
        policy: &dyn ContractPolicy,
        identity: &str,
        host: &dyn InvokeHost,
    ) -> Decision {
        let sandbox = Sandbox::new(
            &self.store,
            &self.ledger,
            host,
            identity,
            request.billing_principal.clone(),
            request.depth,
        );
        let timeout = self.settings.sandbox_timeout();
        match tokio::time::timeout(timeout, policy.check(request, &sandbox)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(err)) => {
                tracing::warn!(contract = identity, %err, "contract terminated abnormally");
                Decision::contract_error(err.to_string())
            }
            Err(_) => Decision::timeout(format!(
                "contract {identity} exceeded the {timeout:?} sandbox budget"
            )),
        }
    }

    fn emit_decision(
        &self,
        request: &PermissionRequest,
        contract: &str,
        allowed: bool,
        reason: Option<&str>,
    ) {
        self.events.append(
            EventKind::PermissionDecision,
            request.caller.clone(),
            serde_json::json!({
                "action": request.action.as_str(),
                "target": request.target_id,
                "allowed": allowed,
                "reason": reason,
                "contract": contract,
                "depth": request.depth,
            }),
        );
    }
}

/// Stand-in policy for contract artifacts whose rule document failed to
/// parse; denies with the parse detail
struct BrokenContract {
    detail: String,
}

#[async_trait::async_trait]
impl ContractPolicy for BrokenContract {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn check(
        &self,
        _request: &PermissionRequest,
        _sandbox: &Sandbox<'_>,
    ) -> Result<Decision> {
        Ok(Decision::contract_error(self.detail.clone()))
    }
}
