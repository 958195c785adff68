//! Contract sandbox
//!
//! Policies evaluate against this restricted surface: artifact lookups and
//! ledger balances are read-only, and the only way to reach further state
//! is invoking another artifact, which re-enters the permission engine at
//! `depth + 1`. Mutation APIs are simply absent. The wall-clock timeout is
//! applied by the engine around the whole evaluation.

use async_trait::async_trait;

use crate::artifact::{Artifact, ArtifactStore};
use crate::error::Result;
use crate::ledger::Ledger;

/// Re-entry point for nested invocations
///
/// Implemented by the kernel; the indirection keeps the contract layer
/// below the kernel in the dependency order.
#[async_trait]
pub trait InvokeHost: Send + Sync {
    async fn invoke_nested(
        &self,
        caller: &str,
        target: &str,
        method: &str,
        args: serde_json::Value,
        billing_principal: &str,
        depth: u32,
    ) -> Result<serde_json::Value>;
}

/// The surface a policy evaluation runs against
pub struct Sandbox<'a> {
    store: &'a ArtifactStore,
    ledger: &'a Ledger,
    host: &'a dyn InvokeHost,
    /// Identity nested invocations are attributed to (the contract artifact)
    identity: String,
    billing_principal: String,
    depth: u32,
}

impl<'a> Sandbox<'a> {
    pub fn new(
        store: &'a ArtifactStore,
        ledger: &'a Ledger,
        host: &'a dyn InvokeHost,
        identity: impl Into<String>,
        billing_principal: impl Into<String>,
        depth: u32,
    ) -> Self {
        Self {
            store,
            ledger,
            host,
            identity: identity.into(),
            billing_principal: billing_principal.into(),
            depth,
        }
    }

    /// Read-only artifact lookup
    pub fn artifact(&self, id: &str) -> Option<Artifact> {
        self.store.get(id)
    }

    /// Read-only balance query
    pub fn balance(&self, principal: &str, resource: &str) -> f64 {
        self.ledger.balance(principal, resource)
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Invoke another artifact. The contract becomes the immediate caller;
    /// the billing principal threads through unchanged.
    pub async fn invoke(
        &self,
        target: &str,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.host
            .invoke_nested(
                &self.identity,
                target,
                method,
                args,
                &self.billing_principal,
                self.depth + 1,
            )
            .await
    }
}

/// Host that refuses all nested invocations; used where a policy is known
/// not to invoke (and by tests)
pub struct NullInvokeHost;

#[async_trait]
impl InvokeHost for NullInvokeHost {
    async fn invoke_nested(
        &self,
        _caller: &str,
        target: &str,
        _method: &str,
        _args: serde_json::Value,
        _billing_principal: &str,
        _depth: u32,
    ) -> Result<serde_json::Value> {
        Err(crate::error::KernelError::ContractError {
            detail: format!("nested invocation of {target} is not available here"),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Arc;

    static NULL_HOST: NullInvokeHost = NullInvokeHost;

    pub fn sandbox_for<'a>(
        store: &'a Arc<ArtifactStore>,
        ledger: &'a Arc<Ledger>,
    ) -> Sandbox<'a> {
        Sandbox::new(store, ledger, &NULL_HOST, "test_contract", "test_billing", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactSpec;
    use crate::event::EventLog;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sandbox_reads_store_and_ledger() {
        let events = Arc::new(EventLog::new());
        let store = Arc::new(ArtifactStore::new(events.clone()));
        let ledger = Arc::new(Ledger::new(events));
        store
            .write("art1", ArtifactSpec::data(serde_json::json!(1)), "alice")
            .unwrap();
        ledger.credit("alice", "scrip", 4.0).unwrap();

        let sandbox = test_support::sandbox_for(&store, &ledger);
        assert!(sandbox.artifact("art1").is_some());
        assert!(sandbox.artifact("missing").is_none());
        assert_eq!(sandbox.balance("alice", "scrip"), 4.0);
    }

    #[tokio::test]
    async fn test_null_host_rejects_invocation() {
        let events = Arc::new(EventLog::new());
        let store = Arc::new(ArtifactStore::new(events.clone()));
        let ledger = Arc::new(Ledger::new(events));
        let sandbox = test_support::sandbox_for(&store, &ledger);
        let err = sandbox
            .invoke("other", "ping", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::KernelError::ContractError { .. }
        ));
    }
}
