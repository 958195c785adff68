//! Invokable method handlers
//!
//! Executable artifacts are backed by native handlers registered against
//! their id. A handler runs with the kernel at hand but acts through a
//! context that pins its identity: nested invocations are attributed to the
//! artifact whose method is running, never to the original caller, while
//! the billing principal threads through untouched.

use async_trait::async_trait;

use super::Kernel;
use crate::error::Result;

/// Execution context handed to a method handler
pub struct InvokeCtx<'a> {
    pub(crate) kernel: &'a Kernel,
    /// Artifact whose method is running; becomes the immediate caller of
    /// anything this handler invokes
    pub self_id: &'a str,
    /// Immediate caller of this invocation
    pub caller: &'a str,
    /// Originator of the whole chain, for resource accounting
    pub billing_principal: &'a str,
    pub depth: u32,
}

impl InvokeCtx<'_> {
    /// Invoke another artifact. Delegation is explicit: the callee's
    /// contract will see `self_id` as caller, not whoever called us.
    pub async fn invoke(
        &self,
        target: &str,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.kernel
            .invoke_with_depth(
                self.self_id,
                target,
                method,
                args,
                self.billing_principal,
                self.depth + 1,
            )
            .await
    }

    /// Read-only balance query
    pub fn balance(&self, principal: &str, resource: &str) -> f64 {
        self.kernel.ledger().balance(principal, resource)
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        self.kernel
    }
}

/// Native code behind an executable artifact
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(
        &self,
        ctx: InvokeCtx<'_>,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Helper for handlers: required numeric argument
pub(crate) fn require_f64(args: &serde_json::Value, key: &str) -> Result<f64> {
    args.get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| crate::error::KernelError::invalid(format!("missing numeric argument {key}")))
}

/// Helper for handlers: required string argument
pub(crate) fn require_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::error::KernelError::invalid(format!("missing string argument {key}")))
}
