//! Contracts — artifact-level access policies
//!
//! A contract decides whether a (caller, action, target) triple is
//! permitted and what side effects the decision carries. Contracts only
//! decide; every mutation stays in the kernel. Policies come in two forms:
//! native decision functions bound to genesis artifact ids, and declarative
//! rule documents carried in user-authored contract artifacts.

mod native;
mod rules;
mod sandbox;

pub use native::{CreatorOnlyPolicy, FreewarePolicy, PrivatePolicy, SelfOwnedPolicy};
pub use rules::{Rule, RulePolicy, RuleSet};
pub use sandbox::{InvokeHost, NullInvokeHost, Sandbox};

/// Ids of the policy contract artifacts created at bootstrap. They live at
/// this layer so configuration defaults can name them without reaching up
/// into the kernel.
pub const FREEWARE_CONTRACT_ID: &str = "genesis_contract_freeware";
pub const PRIVATE_CONTRACT_ID: &str = "genesis_contract_private";
pub const CREATOR_ONLY_CONTRACT_ID: &str = "genesis_contract_creator_only";
pub const SELF_OWNED_CONTRACT_ID: &str = "genesis_contract_self_owned";

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// The five primitive actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Edit,
    Invoke,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Edit => "edit",
            Self::Invoke => "invoke",
            Self::Delete => "delete",
        }
    }

    pub fn mutates(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The minimal tuple a contract sees
///
/// Nothing else about the world is passed in. A contract that needs more
/// must invoke other artifacts through the sandbox, which re-enters the
/// permission engine with `depth + 1`.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    /// Immediate caller: the nearest invoker on the chain, never the
    /// originator unless they coincide
    pub caller: String,
    pub action: Action,
    pub target_id: String,
    pub target_state: HashMap<String, serde_json::Value>,
    /// Provenance of the target; informational input to contract logic
    pub created_by: String,
    /// Set for invoke only
    pub method: Option<String>,
    pub args: Option<serde_json::Value>,
    /// Originator of the invocation chain; unchanged through nesting
    pub billing_principal: String,
    /// Nesting level of this check
    pub depth: u32,
}

impl PermissionRequest {
    pub fn new(
        caller: impl Into<String>,
        action: Action,
        target: &crate::artifact::Artifact,
    ) -> Self {
        let caller = caller.into();
        Self {
            billing_principal: caller.clone(),
            caller,
            action,
            target_id: target.id.clone(),
            target_state: target.state.clone(),
            created_by: target.created_by.clone(),
            method: None,
            args: None,
            depth: 0,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>, args: serde_json::Value) -> Self {
        self.method = Some(method.into());
        self.args = Some(args);
        self
    }

    pub fn with_billing(mut self, billing_principal: impl Into<String>) -> Self {
        self.billing_principal = billing_principal.into();
        self
    }

    pub fn at_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

/// Who gets debited for a decision's cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPayer {
    /// The originator of the chain (default)
    #[default]
    BillingPrincipal,
    /// The immediate caller
    Caller,
}

/// Why a denial happened, for mapping onto the error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyCode {
    /// The policy said no
    Policy,
    /// The contract terminated abnormally
    ContractError,
    /// The sandbox wall clock expired
    Timeout,
}

/// Outcome of a contract evaluation
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub deny_code: Option<DenyCode>,
    /// Scrip owed if the gated action succeeds
    pub cost: f64,
    /// Principal paid the cost; `None` burns it
    pub recipient: Option<String>,
    pub payer: CostPayer,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            deny_code: None,
            cost: 0.0,
            recipient: None,
            payer: CostPayer::default(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            deny_code: Some(DenyCode::Policy),
            cost: 0.0,
            recipient: None,
            payer: CostPayer::default(),
        }
    }

    pub fn contract_error(detail: impl Into<String>) -> Self {
        let mut decision = Self::deny(detail);
        decision.deny_code = Some(DenyCode::ContractError);
        decision
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        let mut decision = Self::deny(detail);
        decision.deny_code = Some(DenyCode::Timeout);
        decision
    }

    pub fn with_fee(mut self, cost: f64, recipient: Option<String>) -> Self {
        self.cost = cost;
        self.recipient = recipient;
        self
    }

    pub fn with_payer(mut self, payer: CostPayer) -> Self {
        self.payer = payer;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A policy's decision surface
///
/// Implementations must be pure with respect to kernel state: reads go
/// through the sandbox, and the only outward edge is `sandbox.invoke`.
#[async_trait]
pub trait ContractPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(
        &self,
        request: &PermissionRequest,
        sandbox: &Sandbox<'_>,
    ) -> Result<Decision>;
}
