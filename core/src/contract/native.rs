//! Native policies bound to genesis contract artifacts
//!
//! These are the decision functions every economy starts with. They are
//! also the short-circuit path: the engine dispatches to them by artifact
//! id without entering the rule evaluator, and their results are identical
//! to what an equivalent rule document would produce.

use async_trait::async_trait;

use super::{Action, ContractPolicy, Decision, PermissionRequest, Sandbox};
use crate::artifact::STATE_WRITER;
use crate::error::Result;

/// Read and invoke for everyone; write, edit and delete for the creator
pub struct FreewarePolicy;

#[async_trait]
impl ContractPolicy for FreewarePolicy {
    fn name(&self) -> &'static str {
        "freeware"
    }

    async fn check(
        &self,
        request: &PermissionRequest,
        _sandbox: &Sandbox<'_>,
    ) -> Result<Decision> {
        match request.action {
            Action::Read | Action::Invoke => Ok(Decision::allow()),
            Action::Write | Action::Edit | Action::Delete => {
                if request.caller == request.created_by {
                    Ok(Decision::allow())
                } else {
                    Ok(Decision::deny(format!(
                        "freeware restricts {} to the creator",
                        request.action
                    )))
                }
            }
        }
    }
}

/// Everything for the creator, nothing for anyone else
pub struct CreatorOnlyPolicy;

#[async_trait]
impl ContractPolicy for CreatorOnlyPolicy {
    fn name(&self) -> &'static str {
        "creator_only"
    }

    async fn check(
        &self,
        request: &PermissionRequest,
        _sandbox: &Sandbox<'_>,
    ) -> Result<Decision> {
        if request.caller == request.created_by {
            Ok(Decision::allow())
        } else {
            Ok(Decision::deny(format!(
                "{} is restricted to the creator",
                request.action
            )))
        }
    }
}

/// Only the artifact itself may act on it
pub struct PrivatePolicy;

#[async_trait]
impl ContractPolicy for PrivatePolicy {
    fn name(&self) -> &'static str {
        "private"
    }

    async fn check(
        &self,
        request: &PermissionRequest,
        _sandbox: &Sandbox<'_>,
    ) -> Result<Decision> {
        if request.caller == request.target_id {
            Ok(Decision::allow())
        } else {
            Ok(Decision::deny("private artifact"))
        }
    }
}

/// Reads for everyone; mutation and invocation for the state writer
///
/// The `writer` state key names the current authorized modifier and can be
/// handed over by whoever holds it. Falls back to the creator when the key
/// is missing.
pub struct SelfOwnedPolicy;

#[async_trait]
impl ContractPolicy for SelfOwnedPolicy {
    fn name(&self) -> &'static str {
        "self_owned"
    }

    async fn check(
        &self,
        request: &PermissionRequest,
        _sandbox: &Sandbox<'_>,
    ) -> Result<Decision> {
        if request.action == Action::Read {
            return Ok(Decision::allow());
        }
        let writer = request
            .target_state
            .get(STATE_WRITER)
            .and_then(|v| v.as_str())
            .unwrap_or(&request.created_by);
        if request.caller == writer {
            Ok(Decision::allow())
        } else {
            Ok(Decision::deny(format!(
                "{} is restricted to the current writer ({writer})",
                request.action
            )))
        }
    }
}
