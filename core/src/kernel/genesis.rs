//! Genesis bootstrap
//!
//! A privileged phase scoped to the kernel constructor. It creates the
//! fixed set of genesis artifacts (policy contracts, kernel interfaces,
//! the mint) attributed to a synthetic creator, binds their native code,
//! and hands back. The caller seals the `genesis_` namespace immediately
//! afterwards; from then on even the synthetic creator goes through the
//! normal primitives.

use async_trait::async_trait;
use std::sync::Arc;

use super::invokable::{require_f64, require_str, InvokeCtx, MethodHandler};
use super::Kernel;
use crate::artifact::{ArtifactSpec, MethodSpec, KIND_AGENT, KIND_CONTRACT, KIND_INTERFACE};
use crate::contract::{CreatorOnlyPolicy, FreewarePolicy, PrivatePolicy, SelfOwnedPolicy};
use crate::error::{KernelError, Result};
use crate::ledger::RESOURCE_SCRIP;

/// Synthetic creator all genesis artifacts are attributed to
pub const GENESIS_CREATOR: &str = "genesis_system";

pub use crate::contract::{
    CREATOR_ONLY_CONTRACT_ID, FREEWARE_CONTRACT_ID, PRIVATE_CONTRACT_ID, SELF_OWNED_CONTRACT_ID,
};

pub const LEDGER_INTERFACE_ID: &str = "genesis_ledger";
pub const STORE_INTERFACE_ID: &str = "genesis_store";
pub const EVENT_LOG_INTERFACE_ID: &str = "genesis_event_log";
pub const MINT_ID: &str = "genesis_mint";

/// Upper bound on a single mint call; keeps one runaway loop from printing
/// unbounded currency in a single invocation
const MAX_MINT_PER_CALL: f64 = 1_000.0;

pub(super) fn bootstrap(kernel: &Arc<Kernel>) -> Result<()> {
    let store = kernel.store();

    // The synthetic creator itself, so fees have somewhere to land.
    store.create(
        GENESIS_CREATOR,
        ArtifactSpec {
            kind: KIND_AGENT.to_string(),
            content: serde_json::json!({ "description": "synthetic bootstrap creator" }),
            access_contract_id: Some(FREEWARE_CONTRACT_ID.to_string()),
            has_standing: true,
            can_execute: false,
            ..Default::default()
        },
        GENESIS_CREATOR,
    )?;

    // Policy contracts. Their content documents the policy; the decision
    // logic itself is native code bound below.
    for (id, description) in [
        (
            FREEWARE_CONTRACT_ID,
            "read and invoke for everyone, write/edit/delete for the creator",
        ),
        (PRIVATE_CONTRACT_ID, "only the artifact itself may act"),
        (CREATOR_ONLY_CONTRACT_ID, "everything for the creator, nothing for others"),
        (
            SELF_OWNED_CONTRACT_ID,
            "reads for everyone, mutation for the principal named in state.writer",
        ),
    ] {
        store.create(
            id,
            ArtifactSpec {
                kind: KIND_CONTRACT.to_string(),
                content: serde_json::json!({ "policy": id, "description": description }),
                access_contract_id: Some(FREEWARE_CONTRACT_ID.to_string()),
                ..Default::default()
            },
            GENESIS_CREATOR,
        )?;
    }

    kernel
        .permissions
        .register_native(FREEWARE_CONTRACT_ID, Arc::new(FreewarePolicy));
    kernel
        .permissions
        .register_native(PRIVATE_CONTRACT_ID, Arc::new(PrivatePolicy));
    kernel
        .permissions
        .register_native(CREATOR_ONLY_CONTRACT_ID, Arc::new(CreatorOnlyPolicy));
    kernel
        .permissions
        .register_native(SELF_OWNED_CONTRACT_ID, Arc::new(SelfOwnedPolicy));

    // Kernel interfaces: executable artifacts backed by native handlers.
    let interfaces: [(&str, Vec<MethodSpec>, Arc<dyn MethodHandler>); 4] = [
        (
            MINT_ID,
            vec![MethodSpec::new("mint", "create scrip for the caller")],
            Arc::new(MintHandler),
        ),
        (
            LEDGER_INTERFACE_ID,
            vec![
                MethodSpec::new("balance", "balance of one resource"),
                MethodSpec::new("balances", "all balances of a principal"),
                MethodSpec::new("transfer", "move the caller's own funds"),
            ],
            Arc::new(LedgerHandler),
        ),
        (
            STORE_INTERFACE_ID,
            vec![
                MethodSpec::new("list", "all artifact ids"),
                MethodSpec::new("get", "fetch one artifact, subject to its contract"),
            ],
            Arc::new(StoreHandler),
        ),
        (
            EVENT_LOG_INTERFACE_ID,
            vec![
                MethodSpec::new("tail", "events at or after a sequence number"),
                MethodSpec::new("sequence", "next sequence number"),
            ],
            Arc::new(EventLogHandler),
        ),
    ];

    for (id, methods, handler) in interfaces {
        store.create(
            id,
            ArtifactSpec {
                kind: KIND_INTERFACE.to_string(),
                access_contract_id: Some(FREEWARE_CONTRACT_ID.to_string()),
                can_execute: true,
                interface: Some(methods),
                ..Default::default()
            },
            GENESIS_CREATOR,
        )?;
        kernel.register_invokable(id, handler);
    }

    Ok(())
}

/// `genesis_mint` — the only source of new scrip
struct MintHandler;

#[async_trait]
impl MethodHandler for MintHandler {
    async fn call(
        &self,
        ctx: InvokeCtx<'_>,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match method {
            "mint" => {
                let amount = require_f64(&args, "amount")?;
                if amount <= 0.0 || amount > MAX_MINT_PER_CALL {
                    return Err(KernelError::invalid(format!(
                        "mint amount must be in (0, {MAX_MINT_PER_CALL}], got {amount}"
                    )));
                }
                ctx.kernel()
                    .ledger()
                    .credit(ctx.caller, RESOURCE_SCRIP, amount)?;
                Ok(serde_json::json!({
                    "minted": amount,
                    "balance": ctx.balance(ctx.caller, RESOURCE_SCRIP),
                }))
            }
            other => Err(KernelError::invalid(format!("mint has no method {other}"))),
        }
    }
}

/// `genesis_ledger` — balance queries and caller-funded transfers
struct LedgerHandler;

#[async_trait]
impl MethodHandler for LedgerHandler {
    async fn call(
        &self,
        ctx: InvokeCtx<'_>,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match method {
            "balance" => {
                let principal = args
                    .get("principal")
                    .and_then(|v| v.as_str())
                    .unwrap_or(ctx.caller);
                let resource = require_str(&args, "resource")?;
                Ok(serde_json::json!(ctx.balance(principal, resource)))
            }
            "balances" => {
                let principal = args
                    .get("principal")
                    .and_then(|v| v.as_str())
                    .unwrap_or(ctx.caller);
                Ok(serde_json::to_value(
                    ctx.kernel().ledger().balances(principal),
                )?)
            }
            "transfer" => {
                let to = require_str(&args, "to")?;
                let resource = require_str(&args, "resource")?;
                let amount = require_f64(&args, "amount")?;
                // Funds move from the immediate caller, never from the
                // billing principal: delegation of payment is explicit.
                ctx.kernel().transfer(ctx.caller, to, resource, amount).await?;
                Ok(serde_json::json!({ "ok": true }))
            }
            other => Err(KernelError::invalid(format!("ledger has no method {other}"))),
        }
    }
}

/// `genesis_store` — id listing and contract-gated fetch
struct StoreHandler;

#[async_trait]
impl MethodHandler for StoreHandler {
    async fn call(
        &self,
        ctx: InvokeCtx<'_>,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match method {
            "list" => Ok(serde_json::to_value(ctx.kernel().store().ids())?),
            "get" => {
                let id = require_str(&args, "id")?;
                // Pass-through identity: the fetch is checked against the
                // invoker, not against this interface.
                let artifact = ctx
                    .kernel()
                    .read_with_depth(ctx.caller, id, ctx.billing_principal, ctx.depth + 1)
                    .await?;
                Ok(serde_json::to_value(artifact)?)
            }
            other => Err(KernelError::invalid(format!("store has no method {other}"))),
        }
    }
}

/// `genesis_event_log` — replay access for dashboards and agents
struct EventLogHandler;

#[async_trait]
impl MethodHandler for EventLogHandler {
    async fn call(
        &self,
        ctx: InvokeCtx<'_>,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match method {
            "tail" => {
                let since = args.get("since").and_then(|v| v.as_u64()).unwrap_or(0);
                let events = ctx.kernel().events().replay_from(since);
                Ok(serde_json::to_value(events)?)
            }
            "sequence" => Ok(serde_json::json!(ctx.kernel().events().next_sequence())),
            other => Err(KernelError::invalid(format!(
                "event log has no method {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    #[tokio::test]
    async fn test_bootstrap_creates_genesis_set() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        for id in [
            GENESIS_CREATOR,
            FREEWARE_CONTRACT_ID,
            PRIVATE_CONTRACT_ID,
            CREATOR_ONLY_CONTRACT_ID,
            SELF_OWNED_CONTRACT_ID,
            LEDGER_INTERFACE_ID,
            STORE_INTERFACE_ID,
            EVENT_LOG_INTERFACE_ID,
            MINT_ID,
        ] {
            let artifact = kernel.store().get(id).unwrap_or_else(|| panic!("{id} missing"));
            assert_eq!(artifact.created_by, GENESIS_CREATOR);
        }
        assert!(!kernel.store().genesis_open());
    }

    #[tokio::test]
    async fn test_genesis_namespace_sealed_after_bootstrap() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        let err = kernel
            .write("mallory", "genesis_fake", ArtifactSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::ReservedPrefix { .. }));
    }

    #[tokio::test]
    async fn test_mint_credits_the_caller() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        kernel
            .write("alice", "alice", ArtifactSpec::agent())
            .await
            .unwrap();

        let result = kernel
            .invoke("alice", MINT_ID, "mint", serde_json::json!({ "amount": 25.0 }))
            .await
            .unwrap();
        assert_eq!(result["minted"], 25.0);
        assert_eq!(kernel.ledger().balance("alice", RESOURCE_SCRIP), 25.0);
    }

    #[tokio::test]
    async fn test_mint_rejects_out_of_range_amounts() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        for amount in [0.0, -3.0, MAX_MINT_PER_CALL + 1.0] {
            let err = kernel
                .invoke(
                    "alice",
                    MINT_ID,
                    "mint",
                    serde_json::json!({ "amount": amount }),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, KernelError::InvalidArgument { .. }));
        }
    }

    #[tokio::test]
    async fn test_ledger_interface_transfer_moves_caller_funds() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        kernel.write("alice", "alice", ArtifactSpec::agent()).await.unwrap();
        kernel.write("bob", "bob", ArtifactSpec::agent()).await.unwrap();
        kernel.ledger().credit("alice", RESOURCE_SCRIP, 10.0).unwrap();

        kernel
            .invoke(
                "alice",
                LEDGER_INTERFACE_ID,
                "transfer",
                serde_json::json!({ "to": "bob", "resource": RESOURCE_SCRIP, "amount": 4.0 }),
            )
            .await
            .unwrap();
        assert_eq!(kernel.ledger().balance("alice", RESOURCE_SCRIP), 6.0);
        assert_eq!(kernel.ledger().balance("bob", RESOURCE_SCRIP), 4.0);
    }

    #[tokio::test]
    async fn test_store_interface_get_respects_contracts() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        kernel
            .write("alice", "secret", ArtifactSpec::data(serde_json::json!(1)))
            .await
            .unwrap();

        // Default policy is creator-only, so bob's fetch through the store
        // interface is denied just like a direct read.
        let err = kernel
            .invoke(
                "bob",
                STORE_INTERFACE_ID,
                "get",
                serde_json::json!({ "id": "secret" }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_event_log_interface_tail() {
        let kernel = Kernel::new(KernelConfig::default()).unwrap();
        let sequence = kernel
            .invoke("alice", EVENT_LOG_INTERFACE_ID, "sequence", serde_json::json!({}))
            .await
            .unwrap();
        let since = sequence.as_u64().unwrap();

        kernel
            .write("alice", "note", ArtifactSpec::data(serde_json::json!("hi")))
            .await
            .unwrap();
        let tail = kernel
            .invoke(
                "alice",
                EVENT_LOG_INTERFACE_ID,
                "tail",
                serde_json::json!({ "since": since }),
            )
            .await
            .unwrap();
        let events = tail.as_array().unwrap();
        assert!(events
            .iter()
            .any(|e| e["type"] == "artifact_created" && e["data"]["id"] == "note"));
    }
}
