//! Ledger — balances and atomic movements
//!
//! Balances exist implicitly at zero and are never negative at any stable
//! state. All mutation happens under one mutex; `transfer` is a single
//! debit-then-credit critical section, so a failed transfer leaves both
//! endpoints untouched and emits nothing.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{KernelError, Result};
use crate::event::{EventKind, EventLog};

/// The depletable currency of the substrate
pub const RESOURCE_SCRIP: &str = "scrip";
/// Depletable monetary budget for external-call collaborators
pub const RESOURCE_BUDGET: &str = "budget";

/// How a resource recovers, which decides the event kind its grants carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Never refills: currency, monetary budget
    Depletable,
    /// Rolling-window capacity, tracked by the rate tracker
    Renewable,
    /// Quota that can be reclaimed: disk, slots
    Allocatable,
}

type Balances = HashMap<String, HashMap<String, f64>>;

pub struct Ledger {
    inner: Mutex<Balances>,
    events: Arc<EventLog>,
}

impl Ledger {
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Current balance; unreferenced pairs read as zero
    pub fn balance(&self, principal: &str, resource: &str) -> f64 {
        self.inner
            .lock()
            .get(principal)
            .and_then(|r| r.get(resource))
            .copied()
            .unwrap_or(0.0)
    }

    /// All balances held by one principal
    pub fn balances(&self, principal: &str) -> HashMap<String, f64> {
        self.inner.lock().get(principal).cloned().unwrap_or_default()
    }

    /// Add to a balance. Fails only on invalid amounts or overflow.
    pub fn credit(&self, principal: &str, resource: &str, amount: f64) -> Result<()> {
        validate_amount(amount)?;
        {
            let mut inner = self.inner.lock();
            let slot = entry(&mut inner, principal, resource);
            let next = *slot + amount;
            if !next.is_finite() {
                return Err(KernelError::invalid(format!(
                    "credit of {amount} to {principal}/{resource} overflows"
                )));
            }
            *slot = next;
        }
        self.events.append(
            EventKind::ResourceAllocated,
            principal,
            serde_json::json!({ "resource": resource, "amount": amount }),
        );
        Ok(())
    }

    /// Burn from a balance; fails atomically when it would go negative
    pub fn debit(&self, principal: &str, resource: &str, amount: f64) -> Result<()> {
        validate_amount(amount)?;
        {
            let mut inner = self.inner.lock();
            let slot = entry(&mut inner, principal, resource);
            if *slot < amount {
                return Err(KernelError::InsufficientResource {
                    resource: resource.to_string(),
                    available: *slot,
                    requested: amount,
                });
            }
            *slot -= amount;
        }
        self.events.append(
            EventKind::ResourceSpent,
            principal,
            serde_json::json!({ "resource": resource, "amount": amount }),
        );
        Ok(())
    }

    /// Debit-then-credit as one atomic step
    pub fn transfer(&self, from: &str, to: &str, resource: &str, amount: f64) -> Result<()> {
        validate_amount(amount)?;
        if from == to {
            return Err(KernelError::invalid("transfer endpoints must differ"));
        }
        {
            let mut inner = self.inner.lock();
            let available = *entry(&mut inner, from, resource);
            if available < amount {
                return Err(KernelError::InsufficientResource {
                    resource: resource.to_string(),
                    available,
                    requested: amount,
                });
            }
            *entry(&mut inner, from, resource) -= amount;
            *entry(&mut inner, to, resource) += amount;
        }
        self.events.append(
            EventKind::Transfer,
            from,
            serde_json::json!({ "to": to, "resource": resource, "amount": amount }),
        );
        Ok(())
    }

    /// Checkpoint view for snapshot collaborators
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            balances: self.inner.lock().clone(),
        }
    }

    /// Replace all balances from a checkpoint
    pub fn restore(&self, snapshot: LedgerSnapshot) {
        *self.inner.lock() = snapshot.balances;
    }

    /// Set a balance without events; snapshot restore and replay only
    pub(crate) fn apply(&self, principal: &str, resource: &str, delta: f64) {
        let mut inner = self.inner.lock();
        *entry(&mut inner, principal, resource) += delta;
    }
}

/// Serializable ledger state
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LedgerSnapshot {
    pub balances: Balances,
}

fn entry<'a>(balances: &'a mut Balances, principal: &str, resource: &str) -> &'a mut f64 {
    balances
        .entry(principal.to_string())
        .or_default()
        .entry(resource.to_string())
        .or_insert(0.0)
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(KernelError::invalid(format!(
            "amounts must be finite and non-negative, got {amount}"
        )));
    }
    Ok(())
}
