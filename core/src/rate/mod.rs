//! Rate tracker — rolling-window capacity per principal and resource
//!
//! Renewable resources are enforced here with a token-bucket discipline:
//! each (principal, resource) pair keeps a deque of timestamped usages, and
//! records older than the configured window stop counting. Pruning is lazy,
//! on every access. Check-and-deduct is a single critical section, so two
//! concurrent consumers can never double-spend the same capacity.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RateLimitSettings;
use crate::error::{KernelError, Result};
use crate::event::{EventKind, EventLog};

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub capacity: f64,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
struct UsageRecord {
    at: Instant,
    amount: f64,
}

pub struct RateTracker {
    limits: RwLock<HashMap<String, RateLimit>>,
    usage: Mutex<HashMap<(String, String), VecDeque<UsageRecord>>>,
    events: Arc<EventLog>,
}

impl RateTracker {
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
            usage: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Tracker pre-loaded with every enabled limit from configuration
    pub fn from_settings(
        settings: &HashMap<String, RateLimitSettings>,
        events: Arc<EventLog>,
    ) -> Self {
        let tracker = Self::new(events);
        for (resource, limit) in settings {
            if limit.enabled {
                tracker.configure_limit(resource, limit.capacity, limit.window());
            }
        }
        tracker
    }

    pub fn configure_limit(&self, resource: &str, capacity: f64, window: Duration) {
        self.limits
            .write()
            .insert(resource.to_string(), RateLimit { capacity, window });
    }

    pub fn limit(&self, resource: &str) -> Option<RateLimit> {
        self.limits.read().get(resource).copied()
    }

    /// Whether `amount` would fit right now. Advisory only: pair with
    /// `consume` for the atomic check-and-deduct.
    pub fn has_capacity(&self, principal: &str, resource: &str, amount: f64) -> bool {
        let Some(limit) = self.limit(resource) else {
            return true;
        };
        let mut usage = self.usage.lock();
        let used = pruned_total(&mut usage, principal, resource, limit.window);
        limit.capacity - used >= amount
    }

    /// Capacity left in the current window; unlimited resources report
    /// infinite headroom
    pub fn remaining(&self, principal: &str, resource: &str) -> f64 {
        let Some(limit) = self.limit(resource) else {
            return f64::INFINITY;
        };
        let mut usage = self.usage.lock();
        let used = pruned_total(&mut usage, principal, resource, limit.window);
        (limit.capacity - used).max(0.0)
    }

    /// Atomic check-and-deduct. Never succeeds by going negative.
    pub fn consume(&self, principal: &str, resource: &str, amount: f64) -> Result<()> {
        validate_amount(amount)?;
        let Some(limit) = self.limit(resource) else {
            // Unconfigured resources are unlimited but still show up in the
            // event stream for observers.
            self.emit_consumed(principal, resource, amount);
            return Ok(());
        };
        if amount > limit.capacity {
            return Err(KernelError::invalid(format!(
                "{amount} exceeds total {resource} capacity {}",
                limit.capacity
            )));
        }

        {
            let mut usage = self.usage.lock();
            let used = pruned_total(&mut usage, principal, resource, limit.window);
            if limit.capacity - used < amount {
                let retry_after = next_free(&usage, principal, resource, limit, amount)
                    .unwrap_or(limit.window);
                return Err(KernelError::RateLimited {
                    resource: resource.to_string(),
                    retry_after,
                });
            }
            usage
                .entry((principal.to_string(), resource.to_string()))
                .or_default()
                .push_back(UsageRecord {
                    at: Instant::now(),
                    amount,
                });
        }

        self.emit_consumed(principal, resource, amount);
        Ok(())
    }

    /// How long until `amount` fits. `Some(ZERO)` means now, `None` means
    /// never (the request exceeds total capacity).
    pub fn time_until_capacity(
        &self,
        principal: &str,
        resource: &str,
        amount: f64,
    ) -> Option<Duration> {
        let Some(limit) = self.limit(resource) else {
            return Some(Duration::ZERO);
        };
        if amount > limit.capacity {
            return None;
        }
        let mut usage = self.usage.lock();
        let used = pruned_total(&mut usage, principal, resource, limit.window);
        if limit.capacity - used >= amount {
            return Some(Duration::ZERO);
        }
        next_free(&usage, principal, resource, limit, amount)
    }

    /// Suspend until the consume succeeds or the deadline passes.
    ///
    /// On success the capacity is already deducted; the failure path leaves
    /// the tracker untouched.
    pub async fn wait_for_capacity(
        &self,
        principal: &str,
        resource: &str,
        amount: f64,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            match self.consume(principal, resource, amount) {
                Ok(()) => return Ok(()),
                Err(KernelError::RateLimited {
                    retry_after,
                    resource: limited,
                }) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(KernelError::RateLimited {
                            resource: limited,
                            retry_after,
                        });
                    }
                    let wait = retry_after.min(deadline - now);
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                    if Instant::now() >= deadline {
                        // One attempt exactly at the boundary, then give up.
                        return self.consume(principal, resource, amount);
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Serializable view of every record still inside its window
    pub fn snapshot(&self) -> Vec<RateUsageSnapshot> {
        let limits = self.limits.read().clone();
        let mut usage = self.usage.lock();
        let now = Instant::now();
        let mut records = Vec::new();
        for ((principal, resource), deque) in usage.iter_mut() {
            if let Some(limit) = limits.get(resource) {
                prune(deque, limit.window, now);
            }
            for record in deque.iter() {
                records.push(RateUsageSnapshot {
                    principal: principal.clone(),
                    resource: resource.clone(),
                    age_ms: now.duration_since(record.at).as_millis() as u64,
                    amount: record.amount,
                });
            }
        }
        records.sort_by(|a, b| {
            (a.principal.as_str(), a.resource.as_str())
                .cmp(&(b.principal.as_str(), b.resource.as_str()))
                .then(b.age_ms.cmp(&a.age_ms))
        });
        records
    }

    /// Rebuild in-window usage relative to the current instant
    pub fn restore(&self, records: Vec<RateUsageSnapshot>) {
        let now = Instant::now();
        let mut usage = self.usage.lock();
        usage.clear();
        for record in records {
            let at = now
                .checked_sub(Duration::from_millis(record.age_ms))
                .unwrap_or(now);
            usage
                .entry((record.principal, record.resource))
                .or_default()
                .push_back(UsageRecord {
                    at,
                    amount: record.amount,
                });
        }
        for deque in usage.values_mut() {
            deque
                .make_contiguous()
                .sort_by_key(|r| r.at);
        }
    }

    fn emit_consumed(&self, principal: &str, resource: &str, amount: f64) {
        self.events.append(
            EventKind::ResourceConsumed,
            principal,
            serde_json::json!({ "resource": resource, "amount": amount }),
        );
    }
}

/// One usage record, aged for serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateUsageSnapshot {
    pub principal: String,
    pub resource: String,
    pub age_ms: u64,
    pub amount: f64,
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(KernelError::invalid(format!(
            "consume amounts must be finite and positive, got {amount}"
        )));
    }
    Ok(())
}

fn prune(deque: &mut VecDeque<UsageRecord>, window: Duration, now: Instant) {
    while let Some(front) = deque.front() {
        if now.duration_since(front.at) >= window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

fn pruned_total(
    usage: &mut HashMap<(String, String), VecDeque<UsageRecord>>,
    principal: &str,
    resource: &str,
    window: Duration,
) -> f64 {
    let key = (principal.to_string(), resource.to_string());
    match usage.get_mut(&key) {
        Some(deque) => {
            prune(deque, window, Instant::now());
            deque.iter().map(|r| r.amount).sum()
        }
        None => 0.0,
    }
}

/// Earliest instant at which enough records have expired for `amount` to
/// fit, as a duration from now. Assumes the deque is already pruned.
fn next_free(
    usage: &HashMap<(String, String), VecDeque<UsageRecord>>,
    principal: &str,
    resource: &str,
    limit: RateLimit,
    amount: f64,
) -> Option<Duration> {
    let key = (principal.to_string(), resource.to_string());
    let deque = usage.get(&key)?;
    let used: f64 = deque.iter().map(|r| r.amount).sum();
    let mut must_free = amount - (limit.capacity - used);
    let now = Instant::now();
    for record in deque.iter() {
        must_free -= record.amount;
        if must_free <= 0.0 {
            let expires = record.at + limit.window;
            return Some(expires.saturating_duration_since(now));
        }
    }
    None
}
