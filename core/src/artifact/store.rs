//! Authoritative artifact index
//!
//! The store is the exclusive writer for artifacts. Mutations run under the
//! write half of one lock, so a reader observes either the pre- or the
//! post-state of a write, never a half-applied one. Each successful
//! primitive appends exactly one event; failed primitives append nothing.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{Artifact, ArtifactPatch, ArtifactSpec, STATE_WRITER};
use crate::error::{KernelError, Result};
use crate::event::{EventKind, EventLog};

/// Ids starting with this prefix are writable only while bootstrap is open
pub const GENESIS_PREFIX: &str = "genesis_";

pub struct ArtifactStore {
    inner: RwLock<HashMap<String, Artifact>>,
    genesis_open: AtomicBool,
    events: Arc<EventLog>,
}

impl ArtifactStore {
    pub fn new(events: Arc<EventLog>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            genesis_open: AtomicBool::new(true),
            events,
        }
    }

    /// Free of cost, never blocks behind a writer for long: the write lock
    /// is only held for the duration of a map update.
    pub fn get(&self, id: &str) -> Option<Artifact> {
        self.inner.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Ids of artifacts that can hold balances
    pub fn standing_principals(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .inner
            .read()
            .values()
            .filter(|a| a.has_standing)
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of artifacts that run an autonomous loop
    pub fn executable_principals(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .inner
            .read()
            .values()
            .filter(|a| a.can_execute)
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Full rewrite, or creation when `id` is fresh
    pub fn write(&self, id: &str, spec: ArtifactSpec, asserting_caller: &str) -> Result<Artifact> {
        let (artifact, created) = {
            let mut inner = self.inner.write();
            match inner.get(id) {
                Some(existing) => {
                    if existing.kind != spec.kind {
                        return Err(KernelError::TypeImmutable {
                            id: id.to_string(),
                            existing: existing.kind.clone(),
                            requested: spec.kind,
                        });
                    }
                    let mut updated = existing.clone();
                    updated.content = spec.content;
                    updated.access_contract_id = spec.access_contract_id;
                    updated.has_standing = spec.has_standing;
                    updated.can_execute = spec.can_execute;
                    updated.state = spec.state;
                    updated.interface = spec.interface;
                    seed_writer(&mut updated);
                    inner.insert(id.to_string(), updated.clone());
                    (updated, false)
                }
                None => {
                    self.check_reserved(id)?;
                    let mut artifact = Artifact {
                        id: id.to_string(),
                        kind: spec.kind,
                        content: spec.content,
                        created_by: asserting_caller.to_string(),
                        access_contract_id: spec.access_contract_id,
                        has_standing: spec.has_standing,
                        can_execute: spec.can_execute,
                        state: spec.state,
                        interface: spec.interface,
                        created_at: chrono::Utc::now(),
                    };
                    seed_writer(&mut artifact);
                    inner.insert(id.to_string(), artifact.clone());
                    (artifact, true)
                }
            }
        };

        let kind = if created {
            EventKind::ArtifactCreated
        } else {
            EventKind::ArtifactWritten
        };
        self.events.append(
            kind,
            asserting_caller,
            serde_json::json!({ "id": id, "artifact": &artifact }),
        );
        Ok(artifact)
    }

    /// Creation-only variant used by bootstrap; an existing id is a conflict
    pub fn create(&self, id: &str, spec: ArtifactSpec, asserting_caller: &str) -> Result<Artifact> {
        if self.contains(id) {
            return Err(KernelError::IdConflict { id: id.to_string() });
        }
        self.write(id, spec, asserting_caller)
    }

    /// Surgical modification; object content is merged key-by-key
    pub fn edit(&self, id: &str, patch: ArtifactPatch, asserting_caller: &str) -> Result<Artifact> {
        let artifact = {
            let mut inner = self.inner.write();
            let existing = inner
                .get_mut(id)
                .ok_or_else(|| KernelError::NotFound { id: id.to_string() })?;

            if let Some(requested) = &patch.kind {
                if requested != &existing.kind {
                    return Err(KernelError::TypeImmutable {
                        id: id.to_string(),
                        existing: existing.kind.clone(),
                        requested: requested.clone(),
                    });
                }
            }

            if let Some(content) = patch.content {
                merge_content(&mut existing.content, content);
            }
            if let Some(pointer) = patch.access_contract_id {
                existing.access_contract_id = pointer;
            }
            for (key, value) in patch.state_set {
                existing.state.insert(key, value);
            }
            for key in &patch.state_remove {
                existing.state.remove(key);
            }
            if let Some(interface) = patch.interface {
                existing.interface = Some(interface);
            }
            existing.clone()
        };

        self.events.append(
            EventKind::ArtifactEdited,
            asserting_caller,
            serde_json::json!({ "id": id, "artifact": &artifact }),
        );
        Ok(artifact)
    }

    /// Removes the entry; references held by other artifacts are left to
    /// dangle and resolve through the permission engine's fallback.
    pub fn delete(&self, id: &str, asserting_caller: &str) -> Result<Artifact> {
        let removed = {
            let mut inner = self.inner.write();
            inner
                .remove(id)
                .ok_or_else(|| KernelError::NotFound { id: id.to_string() })?
        };
        self.events.append(
            EventKind::ArtifactDeleted,
            asserting_caller,
            serde_json::json!({ "id": id }),
        );
        Ok(removed)
    }

    /// Seal the `genesis_` namespace; runs once at the end of bootstrap
    pub fn close_genesis(&self) {
        self.genesis_open.store(false, Ordering::SeqCst);
    }

    pub fn genesis_open(&self) -> bool {
        self.genesis_open.load(Ordering::SeqCst)
    }

    fn check_reserved(&self, id: &str) -> Result<()> {
        if id.starts_with(GENESIS_PREFIX) && !self.genesis_open() {
            return Err(KernelError::ReservedPrefix { id: id.to_string() });
        }
        Ok(())
    }

    /// Insert without validation or events; snapshot restore and replay only
    pub(crate) fn apply(&self, artifact: Artifact) {
        self.inner.write().insert(artifact.id.clone(), artifact);
    }

    /// Remove without events; snapshot restore and replay only
    pub(crate) fn remove_silent(&self, id: &str) {
        self.inner.write().remove(id);
    }

    /// Replace the whole index; snapshot restore only
    pub(crate) fn replace_all(&self, artifacts: Vec<Artifact>) {
        let mut inner = self.inner.write();
        inner.clear();
        for artifact in artifacts {
            inner.insert(artifact.id.clone(), artifact);
        }
    }

    pub(crate) fn all(&self) -> Vec<Artifact> {
        let mut artifacts: Vec<_> = self.inner.read().values().cloned().collect();
        artifacts.sort_by(|a, b| a.id.cmp(&b.id));
        artifacts
    }
}

fn seed_writer(artifact: &mut Artifact) {
    if !artifact.state.contains_key(STATE_WRITER) {
        artifact.state.insert(
            STATE_WRITER.to_string(),
            serde_json::Value::String(artifact.created_by.clone()),
        );
    }
}

/// Shallow key merge when both sides are objects, replacement otherwise
fn merge_content(existing: &mut serde_json::Value, patch: serde_json::Value) {
    match (existing, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(delta)) => {
            for (key, value) in delta {
                base.insert(key, value);
            }
        }
        (slot, patch) => *slot = patch,
    }
}
