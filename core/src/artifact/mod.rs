//! Artifacts — the universal addressable object
//!
//! Everything in the substrate is an artifact: agents, contracts, data,
//! rights. The type tag and provenance are fixed at creation; the state map
//! is the only part contracts read for authorization decisions.

mod store;

pub use store::ArtifactStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Advisory type tag for plain payload artifacts
pub const KIND_DATA: &str = "data";
/// Artifacts with a decision loop
pub const KIND_AGENT: &str = "agent";
/// Artifacts used as access policies
pub const KIND_CONTRACT: &str = "contract";
/// Kernel interface artifacts created at bootstrap
pub const KIND_INTERFACE: &str = "interface";

/// State key naming the principal currently authorized to modify an artifact.
/// Seeded to the creator when the writer does not supply one.
pub const STATE_WRITER: &str = "writer";

/// The universal object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Globally unique across all entity kinds
    pub id: String,

    /// Advisory type tag; immutable after creation
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque payload
    #[serde(default)]
    pub content: serde_json::Value,

    /// Principal asserted at creation; informational only, never used for
    /// authorization outside contract-routed checks
    pub created_by: String,

    /// Access policy pointer; may be null, self-referential, or dangling
    #[serde(default)]
    pub access_contract_id: Option<String>,

    /// May hold balances and bear costs
    #[serde(default)]
    pub has_standing: bool,

    /// Has an autonomous decision loop
    #[serde(default)]
    pub can_execute: bool,

    /// Contract-visible key/value state
    #[serde(default)]
    pub state: HashMap<String, serde_json::Value>,

    /// Declared invokable methods
    #[serde(default)]
    pub interface: Option<Vec<MethodSpec>>,

    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Principal currently authorized as the artifact's writer
    pub fn writer(&self) -> Option<&str> {
        self.state.get(STATE_WRITER).and_then(|v| v.as_str())
    }

    pub fn is_contract(&self) -> bool {
        self.kind == KIND_CONTRACT
    }
}

/// One declared invokable method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Caller-supplied fields for a `write`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSpec {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub access_contract_id: Option<String>,
    #[serde(default)]
    pub has_standing: bool,
    #[serde(default)]
    pub can_execute: bool,
    #[serde(default)]
    pub state: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub interface: Option<Vec<MethodSpec>>,
}

impl Default for ArtifactSpec {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            content: serde_json::Value::Null,
            access_contract_id: None,
            has_standing: false,
            can_execute: false,
            state: HashMap::new(),
            interface: None,
        }
    }
}

impl ArtifactSpec {
    /// Plain data artifact
    pub fn data(content: serde_json::Value) -> Self {
        Self {
            content,
            ..Self::default()
        }
    }

    /// Principal artifact: holds balances, bears costs
    pub fn agent() -> Self {
        Self {
            kind: KIND_AGENT.to_string(),
            has_standing: true,
            can_execute: true,
            ..Self::default()
        }
    }

    /// Contract artifact carrying a rule document as content
    pub fn contract(rules: serde_json::Value) -> Self {
        Self {
            kind: KIND_CONTRACT.to_string(),
            content: rules,
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_contract(mut self, contract_id: impl Into<String>) -> Self {
        self.access_contract_id = Some(contract_id.into());
        self
    }

    pub fn with_state(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.state.insert(key.into(), value);
        self
    }

    pub fn with_standing(mut self) -> Self {
        self.has_standing = true;
        self
    }
}

/// Surgical modification applied by `edit`
///
/// Absent fields leave the artifact untouched. `access_contract_id` uses a
/// double Option: outer `None` keeps the pointer, `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactPatch {
    /// Must equal the existing tag when present; a differing tag is rejected
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub access_contract_id: Option<Option<String>>,
    #[serde(default)]
    pub state_set: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub state_remove: Vec<String>,
    #[serde(default)]
    pub interface: Option<Vec<MethodSpec>>,
}

impl ArtifactPatch {
    pub fn content(content: serde_json::Value) -> Self {
        Self {
            content: Some(content),
            ..Self::default()
        }
    }

    pub fn set_state(key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut patch = Self::default();
        patch.state_set.insert(key.into(), value);
        patch
    }

    pub fn set_contract(contract_id: Option<String>) -> Self {
        Self {
            access_contract_id: Some(contract_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.content.is_none()
            && self.access_contract_id.is_none()
            && self.state_set.is_empty()
            && self.state_remove.is_empty()
            && self.interface.is_none()
    }
}

fn default_kind() -> String {
    KIND_DATA.to_string()
}
