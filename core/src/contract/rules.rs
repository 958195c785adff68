//! Declarative rule contracts
//!
//! User-authored contract artifacts carry a rule document in their content.
//! Rules are checked in order; the first match decides. Caller, action and
//! method fields accept glob patterns ('*' matches any run of characters,
//! '?' a single one). A rule may also require a nested invocation to come
//! back truthy before it admits the action.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Action, ContractPolicy, CostPayer, Decision, PermissionRequest, Sandbox};
use crate::error::Result;

/// Recipient value routing a rule's fee to the target artifact's creator
pub const RECIPIENT_CREATOR: &str = "creator";
/// Recipient value routing a rule's fee to the target artifact itself
pub const RECIPIENT_TARGET: &str = "target";

/// Parsed rule document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Verdict when no rule matches
    #[serde(default)]
    pub default_allow: bool,
}

/// One ordered rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Action patterns; empty means any action
    #[serde(default)]
    pub actions: Vec<String>,
    /// Caller pattern
    #[serde(default = "star")]
    pub callers: String,
    /// Method pattern, only consulted for invoke
    #[serde(default)]
    pub methods: Option<String>,
    pub allow: bool,
    /// Scrip owed when an allowing rule fires
    #[serde(default)]
    pub cost: f64,
    /// `"creator"`, `"target"`, or an explicit principal id
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub payer: CostPayer,
    #[serde(default)]
    pub reason: Option<String>,
    /// Nested invocation that must return `true` for the rule to admit
    #[serde(default)]
    pub requires: Option<Requirement>,
}

/// Nested invocation gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub target: String,
    pub method: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Rule {
    fn matches(&self, request: &PermissionRequest) -> bool {
        let action_ok = self.actions.is_empty()
            || self
                .actions
                .iter()
                .any(|p| matches_pattern(request.action.as_str(), p));
        if !action_ok {
            return false;
        }
        if !matches_pattern(&request.caller, &self.callers) {
            return false;
        }
        if request.action == Action::Invoke {
            if let Some(methods) = &self.methods {
                let method = request.method.as_deref().unwrap_or("");
                if !matches_pattern(method, methods) {
                    return false;
                }
            }
        }
        true
    }
}

/// Policy evaluating the rule document of a contract artifact
#[derive(Debug)]
pub struct RulePolicy {
    ruleset: RuleSet,
}

impl RulePolicy {
    /// Parse a contract artifact's content. Content without a `rules` key
    /// yields an empty set, which denies everything.
    pub fn from_content(content: &serde_json::Value) -> Result<Self> {
        let ruleset = match content {
            serde_json::Value::Object(_) => serde_json::from_value(content.clone())
                .map_err(|err| crate::error::KernelError::ContractError {
                    detail: format!("malformed rule document: {err}"),
                })?,
            _ => RuleSet::default(),
        };
        Ok(Self { ruleset })
    }

    pub fn from_ruleset(ruleset: RuleSet) -> Self {
        Self { ruleset }
    }

    fn resolve_recipient(rule: &Rule, request: &PermissionRequest) -> Option<String> {
        match rule.recipient.as_deref() {
            None => None,
            Some(RECIPIENT_CREATOR) => Some(request.created_by.clone()),
            Some(RECIPIENT_TARGET) => Some(request.target_id.clone()),
            Some(explicit) => Some(explicit.to_string()),
        }
    }
}

#[async_trait]
impl ContractPolicy for RulePolicy {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn check(
        &self,
        request: &PermissionRequest,
        sandbox: &Sandbox<'_>,
    ) -> Result<Decision> {
        for rule in &self.ruleset.rules {
            if !rule.matches(request) {
                continue;
            }
            if !rule.allow {
                let reason = rule
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("{} denied by contract rule", request.action));
                return Ok(Decision::deny(reason));
            }
            if let Some(requirement) = &rule.requires {
                let verdict = sandbox
                    .invoke(
                        &requirement.target,
                        &requirement.method,
                        requirement.args.clone(),
                    )
                    .await?;
                if verdict.as_bool() != Some(true) {
                    return Ok(Decision::deny(format!(
                        "requirement {}.{} not satisfied",
                        requirement.target, requirement.method
                    )));
                }
            }
            let mut decision = Decision::allow()
                .with_fee(rule.cost, Self::resolve_recipient(rule, request))
                .with_payer(rule.payer);
            if let Some(reason) = &rule.reason {
                decision = decision.with_reason(reason.clone());
            }
            return Ok(decision);
        }

        if self.ruleset.default_allow {
            Ok(Decision::allow())
        } else {
            Ok(Decision::deny("no contract rule admits this action"))
        }
    }
}

fn star() -> String {
    "*".to_string()
}

/// Glob match: '*' spans any run of characters, '?' exactly one.
/// Matching counts characters, never bytes: ids are arbitrary
/// agent-authored strings and may be multibyte.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();
    let value = value.trim();

    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') && !pattern.contains('?') {
        return value == pattern;
    }

    let chars: Vec<char> = value.chars().collect();
    let parts: Vec<Vec<char>> = pattern.split('*').map(|p| p.chars().collect()).collect();
    if parts.len() == 1 {
        return char_match(&chars, &parts[0]);
    }

    let mut pos = 0;
    if let Some(first) = parts.first() {
        if !first.is_empty() {
            if chars.len() < first.len() || !char_match(&chars[..first.len()], first) {
                return false;
            }
            pos = first.len();
        }
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match find_segment(&chars[pos..], part) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }

    if let Some(last) = parts.last() {
        if !last.is_empty() {
            if chars.len() < pos + last.len() {
                return false;
            }
            return char_match(&chars[chars.len() - last.len()..], last);
        }
    }
    true
}

/// Character-wise comparison honoring '?'
fn char_match(value: &[char], pattern: &[char]) -> bool {
    value.len() == pattern.len()
        && value
            .iter()
            .zip(pattern.iter())
            .all(|(v, p)| *p == '?' || v == p)
}

/// Leftmost offset where `segment` (with '?' wildcards) occurs in `value`
fn find_segment(value: &[char], segment: &[char]) -> Option<usize> {
    if segment.len() > value.len() {
        return None;
    }
    (0..=value.len() - segment.len())
        .find(|&i| char_match(&value[i..i + segment.len()], segment))
}
