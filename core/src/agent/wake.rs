//! Wake conditions
//!
//! A sleeping worker polls its condition each cycle; the first match wakes
//! it. Time deadlines are resolved against the monotonic clock when the
//! sleep begins, event matches scan the log from the sequence the sleep
//! started at, and resource thresholds read the rate tracker.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::event::{Event, EventKind};

/// What ends a sleep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeCondition {
    /// Monotonic deadline, expressed as a duration from sleep start
    After { seconds: f64 },
    /// An event matching the predicate lands in the log
    Event(EventMatch),
    /// Window capacity for a resource recovers to at least `amount`
    ResourceAtLeast { resource: String, amount: f64 },
}

impl WakeCondition {
    pub fn after(duration: Duration) -> Self {
        Self::After {
            seconds: duration.as_secs_f64(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::After { seconds } => Some(Duration::from_secs_f64(*seconds)),
            _ => None,
        }
    }
}

/// Predicate over events appended since the sleep began
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMatch {
    /// Required event kind; `None` matches any
    #[serde(default)]
    pub kind: Option<EventKind>,
    /// Required attributed principal; `None` matches any
    #[serde(default)]
    pub principal: Option<String>,
}

impl EventMatch {
    pub fn kind(kind: EventKind) -> Self {
        Self {
            kind: Some(kind),
            principal: None,
        }
    }

    pub fn from_principal(principal: impl Into<String>) -> Self {
        Self {
            kind: None,
            principal: Some(principal.into()),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(principal) = &self.principal {
            if &event.principal != principal {
                return false;
            }
        }
        true
    }
}
