//! Shared deterministic types for the agent core.
//!
//! These types define stable contracts between the extractor, validator,
//! approval gate and control loop. They carry no I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Argument mapping passed to a capability.
pub type Arguments = Map<String, Value>;

/// A parsed request to execute a registered capability.
///
/// Only the extractor (or crate-internal code that has already checked the
/// registry) constructs invocations, so `name` is always a registered capability.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    name: String,
    arguments: Arguments,
}

impl Invocation {
    pub(crate) fn new(name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// String argument lookup, `None` when absent or not a string.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Whether risky capabilities need a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    Manual,
    Auto,
}

impl ApprovalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalMode::Manual => "manual",
            ApprovalMode::Auto => "auto",
        }
    }
}

/// Session-wide agent configuration.
///
/// Built once at startup and passed by reference. Only the approval gate
/// mutates it (when the user answers `auto`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    pub approval_mode: ApprovalMode,
    pub override_forbidden: bool,
}

impl AgentConfig {
    pub fn new(auto: bool, override_forbidden: bool) -> Self {
        Self {
            approval_mode: if auto {
                ApprovalMode::Auto
            } else {
                ApprovalMode::Manual
            },
            override_forbidden,
        }
    }

    pub fn is_auto(&self) -> bool {
        self.approval_mode == ApprovalMode::Auto
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(false, false)
    }
}

/// Outcome of the approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    /// Empty when approved; otherwise text fed back to the model.
    pub feedback: String,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            feedback: String::new(),
        }
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback: feedback.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_config_starts_in_requested_mode() {
        assert!(AgentConfig::new(true, false).is_auto());
        assert!(!AgentConfig::default().is_auto());
        assert_eq!(AgentConfig::default().approval_mode.as_str(), "manual");
    }

    #[test]
    fn approval_decisions_carry_feedback_only_on_reject() {
        assert!(ApprovalDecision::approve().feedback.is_empty());
        let rejected = ApprovalDecision::reject("nope");
        assert!(!rejected.approved);
        assert_eq!(rejected.feedback, "nope");
    }
}
