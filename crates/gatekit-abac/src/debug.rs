//! Per-request debug entries.
//!
//! When a caller asks for a debug trace, the entrance records pipeline
//! steps, intermediate values, and per-policy evaluation status into a
//! [`DebugEntry`]; the whole entry serializes into the response for
//! operational inspection. Without a caller-supplied entry the recording
//! helpers are no-ops.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::types::AuthPolicy;

/// Evaluation status of one policy within a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    /// Retrieved but not yet evaluated.
    Unknown,
    /// Passed evaluation.
    Pass,
    /// Evaluated and did not pass.
    NoPass,
}

/// A recorded decision trace.
#[derive(Debug, Default, Serialize)]
pub struct DebugEntry {
    /// Pipeline steps in execution order.
    pub steps: Vec<String>,

    /// Named intermediate values.
    pub values: BTreeMap<String, Value>,

    /// Per-policy evaluation status, keyed by policy pk.
    pub evals: BTreeMap<i64, EvalStatus>,
}

impl DebugEntry {
    /// Creates an empty entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Records a pipeline step.
pub fn add_step(entry: Option<&mut DebugEntry>, step: &str) {
    if let Some(entry) = entry {
        entry.steps.push(step.to_string());
    }
}

/// Records a named value; values that fail to serialize are skipped.
pub fn with_value<T: Serialize>(entry: Option<&mut DebugEntry>, key: &str, value: &T) {
    if let Some(entry) = entry {
        if let Ok(value) = serde_json::to_value(value) {
            entry.values.insert(key.to_string(), value);
        }
    }
}

/// Marks retrieved policies as not yet evaluated.
pub fn with_unknown_eval_policies(entry: Option<&mut DebugEntry>, policies: &[AuthPolicy]) {
    if let Some(entry) = entry {
        for policy in policies {
            entry.evals.insert(policy.pk, EvalStatus::Unknown);
        }
    }
}

/// Marks one policy as passed.
pub fn with_pass_eval_policy(entry: Option<&mut DebugEntry>, policy_pk: i64) {
    if let Some(entry) = entry {
        entry.evals.insert(policy_pk, EvalStatus::Pass);
    }
}

/// Marks the surviving policies as passed.
pub fn with_pass_eval_policies(entry: Option<&mut DebugEntry>, policies: &[AuthPolicy]) {
    if let Some(entry) = entry {
        for policy in policies {
            entry.evals.insert(policy.pk, EvalStatus::Pass);
        }
    }
}

/// Marks the listed policies as evaluated and not passing.
pub fn with_no_pass_eval_policies(entry: Option<&mut DebugEntry>, policies: &[AuthPolicy]) {
    if let Some(entry) = entry {
        for policy in policies {
            entry.evals.insert(policy.pk, EvalStatus::NoPass);
        }
    }
}
