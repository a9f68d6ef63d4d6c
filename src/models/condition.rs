//! Status conditions
//!
//! Conditions live in `status.conditions`, ordered and unique by type.
//! Nodes set type/status/reason/message; the parent controller owns
//! `lastTransitionTime` and `observedGeneration`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason stamped on conditions seeded by a `ConditionSet`
pub const REASON_INITIALIZING: &str = "Initializing";

/// Status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A single status condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
            observed_generation: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Whether status, reason and message match; timestamps are ignored
    pub fn same_state(&self, other: &Condition) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Insert or replace a condition, keeping its position if it already exists
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Normalize freshly computed conditions against the previously persisted ones
///
/// - duplicate types collapse to the last written entry, at the first
///   entry's position
/// - `lastTransitionTime` is carried over when status/reason/message are
///   unchanged, otherwise set to `now`
/// - `observedGeneration` is set to `generation`
pub fn normalize_conditions(
    previous: &[Condition],
    current: Vec<Condition>,
    generation: i64,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let mut deduped: Vec<Condition> = Vec::with_capacity(current.len());
    for condition in current {
        set_condition(&mut deduped, condition);
    }

    for condition in &mut deduped {
        condition.last_transition_time = match find_condition(previous, &condition.type_) {
            Some(prev) if prev.same_state(condition) => prev.last_transition_time.or(Some(now)),
            _ => Some(now),
        };
        condition.observed_generation = Some(generation);
    }
    deduped
}

/// Condition types declared by a parent kind
///
/// The happy condition summarizes the dependents: True when every dependent
/// is True, False as soon as one is False, Unknown otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionSet {
    pub happy: String,
    pub dependents: Vec<String>,
}

impl ConditionSet {
    pub fn new(happy: impl Into<String>) -> Self {
        Self {
            happy: happy.into(),
            dependents: Vec::new(),
        }
    }

    pub fn with_dependent(mut self, type_: impl Into<String>) -> Self {
        self.dependents.push(type_.into());
        self
    }

    /// Seed every declared condition type that is missing as Unknown
    pub fn initialize(&self, conditions: &mut Vec<Condition>) {
        for type_ in std::iter::once(&self.happy).chain(self.dependents.iter()) {
            if find_condition(conditions, type_).is_none() {
                conditions.push(Condition::new(
                    type_.clone(),
                    ConditionStatus::Unknown,
                    REASON_INITIALIZING,
                    "",
                ));
            }
        }
    }

    pub fn mark_true(&self, conditions: &mut Vec<Condition>, type_: &str, reason: &str) {
        self.mark(conditions, type_, ConditionStatus::True, reason, "");
    }

    pub fn mark_false(
        &self,
        conditions: &mut Vec<Condition>,
        type_: &str,
        reason: &str,
        message: &str,
    ) {
        self.mark(conditions, type_, ConditionStatus::False, reason, message);
    }

    pub fn mark_unknown(
        &self,
        conditions: &mut Vec<Condition>,
        type_: &str,
        reason: &str,
        message: &str,
    ) {
        self.mark(conditions, type_, ConditionStatus::Unknown, reason, message);
    }

    fn mark(
        &self,
        conditions: &mut Vec<Condition>,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        set_condition(conditions, Condition::new(type_, status, reason, message));
        if type_ != self.happy {
            self.recompute_happy(conditions);
        }
    }

    fn recompute_happy(&self, conditions: &mut Vec<Condition>) {
        if self.dependents.is_empty() {
            return;
        }

        let mut all_true = true;
        for dep in &self.dependents {
            match find_condition(conditions, dep) {
                Some(c) if c.status == ConditionStatus::False => {
                    let happy = Condition::new(
                        self.happy.clone(),
                        ConditionStatus::False,
                        c.reason.clone(),
                        c.message.clone(),
                    );
                    set_condition(conditions, happy);
                    return;
                }
                Some(c) if c.is_true() => {}
                _ => all_true = false,
            }
        }

        let happy = if all_true {
            Condition::new(self.happy.clone(), ConditionStatus::True, "Ready", "")
        } else {
            // Carry the first non-true dependent's reason so the summary says why
            let pending = self
                .dependents
                .iter()
                .filter_map(|d| find_condition(conditions, d))
                .find(|c| !c.is_true());
            Condition::new(
                self.happy.clone(),
                ConditionStatus::Unknown,
                pending.map(|c| c.reason.clone()).unwrap_or_default(),
                pending.map(|c| c.message.clone()).unwrap_or_default(),
            )
        };
        set_condition(conditions, happy);
    }
}
