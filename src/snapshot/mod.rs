//! Group snapshots.
//!
//! A snapshot records the plain-data part of a group so it can be stored and
//! imported into another machine. Conditions, `skip_if` predicates, enable
//! predicates, handlers, middleware, and dynamic settings are code and are not
//! captured. Conditions are supplied again on import through a
//! [`ConditionLookup`].
//!
//! Snapshots encode to JSON (camelCase keys) or to a compact binary form.

use crate::core::{Condition, Setting};
use crate::group::{
    AutoTransitionConfig, EvaluationConfig, EvaluationStrategy, GroupConfig, GroupEntry,
    RetryConfig, TransitionGroup,
};
use crate::machine::machine::Core;
use crate::machine::StateMachine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use tracing::{info, warn};

pub mod error;

pub use error::{SnapshotError, SnapshotIssue};

fn fixed<T: Clone>(setting: &Option<Setting<T>>) -> Option<T> {
    setting.as_ref().and_then(|s| s.as_static().cloned())
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySnapshot {
    pub max_attempts: Option<u32>,
    pub delay: Option<u64>,
}

impl RetrySnapshot {
    fn capture(retry: &RetryConfig) -> Self {
        Self {
            max_attempts: fixed(&retry.max_attempts),
            delay: fixed(&retry.delay),
        }
    }

    fn restore(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.map(Setting::Static),
            delay: self.delay.map(Setting::Static),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSnapshot {
    #[serde(default)]
    pub watch_properties: Vec<String>,
    pub evaluation_strategy: Option<EvaluationStrategy>,
}

impl EvaluationSnapshot {
    fn capture(evaluation: &EvaluationConfig) -> Self {
        Self {
            watch_properties: evaluation.watch_properties.clone(),
            evaluation_strategy: evaluation.strategy,
        }
    }

    fn restore(&self) -> EvaluationConfig {
        EvaluationConfig {
            watch_properties: self.watch_properties.clone(),
            skip_if: None,
            strategy: self.evaluation_strategy,
        }
    }
}

/// Static settings of a group or of one of its transitions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    pub priority: Option<i32>,
    pub debounce: Option<u64>,
    pub retry_config: Option<RetrySnapshot>,
    pub evaluation_config: Option<EvaluationSnapshot>,
}

impl ConfigSnapshot {
    fn capture(
        priority: &Option<Setting<i32>>,
        debounce: &Option<Setting<u64>>,
        retry: &Option<RetryConfig>,
        evaluation: &Option<EvaluationConfig>,
    ) -> Self {
        Self {
            priority: fixed(priority),
            debounce: fixed(debounce),
            retry_config: retry.as_ref().map(RetrySnapshot::capture),
            evaluation_config: evaluation.as_ref().map(EvaluationSnapshot::capture),
        }
    }

    fn restore_group(&self) -> GroupConfig {
        GroupConfig {
            priority: self.priority.map(Setting::Static),
            debounce: self.debounce.map(Setting::Static),
            retry: self.retry_config.as_ref().map(RetrySnapshot::restore),
            evaluation: self.evaluation_config.as_ref().map(EvaluationSnapshot::restore),
        }
    }

    fn restore_transition(&self, condition: Condition, tags: Vec<String>) -> AutoTransitionConfig {
        AutoTransitionConfig {
            condition,
            priority: self.priority.map(Setting::Static),
            debounce: self.debounce.map(Setting::Static),
            retry: self.retry_config.as_ref().map(RetrySnapshot::restore),
            evaluation: self.evaluation_config.as_ref().map(EvaluationSnapshot::restore),
            tags,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSnapshot {
    pub from: String,
    pub to: String,
    pub config: ConfigSnapshot,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Plain-data description of one group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub name: String,
    pub namespace: Option<String>,
    pub enabled: bool,
    pub prevent_manual_transitions: bool,
    pub config: ConfigSnapshot,
    #[serde(default)]
    pub transitions: Vec<TransitionSnapshot>,
    pub parent_group: Option<String>,
    #[serde(default)]
    pub child_groups: Vec<String>,
}

impl GroupSnapshot {
    pub(crate) fn capture(entry: &GroupEntry) -> Self {
        let transitions = entry
            .transition_pairs()
            .into_iter()
            .filter_map(|(from, to)| {
                let config = entry.transition(&from, &to)?;
                Some(TransitionSnapshot {
                    config: ConfigSnapshot::capture(
                        &config.priority,
                        &config.debounce,
                        &config.retry,
                        &config.evaluation,
                    ),
                    tags: config.tags.clone(),
                    from,
                    to,
                })
            })
            .collect();

        Self {
            name: entry.name().to_string(),
            namespace: entry.namespace().map(str::to_string),
            enabled: entry.explicitly_enabled(),
            prevent_manual_transitions: entry.prevents_manual(),
            config: ConfigSnapshot::capture(
                &entry.config.priority,
                &entry.config.debounce,
                &entry.config.retry,
                &entry.config.evaluation,
            ),
            transitions,
            parent_group: entry.parent().map(str::to_string),
            child_groups: entry.children().to_vec(),
        }
    }

    pub fn full_name(&self) -> String {
        crate::group::full_name(self.namespace.as_deref(), &self.name)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(json).map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        bincode::serialize(self).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        bincode::deserialize(bytes).map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))
    }

    /// Check the snapshot against a machine, collecting every issue.
    fn validate(&self, core: &Core) -> Validation<(), NonEmptyVec<SnapshotIssue>> {
        let mut checks = vec![require(
            !core.groups.contains(&self.full_name()),
            SnapshotIssue::DuplicateGroup(self.full_name()),
        )];
        if let Some(parent) = &self.parent_group {
            checks.push(require(
                core.groups.contains(parent),
                SnapshotIssue::MissingParent(parent.clone()),
            ));
        }
        let states: BTreeSet<&str> = self
            .transitions
            .iter()
            .flat_map(|t| [t.from.as_str(), t.to.as_str()])
            .collect();
        for state in states {
            checks.push(require(
                core.states.contains_key(state),
                SnapshotIssue::UnknownState(state.to_string()),
            ));
        }
        Validation::all_vec(checks).map(|_| ())
    }
}

fn require(ok: bool, issue: SnapshotIssue) -> Validation<(), NonEmptyVec<SnapshotIssue>> {
    if ok {
        Validation::success(())
    } else {
        Validation::fail(issue)
    }
}

/// Source of conditions for transitions being imported.
pub trait ConditionLookup {
    /// The condition for `from -> to` in the group with full name `group`.
    fn condition(&self, group: &str, from: &str, to: &str) -> Option<Condition>;
}

/// Conditions keyed by group full name, then by `(from, to)`.
#[derive(Clone, Debug, Default)]
pub struct ConditionMap {
    conditions: HashMap<String, HashMap<(String, String), Condition>>,
}

impl ConditionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: &str, from: &str, to: &str, condition: Condition) {
        self.conditions
            .entry(group.to_string())
            .or_default()
            .insert((from.to_string(), to.to_string()), condition);
    }

    pub fn with(mut self, group: &str, from: &str, to: &str, condition: Condition) -> Self {
        self.insert(group, from, to, condition);
        self
    }
}

impl ConditionLookup for ConditionMap {
    fn condition(&self, group: &str, from: &str, to: &str) -> Option<Condition> {
        self.conditions
            .get(group)?
            .get(&(from.to_string(), to.to_string()))
            .cloned()
    }
}

impl StateMachine {
    /// Recreate a group from a snapshot.
    ///
    /// The snapshot is validated first and every problem is reported at once.
    /// Transitions the lookup has no condition for become unconditional.
    /// Listed children that exist and have no parent are re-attached.
    pub fn import_group(
        &self,
        snapshot: &GroupSnapshot,
        conditions: &dyn ConditionLookup,
    ) -> Result<TransitionGroup, SnapshotError> {
        let full_name = snapshot.full_name();
        let transitions: Vec<(&TransitionSnapshot, AutoTransitionConfig)> = snapshot
            .transitions
            .iter()
            .map(|t| {
                let condition = conditions
                    .condition(&full_name, &t.from, &t.to)
                    .unwrap_or_else(|| {
                        warn!(
                            group = %full_name,
                            from = %t.from,
                            to = %t.to,
                            "no condition supplied, imported transition is unconditional"
                        );
                        Condition::always()
                    });
                (t, t.config.restore_transition(condition, t.tags.clone()))
            })
            .collect();

        self.write(|core| {
            if let Validation::Failure(issues) = snapshot.validate(core) {
                return Err(SnapshotError::ValidationFailed {
                    issues: issues.iter().cloned().collect(),
                });
            }

            core.groups.create(
                &snapshot.name,
                snapshot.namespace.as_deref(),
                snapshot.parent_group.as_deref(),
            )?;
            for (t, config) in transitions {
                core.state_mut(&t.from)?.add_transition(t.to.as_str());
                core.groups
                    .entry_mut(&full_name)?
                    .add_transition(&t.from, &t.to, config);
            }
            let entry = core.groups.entry_mut(&full_name)?;
            entry.config = snapshot.config.restore_group();
            entry.restore_flags(snapshot.enabled, snapshot.prevent_manual_transitions);

            for child in &snapshot.child_groups {
                let orphan = core.groups.get(child).is_some_and(|c| c.parent().is_none());
                if !orphan {
                    continue;
                }
                if let Err(error) = core.groups.set_parent(child, Some(&full_name)) {
                    warn!(group = %full_name, child = %child, error = %error, "child not re-attached");
                }
            }
            Ok::<(), SnapshotError>(())
        })?;

        info!(group = %full_name, transitions = snapshot.transitions.len(), "group imported");
        Ok(TransitionGroup::new(
            self.clone(),
            &snapshot.name,
            snapshot.namespace.as_deref(),
            full_name,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn machine() -> StateMachine {
        let machine = StateMachine::new();
        for state in ["s1", "s2", "s3"] {
            machine.add_state(state).unwrap();
        }
        machine
    }

    fn populated(machine: &StateMachine) -> TransitionGroup {
        let parent = machine.create_group("parent").unwrap();
        parent
            .with_config(GroupConfig::new().priority(1).debounce(100))
            .unwrap();
        let group = parent.create_child_group("child").unwrap();
        group
            .with_config(
                GroupConfig::new()
                    .priority(2)
                    .retry(RetryConfig::new().max_attempts(3)),
            )
            .unwrap();
        group
            .add_transition(
                "s1",
                "s2",
                AutoTransitionConfig::new(Condition::new(|_, ctx| ctx["go"] == json!(true)))
                    .tag("fast")
                    .evaluation(
                        EvaluationConfig::new()
                            .watch("go")
                            .strategy(EvaluationStrategy::NextTick),
                    ),
            )
            .unwrap();
        group
            .add_transition("s2", "s3", AutoTransitionConfig::always().priority(9))
            .unwrap();
        group
    }

    #[test]
    fn json_uses_the_camel_case_wire_shape() {
        let machine = machine();
        let snapshot = populated(&machine).snapshot().unwrap();

        let value: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();

        assert_eq!(value["name"], "child");
        assert_eq!(value["parentGroup"], "parent");
        assert_eq!(value["preventManualTransitions"], false);
        assert_eq!(value["config"]["retryConfig"]["maxAttempts"], 3);
        assert_eq!(value["transitions"][0]["tags"], json!(["fast"]));
        assert!(value["transitions"][0].get("condition").is_none());
    }

    #[test]
    fn minimal_json_is_accepted() {
        let snapshot = GroupSnapshot::from_json(
            r#"{ "name": "g", "enabled": true, "preventManualTransitions": false, "config": {} }"#,
        )
        .unwrap();

        assert_eq!(snapshot.namespace, None);
        assert!(snapshot.transitions.is_empty());
        assert!(snapshot.child_groups.is_empty());
    }

    #[test]
    fn malformed_json_is_a_deserialization_error() {
        assert!(matches!(
            GroupSnapshot::from_json("{"),
            Err(SnapshotError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn binary_encoding_round_trips() {
        let machine = machine();
        let snapshot = populated(&machine).snapshot().unwrap();

        let bytes = snapshot.to_bytes().unwrap();

        assert_eq!(GroupSnapshot::from_bytes(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn import_reproduces_transitions_and_effective_config() {
        let source = machine();
        let original = populated(&source);
        let snapshot = original.snapshot().unwrap();

        let target = machine();
        target.create_group("parent").unwrap();
        target
            .group("parent")
            .unwrap()
            .with_config(GroupConfig::new().priority(1).debounce(100))
            .unwrap();
        let conditions = ConditionMap::new().with(
            "child",
            "s1",
            "s2",
            Condition::new(|_, ctx| ctx["go"] == json!(true)),
        );
        let imported = target.import_group(&snapshot, &conditions).unwrap();

        assert_eq!(imported.transitions(), original.transitions());
        for (from, to) in original.transitions() {
            assert!(imported.has_transition(&from, &to));
            assert_eq!(
                imported.effective_config(&from, &to, None),
                original.effective_config(&from, &to, None)
            );
        }
        assert!(target.can("s1", "s2"));
        assert_eq!(imported.parent().map(|p| p.full_name().to_string()), Some("parent".to_string()));
    }

    #[test]
    fn every_validation_issue_is_reported() {
        let source = machine();
        let snapshot = populated(&source).snapshot().unwrap();

        let target = StateMachine::new();
        target.add_state("s1").unwrap();
        let err = target.import_group(&snapshot, &ConditionMap::new()).unwrap_err();

        match err {
            SnapshotError::ValidationFailed { issues } => {
                assert!(issues.contains(&SnapshotIssue::MissingParent("parent".into())));
                assert!(issues.contains(&SnapshotIssue::UnknownState("s2".into())));
                assert!(issues.contains(&SnapshotIssue::UnknownState("s3".into())));
                assert_eq!(issues.len(), 3);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(target.groups().is_empty());
    }

    #[tokio::test]
    async fn missing_condition_imports_as_unconditional() {
        let target = machine();
        let snapshot = GroupSnapshot {
            name: "g".into(),
            namespace: None,
            enabled: true,
            prevent_manual_transitions: false,
            config: ConfigSnapshot::default(),
            transitions: vec![TransitionSnapshot {
                from: "s1".into(),
                to: "s2".into(),
                config: ConfigSnapshot::default(),
                tags: Vec::new(),
            }],
            parent_group: None,
            child_groups: Vec::new(),
        };
        target.import_group(&snapshot, &ConditionMap::new()).unwrap();
        target.set_current_state("s1").unwrap();

        target.evaluate_auto_transitions().await;

        assert_eq!(target.current_state().as_deref(), Some("s2"));
    }

    #[test]
    fn disabled_flags_are_restored_without_events() {
        let source = machine();
        let group = source.create_group("g").unwrap();
        group
            .disable(crate::group::DisableOptions::new().prevent_manual_transitions())
            .unwrap();
        let snapshot = group.snapshot().unwrap();

        let target = machine();
        let imported = target.import_group(&snapshot, &ConditionMap::new()).unwrap();

        assert!(!imported.is_enabled(None));
        assert!(!imported.allows_manual_transitions());
    }
}
