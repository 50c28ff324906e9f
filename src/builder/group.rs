//! Declarative description of a transition group subtree.

use crate::group::{AutoTransitionConfig, DisableOptions, GroupConfig, TransitionGroup};
use crate::machine::{ConfigError, Middleware, StateMachine};

/// Describes a group, its transitions, and its children before the machine
/// exists.
///
/// Children always live in their parent's namespace, so
/// [`namespace`](GroupBuilder::namespace) only matters on a root.
#[derive(Debug, Clone)]
pub struct GroupBuilder {
    name: String,
    namespace: Option<String>,
    config: GroupConfig,
    transitions: Vec<(String, String, AutoTransitionConfig)>,
    middleware: Vec<Middleware>,
    children: Vec<GroupBuilder>,
    enabled: bool,
}

impl GroupBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            config: GroupConfig::default(),
            transitions: Vec::new(),
            middleware: Vec::new(),
            children: Vec::new(),
            enabled: true,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn config(mut self, config: GroupConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transition(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        config: AutoTransitionConfig,
    ) -> Self {
        self.transitions.push((from.into(), to.into(), config));
        self
    }

    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn child(mut self, child: GroupBuilder) -> Self {
        self.children.push(child);
        self
    }

    /// Start the group disabled. Manual transitions stay allowed.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Create this group (and its subtree) on `machine`.
    pub(crate) fn install(
        self,
        machine: &StateMachine,
        parent: Option<&TransitionGroup>,
    ) -> Result<TransitionGroup, ConfigError> {
        let group = match (parent, &self.namespace) {
            (Some(parent), _) => parent.create_child_group(&self.name)?,
            (None, Some(namespace)) => machine.create_namespaced_group(namespace, &self.name)?,
            (None, None) => machine.create_group(&self.name)?,
        };
        group.with_config(self.config)?;
        for (from, to, config) in self.transitions {
            group.add_transition(&from, &to, config)?;
        }
        for middleware in self.middleware {
            group.use_middleware(middleware)?;
        }
        if !self.enabled {
            group.disable(DisableOptions::new())?;
        }
        for child in self.children {
            child.install(machine, Some(&group))?;
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Condition;

    fn machine() -> StateMachine {
        let machine = StateMachine::new();
        for state in ["a", "b", "c"] {
            machine.add_state(state).unwrap();
        }
        machine
    }

    #[test]
    fn installs_subtree_in_parent_namespace() {
        let machine = machine();
        let root = GroupBuilder::new("root")
            .namespace("flow")
            .config(GroupConfig::new().priority(4))
            .transition("a", "b", AutoTransitionConfig::always())
            .child(
                GroupBuilder::new("leaf")
                    .transition("b", "c", AutoTransitionConfig::new(Condition::always())),
            )
            .install(&machine, None)
            .unwrap();

        assert_eq!(root.full_name(), "flow:root");
        let leaf = machine.group("flow:leaf").unwrap();
        assert_eq!(leaf.parent().unwrap(), root);
        assert!(leaf.has_transition("b", "c"));
        assert!(machine.can("a", "b"));
        assert_eq!(leaf.effective_config("b", "c", None).unwrap().priority, Some(4));
    }

    #[test]
    fn disabled_group_still_allows_manual_transitions() {
        let machine = machine();
        let group = GroupBuilder::new("g").disabled().install(&machine, None).unwrap();

        assert!(!group.is_enabled(None));
        assert!(group.allows_manual_transitions());
    }

    #[test]
    fn unknown_state_surfaces_as_config_error() {
        let machine = machine();
        let result = GroupBuilder::new("g")
            .transition("a", "missing", AutoTransitionConfig::always())
            .install(&machine, None);

        assert_eq!(
            result.unwrap_err(),
            ConfigError::UnknownState("missing".into())
        );
    }
}
