//! Builder for constructing state machines.

use crate::builder::error::BuildError;
use crate::builder::group::GroupBuilder;
use crate::config::MachineConfig;
use crate::core::Context;
use crate::machine::{Plugin, StateMachine, Telemetry, TracingTelemetry};
use std::sync::Arc;

/// Builder for constructing state machines with a fluent API.
///
/// # Example
///
/// ```rust
/// use statecraft::builder::{GroupBuilder, StateMachineBuilder};
/// use statecraft::group::AutoTransitionConfig;
///
/// let machine = StateMachineBuilder::new()
///     .states(["draft", "review", "published"])
///     .transition("draft", "review")
///     .group(GroupBuilder::new("publishing").transition(
///         "review",
///         "published",
///         AutoTransitionConfig::always(),
///     ))
///     .initial("draft")
///     .build()
///     .unwrap();
///
/// assert_eq!(machine.current_state().as_deref(), Some("draft"));
/// assert!(machine.can("review", "published"));
/// ```
pub struct StateMachineBuilder {
    config: MachineConfig,
    telemetry: Option<Arc<dyn Telemetry>>,
    states: Vec<String>,
    transitions: Vec<(String, String)>,
    groups: Vec<GroupBuilder>,
    initial: Option<String>,
    context: Option<Context>,
    plugins: Vec<Plugin>,
}

impl StateMachineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: MachineConfig::default(),
            telemetry: None,
            states: Vec::new(),
            transitions: Vec::new(),
            groups: Vec::new(),
            initial: None,
            context: None,
            plugins: Vec::new(),
        }
    }

    pub fn config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default `tracing` sink.
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn state(mut self, name: impl Into<String>) -> Self {
        self.states.push(name.into());
        self
    }

    pub fn states<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.states.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare a manual edge.
    pub fn transition(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions.push((from.into(), to.into()));
        self
    }

    pub fn group(mut self, group: GroupBuilder) -> Self {
        self.groups.push(group);
        self
    }

    /// Set the initial state (required).
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial = Some(state.into());
        self
    }

    /// Starting context. No evaluation runs for it.
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Build the state machine.
    /// Returns an error if required fields are missing or a declaration
    /// refers to a state that was never added.
    pub fn build(self) -> Result<StateMachine, BuildError> {
        if self.states.is_empty() {
            return Err(BuildError::NoStates);
        }
        let initial = self.initial.ok_or(BuildError::MissingInitialState)?;
        if !self.states.contains(&initial) {
            return Err(BuildError::UnknownInitialState(initial));
        }

        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(TracingTelemetry));
        let machine = StateMachine::with_parts(self.config, telemetry);

        for state in &self.states {
            machine.add_state(state)?;
        }
        for (from, to) in self.transitions {
            if !machine.has_state(&to) {
                return Err(BuildError::UnknownTarget { from, to });
            }
            machine.add_state_transition(&from, &to)?;
        }
        for group in self.groups {
            group.install(&machine, None)?;
        }
        if let Some(context) = self.context {
            machine.write(|core| core.context = context);
        }
        machine.set_current_state(&initial)?;
        for plugin in self.plugins {
            machine.use_plugin(plugin);
        }

        Ok(machine)
    }
}

impl Default for StateMachineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
