//! The state machine handle.
//!
//! [`StateMachine`] is a cheap, cloneable handle over shared state. All
//! registries live behind one lock that is only ever held for synchronous
//! bookkeeping; user callbacks run after it has been released.

use super::error::ConfigError;
use super::middleware::Middleware;
use super::observer::Observers;
use super::plugin::Plugin;
use super::telemetry::{Telemetry, TracingTelemetry};
use crate::builder::StateMachineBuilder;
use crate::config::MachineConfig;
use crate::core::{Context, Hook, StateNode, TransitionHistory, TransitionRecord};
use crate::group::registry::PendingEvent;
use crate::group::{GroupRegistry, TransitionGroup};
use crate::scheduler::EvaluationScheduler;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info};

/// Everything a machine owns that is guarded by its lock.
pub(crate) struct Core {
    pub states: HashMap<String, StateNode>,
    pub state_order: Vec<String>,
    pub current: Option<String>,
    pub context: Context,
    pub groups: GroupRegistry,
    pub observers: Observers,
    pub middleware: Vec<Middleware>,
    pub history: TransitionHistory,
}

impl Core {
    fn new(config: &MachineConfig) -> Self {
        Self {
            states: HashMap::new(),
            state_order: Vec::new(),
            current: None,
            context: json!({}),
            groups: GroupRegistry::new(),
            observers: Observers::default(),
            middleware: Vec::new(),
            history: TransitionHistory::with_limit(config.history_limit),
        }
    }

    pub fn state(&self, name: &str) -> Result<&StateNode, ConfigError> {
        self.states
            .get(name)
            .ok_or_else(|| ConfigError::UnknownState(name.to_string()))
    }

    pub fn state_mut(&mut self, name: &str) -> Result<&mut StateNode, ConfigError> {
        self.states
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownState(name.to_string()))
    }

    /// Both states exist and `to` is listed as reachable from `from`.
    pub fn can(&self, from: &str, to: &str) -> bool {
        self.states.contains_key(to) && self.states.get(from).is_some_and(|s| s.can_reach(to))
    }
}

pub(crate) struct Inner {
    core: Mutex<Core>,
    scheduler: EvaluationScheduler,
    telemetry: Arc<dyn Telemetry>,
    config: MachineConfig,
}

/// A finite-state machine with hierarchical transition groups.
///
/// # Example
///
/// ```rust
/// use statecraft::StateMachine;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let machine = StateMachine::new();
/// machine.add_state("idle").unwrap();
/// machine.add_state("running").unwrap();
/// machine.add_state_transition("idle", "running").unwrap();
/// machine.set_current_state("idle").unwrap();
///
/// assert!(machine.transition("running").await);
/// assert_eq!(machine.current_state().as_deref(), Some("running"));
/// assert!(!machine.transition("idle").await);
/// # }
/// ```
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Inner>,
}

/// Non-owning reference held by timers so they never keep a machine alive.
#[derive(Clone)]
pub(crate) struct WeakMachine(Weak<Inner>);

impl WeakMachine {
    pub fn upgrade(&self) -> Option<StateMachine> {
        self.0.upgrade().map(|inner| StateMachine { inner })
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read(|core| {
            f.debug_struct("StateMachine")
                .field("current", &core.current)
                .field("states", &core.state_order)
                .field("groups", &core.groups.names())
                .finish()
        })
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Run collected group handlers. Must be called without the machine lock.
pub(crate) fn fire_all(events: Vec<PendingEvent>) {
    for event in events {
        event.fire();
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::with_parts(MachineConfig::default(), Arc::new(TracingTelemetry))
    }

    pub fn with_config(config: MachineConfig) -> Self {
        Self::with_parts(config, Arc::new(TracingTelemetry))
    }

    pub fn builder() -> StateMachineBuilder {
        StateMachineBuilder::new()
    }

    pub(crate) fn with_parts(config: MachineConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core::new(&config)),
                scheduler: EvaluationScheduler::new(),
                telemetry,
                config,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.inner.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Core) -> R) -> R {
        f(&self.lock())
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        f(&mut self.lock())
    }

    pub(crate) fn downgrade(&self) -> WeakMachine {
        WeakMachine(Arc::downgrade(&self.inner))
    }

    pub(crate) fn scheduler(&self) -> &EvaluationScheduler {
        &self.inner.scheduler
    }

    pub(crate) fn telemetry(&self) -> &dyn Telemetry {
        self.inner.telemetry.as_ref()
    }

    /// Whether both handles refer to the same machine.
    pub fn same_machine(&self, other: &StateMachine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &MachineConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // States
    // ------------------------------------------------------------------

    pub fn add_state(&self, name: &str) -> Result<(), ConfigError> {
        self.write(|core| {
            if core.states.contains_key(name) {
                return Err(ConfigError::DuplicateState(name.to_string()));
            }
            core.states.insert(name.to_string(), StateNode::new(name));
            core.state_order.push(name.to_string());
            Ok(())
        })?;
        debug!(state = %name, "state added");
        Ok(())
    }

    /// Declare `to` reachable from `from`. Both states must exist.
    pub fn add_state_transition(&self, from: &str, to: &str) -> Result<(), ConfigError> {
        self.write(|core| {
            core.state(to)?;
            core.state_mut(from)?.add_transition(to);
            Ok(())
        })
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.read(|core| core.states.contains_key(name))
    }

    /// State names in registration order.
    pub fn states(&self) -> Vec<String> {
        self.read(|core| core.state_order.clone())
    }

    /// Targets reachable from `name`, in registration order.
    pub fn transitions_from(&self, name: &str) -> Vec<String> {
        self.read(|core| {
            core.states
                .get(name)
                .map(|s| s.transitions().to_vec())
                .unwrap_or_default()
        })
    }

    pub fn can(&self, from: &str, to: &str) -> bool {
        self.read(|core| core.can(from, to))
    }

    pub fn on_enter(&self, state: &str, hook: Hook) -> Result<(), ConfigError> {
        self.write(|core| core.state_mut(state).map(|s| s.add_enter_hook(hook)))
    }

    pub fn on_exit(&self, state: &str, hook: Hook) -> Result<(), ConfigError> {
        self.write(|core| core.state_mut(state).map(|s| s.add_exit_hook(hook)))
    }

    /// Register a handler run concurrently with the others once `state` is entered.
    pub fn on_do(&self, state: &str, handler: Hook) -> Result<(), ConfigError> {
        self.write(|core| core.state_mut(state).map(|s| s.add_handler(handler)))
    }

    /// Remove a state and everything that refers to it.
    ///
    /// Edges into the state, group transitions touching it, and pending
    /// evaluations keyed on it are all dropped. If it was the current state
    /// the machine is left without one. Returns `false` if it did not exist.
    pub fn remove_state(&self, name: &str) -> bool {
        let purged = self.write(|core| {
            core.states.remove(name)?;
            core.state_order.retain(|s| s != name);
            for node in core.states.values_mut() {
                node.remove_transition(name);
            }
            if core.current.as_deref() == Some(name) {
                core.current = None;
            }
            Some(core.groups.purge_state(name))
        });
        let Some(purged) = purged else {
            return false;
        };
        let cancelled = self.scheduler().cancel_where(|key| key.touches_state(name));
        info!(
            state = %name,
            group_transitions = purged,
            cancelled,
            "state removed"
        );
        true
    }

    /// Jump to a state without running any lifecycle stage.
    pub fn set_current_state(&self, name: &str) -> Result<(), ConfigError> {
        self.write(|core| {
            core.state(name)?;
            core.current = Some(name.to_string());
            Ok(())
        })
    }

    pub fn current_state(&self) -> Option<String> {
        self.read(|core| core.current.clone())
    }

    pub fn context(&self) -> Context {
        self.read(|core| core.context.clone())
    }

    // ------------------------------------------------------------------
    // Observers, middleware, plugins
    // ------------------------------------------------------------------

    pub fn on_before_transition<F>(&self, observer: F)
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.write(|core| core.observers.before.push(Arc::new(observer)));
    }

    pub fn on_failed_transition<F>(&self, observer: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.write(|core| core.observers.failed.push(Arc::new(observer)));
    }

    pub fn on_after_transition<F>(&self, observer: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.write(|core| core.observers.after.push(Arc::new(observer)));
    }

    /// Append to the global middleware chain, which runs before any group's.
    pub fn use_middleware(&self, middleware: Middleware) {
        self.write(|core| core.middleware.push(middleware));
    }

    pub fn use_plugin(&self, plugin: Plugin) {
        debug!(plugin = ?plugin, "installing plugin");
        match plugin {
            Plugin::Setup(setup) => setup(self),
            Plugin::Middleware(middleware) => self.use_middleware(middleware),
            Plugin::Installable(plugin) => plugin.install(self),
        }
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub fn create_group(&self, name: &str) -> Result<TransitionGroup, ConfigError> {
        self.create_group_in(name, None, None)
    }

    /// Create a group registered as `namespace:name`.
    pub fn create_namespaced_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<TransitionGroup, ConfigError> {
        self.create_group_in(name, Some(namespace), None)
    }

    pub(crate) fn create_group_in(
        &self,
        name: &str,
        namespace: Option<&str>,
        parent: Option<&str>,
    ) -> Result<TransitionGroup, ConfigError> {
        let full_name = self.write(|core| core.groups.create(name, namespace, parent))?;
        debug!(group = %full_name, parent = ?parent, "group created");
        Ok(TransitionGroup::new(
            self.clone(),
            name,
            namespace,
            full_name,
        ))
    }

    /// Look a group up by full name.
    pub fn group(&self, full_name: &str) -> Option<TransitionGroup> {
        self.read(|core| {
            core.groups.get(full_name).map(|entry| {
                TransitionGroup::new(
                    self.clone(),
                    entry.name(),
                    entry.namespace(),
                    entry.full_name().to_string(),
                )
            })
        })
    }

    /// Every group in creation order.
    pub fn groups(&self) -> Vec<TransitionGroup> {
        self.read(|core| {
            core.groups
                .iter()
                .map(|entry| {
                    TransitionGroup::new(
                        self.clone(),
                        entry.name(),
                        entry.namespace(),
                        entry.full_name().to_string(),
                    )
                })
                .collect()
        })
    }

    /// Groups that directly own `from -> to`, in creation order.
    pub fn groups_for_transition(&self, from: &str, to: &str) -> Vec<TransitionGroup> {
        let owners = self.read(|core| core.groups.owners(from, to));
        owners.iter().filter_map(|name| self.group(name)).collect()
    }

    /// Remove a group. Its children become roots and its pending evaluations
    /// are cancelled. Returns `false` if it did not exist.
    pub fn remove_group(&self, full_name: &str) -> bool {
        if self.write(|core| core.groups.remove(full_name)).is_none() {
            return false;
        }
        let cancelled = self.scheduler().cancel_where(|key| key.group == full_name);
        info!(group = %full_name, cancelled, "group removed");
        true
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Recorded attempts, oldest first.
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.read(|core| core.history.records().cloned().collect())
    }

    /// Names of the states visited by successful attempts.
    pub fn path(&self) -> Vec<String> {
        self.read(|core| core.history.path().into_iter().map(str::to_string).collect())
    }

    pub fn clear_history(&self) {
        self.write(|core| core.history.clear());
    }

    /// Drop every state, group, observer, middleware, and pending evaluation.
    pub fn clear(&self) {
        self.scheduler().cancel_all();
        let config = self.inner.config.clone();
        let previous = self.write(|core| std::mem::replace(core, Core::new(&config)));
        drop(previous);
        info!("machine cleared");
    }
}
