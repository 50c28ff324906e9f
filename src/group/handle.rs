//! Public handle to a group stored in a machine.

use super::config::{AutoTransitionConfig, EffectiveConfig, GroupConfig};
use super::registry::{GateView, GroupEntry, GroupEvent, HandlerKind};
use super::resolver::resolve;
use crate::core::Context;
use crate::machine::machine::fire_all;
use crate::machine::{ConfigError, Middleware, StateMachine};
use crate::snapshot::GroupSnapshot;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Options for [`TransitionGroup::enable`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnableOptions {
    pub cascade: bool,
}

impl EnableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply to every descendant as well.
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }
}

/// Options for [`TransitionGroup::disable`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisableOptions {
    pub prevent_manual_transitions: bool,
    pub cascade: bool,
}

impl DisableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also block manual transitions owned by the group.
    pub fn prevent_manual_transitions(mut self) -> Self {
        self.prevent_manual_transitions = true;
        self
    }

    /// Apply to every descendant as well.
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }
}

/// A named collection of automatic transitions.
///
/// The handle refers to the group by full name. Once the group is removed,
/// queries return empty results and mutations fail with
/// [`ConfigError::UnknownGroup`].
///
/// # Example
///
/// ```rust
/// use statecraft::group::{AutoTransitionConfig, GroupConfig};
/// use statecraft::StateMachine;
///
/// let machine = StateMachine::new();
/// machine.add_state("idle").unwrap();
/// machine.add_state("busy").unwrap();
///
/// let parent = machine.create_group("parent").unwrap();
/// parent.with_config(GroupConfig::new().debounce(100)).unwrap();
/// let child = parent.create_child_group("child").unwrap();
/// child
///     .add_transition("idle", "busy", AutoTransitionConfig::always())
///     .unwrap();
///
/// let config = child.effective_config("idle", "busy", None).unwrap();
/// assert_eq!(config.debounce, Some(100));
/// ```
#[derive(Clone)]
pub struct TransitionGroup {
    machine: StateMachine,
    name: String,
    namespace: Option<String>,
    full_name: String,
}

impl fmt::Debug for TransitionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionGroup")
            .field("full_name", &self.full_name)
            .finish()
    }
}

impl PartialEq for TransitionGroup {
    fn eq(&self, other: &Self) -> bool {
        self.full_name == other.full_name && self.machine.same_machine(&other.machine)
    }
}

impl TransitionGroup {
    pub(crate) fn new(
        machine: StateMachine,
        name: &str,
        namespace: Option<&str>,
        full_name: String,
    ) -> Self {
        Self {
            machine,
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            full_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// `namespace:name`, or `name` without a namespace.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Whether the group is still registered.
    pub fn exists(&self) -> bool {
        self.machine.read(|core| core.groups.contains(&self.full_name))
    }

    fn inspect<R>(&self, f: impl FnOnce(&GroupEntry) -> R) -> Option<R> {
        self.machine
            .read(|core| core.groups.get(&self.full_name).map(f))
    }

    fn update<R>(&self, f: impl FnOnce(&mut GroupEntry) -> R) -> Result<R, ConfigError> {
        self.machine
            .write(|core| core.groups.entry_mut(&self.full_name).map(f))
    }

    fn lookup(&self, full_name: Option<String>) -> Option<TransitionGroup> {
        full_name.and_then(|name| self.machine.group(&name))
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Register `from -> to` in this group.
    ///
    /// Both states must exist. The edge is also declared on the source state,
    /// so the transition passes validation. Re-adding a pair overwrites its
    /// configuration and tags.
    pub fn add_transition(
        &self,
        from: &str,
        to: &str,
        config: AutoTransitionConfig,
    ) -> Result<(), ConfigError> {
        self.machine.write(|core| {
            core.groups.entry(&self.full_name)?;
            core.state(to)?;
            core.state_mut(from)?.add_transition(to);
            core.groups
                .entry_mut(&self.full_name)
                .map(|g| g.add_transition(from, to, config))
        })?;
        debug!(group = %self.full_name, from = %from, to = %to, "group transition added");
        Ok(())
    }

    /// Remove `from -> to` from this group and cancel its pending evaluations.
    ///
    /// The edge on the source state is left in place.
    pub fn remove_transition(&self, from: &str, to: &str) -> bool {
        let removed = self
            .update(|g| g.remove_transition(from, to))
            .unwrap_or(false);
        if removed {
            self.machine.scheduler().cancel_where(|key| {
                key.group == self.full_name && key.from == from && key.to == to
            });
        }
        removed
    }

    pub fn has_transition(&self, from: &str, to: &str) -> bool {
        self.inspect(|g| g.has_transition(from, to)).unwrap_or(false)
    }

    /// Every `(from, to)` pair, ordered by source then target.
    pub fn transitions(&self) -> Vec<(String, String)> {
        self.inspect(GroupEntry::transition_pairs).unwrap_or_default()
    }

    pub fn transitions_by_tag(&self, tag: &str) -> Vec<(String, String)> {
        self.inspect(|g| g.transitions_by_tag(tag)).unwrap_or_default()
    }

    pub fn tags(&self) -> Vec<String> {
        self.inspect(GroupEntry::tags).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Merge `config` into the group's own configuration.
    pub fn with_config(&self, config: GroupConfig) -> Result<(), ConfigError> {
        self.update(|g| g.config.merge(config))
    }

    /// The group's own configuration, without inheritance.
    pub fn config(&self) -> Option<GroupConfig> {
        self.inspect(|g| g.config.clone())
    }

    /// Configuration of `from -> to` after inheritance.
    pub fn effective_config(
        &self,
        from: &str,
        to: &str,
        context: Option<&Context>,
    ) -> Option<EffectiveConfig> {
        self.machine
            .read(|core| resolve(&core.groups, &self.full_name, from, to, context))
    }

    // ------------------------------------------------------------------
    // Hierarchy
    // ------------------------------------------------------------------

    /// Create a group under this one. It shares this group's namespace.
    pub fn create_child_group(&self, name: &str) -> Result<TransitionGroup, ConfigError> {
        self.machine
            .create_group_in(name, self.namespace(), Some(&self.full_name))
    }

    /// Move this group under `parent`. A parent inside this group's own
    /// subtree is rejected.
    pub fn set_parent(&self, parent: &TransitionGroup) -> Result<(), ConfigError> {
        self.machine.write(|core| {
            core.groups
                .set_parent(&self.full_name, Some(parent.full_name()))
        })
    }

    /// Detach from the current parent.
    pub fn make_root(&self) -> Result<(), ConfigError> {
        self.machine
            .write(|core| core.groups.set_parent(&self.full_name, None))
    }

    pub fn parent(&self) -> Option<TransitionGroup> {
        self.lookup(self.inspect(|g| g.parent().map(str::to_string)).flatten())
    }

    pub fn children(&self) -> Vec<TransitionGroup> {
        self.inspect(|g| g.children().to_vec())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|name| self.machine.group(&name))
            .collect()
    }

    /// The topmost ancestor, or this group if it has none.
    pub fn root(&self) -> TransitionGroup {
        let root = self.machine.read(|core| core.groups.root(&self.full_name));
        self.lookup(root).unwrap_or_else(|| self.clone())
    }

    /// Full names from the root down to this group.
    pub fn hierarchy_path(&self) -> Vec<String> {
        self.machine
            .read(|core| core.groups.hierarchy_path(&self.full_name))
    }

    // ------------------------------------------------------------------
    // Enabled state
    // ------------------------------------------------------------------

    fn gate(&self) -> Option<GateView> {
        self.inspect(GroupEntry::gate)
    }

    /// Whether automatic evaluation may use this group under `context`.
    pub fn is_enabled(&self, context: Option<&Context>) -> bool {
        self.gate().is_some_and(|gate| gate.is_enabled(context))
    }

    pub fn allows_manual_transitions(&self) -> bool {
        self.gate().is_some_and(|gate| gate.allows_manual())
    }

    pub fn enable(&self, options: EnableOptions) -> Result<(), ConfigError> {
        let events = self.machine.write(|core| {
            core.groups
                .set_enabled(&self.full_name, true, None, options.cascade)
        })?;
        info!(group = %self.full_name, cascade = options.cascade, changed = events.len(), "group enabled");
        fire_all(events);
        Ok(())
    }

    pub fn disable(&self, options: DisableOptions) -> Result<(), ConfigError> {
        let events = self.machine.write(|core| {
            core.groups.set_enabled(
                &self.full_name,
                false,
                Some(options.prevent_manual_transitions),
                options.cascade,
            )
        })?;
        info!(group = %self.full_name, cascade = options.cascade, changed = events.len(), "group disabled");
        fire_all(events);
        Ok(())
    }

    /// Disable now and re-enable after `duration`.
    ///
    /// An explicit `enable` or `disable` in the meantime cancels the re-enable.
    pub fn disable_temporarily(
        &self,
        duration: Duration,
        options: DisableOptions,
    ) -> Result<(), ConfigError> {
        self.schedule_reenable(duration, options, None)
    }

    /// Like [`disable_temporarily`](Self::disable_temporarily), running
    /// `on_reenable` once the group has been re-enabled.
    pub fn disable_temporarily_then<F>(
        &self,
        duration: Duration,
        options: DisableOptions,
        on_reenable: F,
    ) -> Result<(), ConfigError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_reenable(duration, options, Some(Box::new(on_reenable)))
    }

    fn schedule_reenable(
        &self,
        duration: Duration,
        options: DisableOptions,
        on_reenable: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), ConfigError> {
        let runtime = Handle::try_current().map_err(|_| {
            ConfigError::NoRuntime(format!("re-enable of group '{}'", self.full_name))
        })?;
        self.disable(options)?;

        let machine = self.machine.downgrade();
        let name = self.full_name.clone();
        let cascade = options.cascade;
        self.machine.write(|core| {
            let entry = core.groups.entry_mut(&self.full_name)?;
            let task = runtime.spawn(async move {
                tokio::time::sleep(duration).await;
                let Some(machine) = machine.upgrade() else {
                    return;
                };
                let events = machine.write(|core| {
                    if let Some(entry) = core.groups.get_mut(&name) {
                        entry.release_reenable_timer();
                    }
                    core.groups.set_enabled(&name, true, None, cascade)
                });
                let Ok(events) = events else {
                    return;
                };
                info!(group = %name, "temporary disable elapsed");
                fire_all(events);
                if let Some(callback) = on_reenable {
                    callback();
                }
            });
            entry.set_reenable_timer(task);
            Ok(())
        })
    }

    /// Gate automatic evaluation on `predicate` while the group is enabled.
    pub fn set_enable_condition<F>(&self, predicate: F) -> Result<(), ConfigError>
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.update(|g| g.set_enable_condition(Some(Arc::new(predicate))))
    }

    pub fn clear_enable_condition(&self) -> Result<(), ConfigError> {
        self.update(|g| g.set_enable_condition(None))
    }

    // ------------------------------------------------------------------
    // Events and middleware
    // ------------------------------------------------------------------

    fn add_handler<F>(&self, kind: HandlerKind, handler: F, once: bool) -> Result<(), ConfigError>
    where
        F: Fn(&GroupEvent) + Send + Sync + 'static,
    {
        self.update(|g| g.add_handler(kind, Arc::new(handler), once))
    }

    /// Called after a transition owned by this group or a descendant commits.
    pub fn on_transition<F>(&self, handler: F) -> Result<(), ConfigError>
    where
        F: Fn(&GroupEvent) + Send + Sync + 'static,
    {
        self.add_handler(HandlerKind::Transition, handler, false)
    }

    pub fn once_transition<F>(&self, handler: F) -> Result<(), ConfigError>
    where
        F: Fn(&GroupEvent) + Send + Sync + 'static,
    {
        self.add_handler(HandlerKind::Transition, handler, true)
    }

    /// Called when this group or a descendant goes from disabled to enabled.
    pub fn on_enable<F>(&self, handler: F) -> Result<(), ConfigError>
    where
        F: Fn(&GroupEvent) + Send + Sync + 'static,
    {
        self.add_handler(HandlerKind::Enable, handler, false)
    }

    pub fn once_enable<F>(&self, handler: F) -> Result<(), ConfigError>
    where
        F: Fn(&GroupEvent) + Send + Sync + 'static,
    {
        self.add_handler(HandlerKind::Enable, handler, true)
    }

    /// Called when this group or a descendant goes from enabled to disabled.
    pub fn on_disable<F>(&self, handler: F) -> Result<(), ConfigError>
    where
        F: Fn(&GroupEvent) + Send + Sync + 'static,
    {
        self.add_handler(HandlerKind::Disable, handler, false)
    }

    pub fn once_disable<F>(&self, handler: F) -> Result<(), ConfigError>
    where
        F: Fn(&GroupEvent) + Send + Sync + 'static,
    {
        self.add_handler(HandlerKind::Disable, handler, true)
    }

    /// Append to this group's middleware chain, which runs after the global one
    /// for transitions the group owns.
    pub fn use_middleware(&self, middleware: Middleware) -> Result<(), ConfigError> {
        self.update(|g| g.middleware.push(middleware))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Serializable description of the group.
    pub fn snapshot(&self) -> Option<GroupSnapshot> {
        self.inspect(GroupSnapshot::capture)
    }

    /// Remove the group from its machine.
    pub fn remove(&self) -> bool {
        self.machine.remove_group(&self.full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupEventKind;
    use serde_json::json;
    use std::sync::Mutex;

    fn machine() -> StateMachine {
        let machine = StateMachine::new();
        for state in ["a", "b", "c"] {
            machine.add_state(state).unwrap();
        }
        machine.set_current_state("a").unwrap();
        machine
    }

    fn recorder() -> (Arc<Mutex<Vec<GroupEvent>>>, impl Fn(&GroupEvent) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |event: &GroupEvent| sink.lock().unwrap().push(event.clone()))
    }

    #[test]
    fn add_transition_requires_known_states() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();

        let err = group
            .add_transition("a", "zz", AutoTransitionConfig::always())
            .unwrap_err();

        assert_eq!(err, ConfigError::UnknownState("zz".into()));
        assert!(!group.has_transition("a", "zz"));
    }

    #[test]
    fn add_transition_declares_the_state_edge() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();
        group
            .add_transition("a", "b", AutoTransitionConfig::always())
            .unwrap();

        assert!(machine.can("a", "b"));
        assert_eq!(machine.groups_for_transition("a", "b"), vec![group]);
    }

    #[test]
    fn removed_group_rejects_mutation() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();
        assert!(group.remove());

        assert!(!group.exists());
        assert_eq!(
            group.with_config(GroupConfig::new()),
            Err(ConfigError::UnknownGroup("g".into()))
        );
        assert!(group.transitions().is_empty());
    }

    #[test]
    fn child_groups_share_namespace_and_hierarchy() {
        let machine = machine();
        let parent = machine.create_namespaced_group("ui", "main").unwrap();
        let child = parent.create_child_group("modal").unwrap();

        assert_eq!(child.full_name(), "ui:modal");
        assert_eq!(child.parent(), Some(parent.clone()));
        assert_eq!(parent.children(), vec![child.clone()]);
        assert_eq!(child.root(), parent);
        assert_eq!(child.hierarchy_path(), vec!["ui:main", "ui:modal"]);
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let machine = machine();
        let a = machine.create_group("a").unwrap();
        let b = a.create_child_group("b").unwrap();

        assert!(matches!(
            a.set_parent(&b),
            Err(ConfigError::HierarchyCycle { .. })
        ));
        b.make_root().unwrap();
        assert_eq!(b.parent(), None);
        a.set_parent(&b).unwrap();
        assert_eq!(a.root(), b);
    }

    #[test]
    fn disable_twice_emits_one_event() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();
        let (log, handler) = recorder();
        group.on_disable(handler).unwrap();

        group.disable(DisableOptions::new()).unwrap();
        group.disable(DisableOptions::new()).unwrap();

        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(!group.is_enabled(None));
    }

    #[test]
    fn cascade_disable_bubbles_for_each_descendant() {
        let machine = machine();
        let root = machine.create_group("root").unwrap();
        let child = root.create_child_group("child").unwrap();
        child.create_child_group("leaf").unwrap();
        let (log, handler) = recorder();
        root.on_disable(handler).unwrap();

        root.disable(DisableOptions::new().cascade()).unwrap();

        let origins: Vec<String> = log.lock().unwrap().iter().map(|e| e.group.clone()).collect();
        assert_eq!(origins, vec!["root", "child", "leaf"]);
        assert!(!child.is_enabled(None));
    }

    #[test]
    fn enable_condition_gates_only_automatic_evaluation() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();
        group
            .set_enable_condition(|ctx| ctx["on"] == json!(true))
            .unwrap();

        assert!(group.is_enabled(None));
        assert!(!group.is_enabled(Some(&json!({ "on": false }))));
        assert!(group.allows_manual_transitions());

        group.clear_enable_condition().unwrap();
        assert!(group.is_enabled(Some(&json!({ "on": false }))));
    }

    #[test]
    fn tags_are_queryable_through_the_handle() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();
        group
            .add_transition("a", "b", AutoTransitionConfig::always().tag("fast"))
            .unwrap();
        group
            .add_transition("b", "c", AutoTransitionConfig::always().tag("slow"))
            .unwrap();

        assert_eq!(group.tags(), vec!["fast", "slow"]);
        assert_eq!(
            group.transitions_by_tag("slow"),
            vec![("b".to_string(), "c".to_string())]
        );
        assert!(group.remove_transition("b", "c"));
        assert_eq!(group.tags(), vec!["fast"]);
    }

    #[tokio::test]
    async fn transition_events_reach_ancestors() {
        let machine = machine();
        let parent = machine.create_group("parent").unwrap();
        let child = parent.create_child_group("child").unwrap();
        child
            .add_transition("a", "b", AutoTransitionConfig::always())
            .unwrap();
        let (log, handler) = recorder();
        parent.once_transition(handler).unwrap();

        assert!(machine.transition("b").await);

        let events = log.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![GroupEvent {
                group: "child".into(),
                kind: GroupEventKind::Transition {
                    from: "a".into(),
                    to: "b".into()
                },
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn temporary_disable_re_enables_and_calls_back() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);

        group
            .disable_temporarily_then(Duration::from_millis(50), DisableOptions::new(), move || {
                *flag.lock().unwrap() = true;
            })
            .unwrap();
        assert!(!group.is_enabled(None));

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(group.is_enabled(None));
        assert!(*called.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_enable_cancels_the_pending_re_enable() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();
        let (log, handler) = recorder();
        group.on_enable(handler).unwrap();

        group
            .disable_temporarily(Duration::from_millis(50), DisableOptions::new())
            .unwrap();
        group.enable(EnableOptions::new()).unwrap();
        group.disable(DisableOptions::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!group.is_enabled(None));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn temporary_disable_needs_a_runtime() {
        let machine = machine();
        let group = machine.create_group("g").unwrap();
        assert!(matches!(
            group.disable_temporarily(Duration::from_millis(5), DisableOptions::new()),
            Err(ConfigError::NoRuntime(_))
        ));
        assert!(group.is_enabled(None));
    }
}
