//! Arena of transition groups.
//!
//! Groups are stored by full name. A group records its parent's full name and
//! the ordered list of its children; no group holds a reference to another, so
//! the hierarchy is an index rather than an object graph.

use super::config::{AutoTransitionConfig, GroupConfig};
use crate::core::Context;
use crate::machine::{ConfigError, Middleware};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Something that happened to a group, observed by it and every ancestor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupEvent {
    /// Full name of the group where the event originated
    pub group: String,
    pub kind: GroupEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupEventKind {
    Transition { from: String, to: String },
    Enabled,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HandlerKind {
    Transition,
    Enable,
    Disable,
}

pub(crate) type GroupHandler = Arc<dyn Fn(&GroupEvent) + Send + Sync>;
pub(crate) type EnablePredicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

#[derive(Default)]
struct HandlerSet {
    regular: Vec<GroupHandler>,
    once: Vec<GroupHandler>,
}

impl HandlerSet {
    fn take(&mut self) -> Vec<GroupHandler> {
        let mut handlers = self.regular.clone();
        handlers.append(&mut self.once);
        handlers
    }
}

#[derive(Default)]
struct GroupHandlers {
    transition: HandlerSet,
    enable: HandlerSet,
    disable: HandlerSet,
}

impl GroupHandlers {
    fn set_mut(&mut self, kind: HandlerKind) -> &mut HandlerSet {
        match kind {
            HandlerKind::Transition => &mut self.transition,
            HandlerKind::Enable => &mut self.enable,
            HandlerKind::Disable => &mut self.disable,
        }
    }
}

/// Handlers collected for one event, ready to run outside the registry lock.
pub(crate) struct PendingEvent {
    pub event: GroupEvent,
    pub handlers: Vec<GroupHandler>,
}

impl PendingEvent {
    pub fn fire(self) {
        for handler in &self.handlers {
            handler(&self.event);
        }
    }
}

/// Enable state detached from the registry.
///
/// Enable predicates are user code, so they are evaluated on this copy after
/// the registry lock has been released.
#[derive(Clone)]
pub(crate) struct GateView {
    enabled: bool,
    prevent_manual: bool,
    predicate: Option<EnablePredicate>,
}

impl GateView {
    /// An explicit disable always wins. Otherwise the enable predicate decides
    /// when both it and a context are present.
    pub fn is_enabled(&self, context: Option<&Context>) -> bool {
        if !self.enabled {
            return false;
        }
        match (&self.predicate, context) {
            (Some(predicate), Some(ctx)) => predicate(ctx),
            _ => true,
        }
    }

    /// Only an explicit disable with `prevent_manual` set blocks manual
    /// transitions; a predicate that disables the group does not.
    pub fn allows_manual(&self) -> bool {
        self.enabled || !self.prevent_manual
    }
}

/// A transition group stored in the arena.
pub struct GroupEntry {
    name: String,
    namespace: Option<String>,
    full_name: String,
    pub(crate) config: GroupConfig,
    transitions: BTreeMap<String, BTreeMap<String, AutoTransitionConfig>>,
    tags: BTreeMap<String, BTreeSet<(String, String)>>,
    parent: Option<String>,
    children: Vec<String>,
    enabled: bool,
    prevent_manual: bool,
    enable_condition: Option<EnablePredicate>,
    handlers: GroupHandlers,
    pub(crate) middleware: Vec<Middleware>,
    reenable_timer: Option<JoinHandle<()>>,
}

impl fmt::Debug for GroupEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupEntry")
            .field("full_name", &self.full_name)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("enabled", &self.enabled)
            .field("prevent_manual", &self.prevent_manual)
            .field("transitions", &self.transition_pairs())
            .finish()
    }
}

/// `namespace:name` when a namespace is present, otherwise `name`.
pub fn full_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}:{name}"),
        None => name.to_string(),
    }
}

impl GroupEntry {
    fn new(name: &str, namespace: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            full_name: full_name(namespace, name),
            config: GroupConfig::default(),
            transitions: BTreeMap::new(),
            tags: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
            enabled: true,
            prevent_manual: false,
            enable_condition: None,
            handlers: GroupHandlers::default(),
            middleware: Vec::new(),
            reenable_timer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn explicitly_enabled(&self) -> bool {
        self.enabled
    }

    pub fn prevents_manual(&self) -> bool {
        self.prevent_manual
    }

    /// Register or overwrite a transition, indexing its tags.
    pub(crate) fn add_transition(&mut self, from: &str, to: &str, config: AutoTransitionConfig) {
        self.untag(from, to);
        for tag in &config.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert((from.to_string(), to.to_string()));
        }
        self.transitions
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), config);
    }

    pub(crate) fn remove_transition(&mut self, from: &str, to: &str) -> bool {
        let removed = match self.transitions.get_mut(from) {
            Some(targets) => {
                let removed = targets.remove(to).is_some();
                if targets.is_empty() {
                    self.transitions.remove(from);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.untag(from, to);
        }
        removed
    }

    fn untag(&mut self, from: &str, to: &str) {
        let pair = (from.to_string(), to.to_string());
        self.tags.retain(|_, pairs| {
            pairs.remove(&pair);
            !pairs.is_empty()
        });
    }

    /// Drop every transition touching `state`. Returns how many were removed.
    pub(crate) fn purge_state(&mut self, state: &str) -> usize {
        let doomed: Vec<(String, String)> = self
            .transition_pairs()
            .into_iter()
            .filter(|(from, to)| from == state || to == state)
            .collect();
        for (from, to) in &doomed {
            self.remove_transition(from, to);
        }
        doomed.len()
    }

    pub fn has_transition(&self, from: &str, to: &str) -> bool {
        self.transition(from, to).is_some()
    }

    pub fn transition(&self, from: &str, to: &str) -> Option<&AutoTransitionConfig> {
        self.transitions.get(from).and_then(|targets| targets.get(to))
    }

    /// All `(from, to)` pairs, ordered by source then target.
    pub fn transition_pairs(&self) -> Vec<(String, String)> {
        self.transitions
            .iter()
            .flat_map(|(from, targets)| targets.keys().map(move |to| (from.clone(), to.clone())))
            .collect()
    }

    pub(crate) fn transitions_from(
        &self,
        from: &str,
    ) -> impl Iterator<Item = (&String, &AutoTransitionConfig)> {
        self.transitions.get(from).into_iter().flat_map(|t| t.iter())
    }

    pub fn transitions_by_tag(&self, tag: &str) -> Vec<(String, String)> {
        self.tags
            .get(tag)
            .map(|pairs| pairs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    /// Copy of the enable state that can be evaluated without the registry.
    pub(crate) fn gate(&self) -> GateView {
        GateView {
            enabled: self.enabled,
            prevent_manual: self.prevent_manual,
            predicate: self.enable_condition.clone(),
        }
    }

    /// Whether automatic evaluation may use this group.
    pub fn is_enabled(&self, context: Option<&Context>) -> bool {
        self.gate().is_enabled(context)
    }

    /// Whether a manual transition may pass through this group.
    pub fn allows_manual_transitions(&self) -> bool {
        self.gate().allows_manual()
    }

    /// Overwrite both flags without cancelling timers or raising events.
    pub(crate) fn restore_flags(&mut self, enabled: bool, prevent_manual: bool) {
        self.enabled = enabled;
        self.prevent_manual = prevent_manual;
    }

    pub(crate) fn set_enable_condition(&mut self, predicate: Option<EnablePredicate>) {
        self.enable_condition = predicate;
    }

    pub(crate) fn add_handler(&mut self, kind: HandlerKind, handler: GroupHandler, once: bool) {
        let set = self.handlers.set_mut(kind);
        if once {
            set.once.push(handler);
        } else {
            set.regular.push(handler);
        }
    }

    pub(crate) fn cancel_reenable_timer(&mut self) -> bool {
        match self.reenable_timer.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_reenable_timer(&mut self, handle: JoinHandle<()>) {
        self.cancel_reenable_timer();
        self.reenable_timer = Some(handle);
    }

    /// Forget the re-enable timer without aborting it. Used by the timer itself.
    pub(crate) fn release_reenable_timer(&mut self) {
        self.reenable_timer = None;
    }
}

impl Drop for GroupEntry {
    fn drop(&mut self) {
        self.cancel_reenable_timer();
    }
}

/// Arena owning every group of a machine.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, GroupEntry>,
    order: Vec<String>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.groups.contains_key(full_name)
    }

    pub fn get(&self, full_name: &str) -> Option<&GroupEntry> {
        self.groups.get(full_name)
    }

    pub(crate) fn get_mut(&mut self, full_name: &str) -> Option<&mut GroupEntry> {
        self.groups.get_mut(full_name)
    }

    pub(crate) fn entry_mut(&mut self, full_name: &str) -> Result<&mut GroupEntry, ConfigError> {
        self.groups
            .get_mut(full_name)
            .ok_or_else(|| ConfigError::UnknownGroup(full_name.to_string()))
    }

    pub(crate) fn entry(&self, full_name: &str) -> Result<&GroupEntry, ConfigError> {
        self.groups
            .get(full_name)
            .ok_or_else(|| ConfigError::UnknownGroup(full_name.to_string()))
    }

    /// Full names in creation order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Groups in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &GroupEntry> {
        self.order.iter().filter_map(|name| self.groups.get(name))
    }

    /// Create a group, optionally under an existing parent.
    pub(crate) fn create(
        &mut self,
        name: &str,
        namespace: Option<&str>,
        parent: Option<&str>,
    ) -> Result<String, ConfigError> {
        let full = full_name(namespace, name);
        if self.groups.contains_key(&full) {
            return Err(ConfigError::DuplicateGroup(full));
        }
        if let Some(parent) = parent {
            if !self.groups.contains_key(parent) {
                return Err(ConfigError::UnknownGroup(parent.to_string()));
            }
        }
        self.groups.insert(full.clone(), GroupEntry::new(name, namespace));
        self.order.push(full.clone());
        if let Some(parent) = parent {
            self.attach(&full, parent);
        }
        Ok(full)
    }

    /// Remove a group. Its children become roots.
    pub(crate) fn remove(&mut self, full_name: &str) -> Option<GroupEntry> {
        let entry = self.groups.remove(full_name)?;
        self.order.retain(|n| n != full_name);
        if let Some(parent) = entry.parent.as_deref() {
            if let Some(parent) = self.groups.get_mut(parent) {
                parent.children.retain(|c| c != full_name);
            }
        }
        for child in &entry.children {
            if let Some(child) = self.groups.get_mut(child) {
                child.parent = None;
            }
        }
        Some(entry)
    }

    fn attach(&mut self, child: &str, parent: &str) {
        if let Some(entry) = self.groups.get_mut(child) {
            entry.parent = Some(parent.to_string());
        }
        if let Some(entry) = self.groups.get_mut(parent) {
            if !entry.children.iter().any(|c| c == child) {
                entry.children.push(child.to_string());
            }
        }
    }

    fn detach(&mut self, child: &str) {
        let previous = self.groups.get_mut(child).and_then(|e| e.parent.take());
        if let Some(previous) = previous {
            if let Some(entry) = self.groups.get_mut(&previous) {
                entry.children.retain(|c| c != child);
            }
        }
    }

    /// Re-parent a group, or make it a root with `None`.
    ///
    /// Rejects a parent that is the group itself or one of its descendants.
    pub(crate) fn set_parent(&mut self, child: &str, parent: Option<&str>) -> Result<(), ConfigError> {
        self.entry(child)?;
        if let Some(parent) = parent {
            self.entry(parent)?;
            if self.ancestry(parent).iter().any(|a| a == child) {
                return Err(ConfigError::HierarchyCycle {
                    group: child.to_string(),
                    parent: parent.to_string(),
                });
            }
        }
        self.detach(child);
        if let Some(parent) = parent {
            self.attach(child, parent);
        }
        Ok(())
    }

    /// The group followed by its ancestors, nearest first.
    ///
    /// The walk is bounded by the number of groups, so a corrupted parent
    /// link cannot loop forever.
    fn ancestry(&self, full_name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = self.groups.get(full_name);
        while let Some(entry) = cursor {
            if chain.len() > self.groups.len() {
                break;
            }
            chain.push(entry.full_name.clone());
            cursor = entry.parent.as_deref().and_then(|p| self.groups.get(p));
        }
        chain
    }

    /// Ancestor chain from the root down to the group itself.
    pub fn chain(&self, full_name: &str) -> Vec<&GroupEntry> {
        self.ancestry(full_name)
            .iter()
            .rev()
            .filter_map(|name| self.groups.get(name))
            .collect()
    }

    /// Full names from the root down to the group.
    pub fn hierarchy_path(&self, full_name: &str) -> Vec<String> {
        let mut path = self.ancestry(full_name);
        path.reverse();
        path
    }

    pub fn root(&self, full_name: &str) -> Option<String> {
        self.ancestry(full_name).pop()
    }

    /// The group and all of its descendants, depth-first, parents first.
    pub fn subtree(&self, full_name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![full_name.to_string()];
        while let Some(name) = stack.pop() {
            if out.contains(&name) {
                continue;
            }
            if let Some(entry) = self.groups.get(&name) {
                stack.extend(entry.children.iter().rev().cloned());
                out.push(name);
            }
        }
        out
    }

    /// Groups that directly own `(from, to)`, in creation order.
    pub fn owners(&self, from: &str, to: &str) -> Vec<String> {
        self.iter()
            .filter(|g| g.has_transition(from, to))
            .map(|g| g.full_name.clone())
            .collect()
    }

    /// Remove every transition touching `state` from every group.
    pub(crate) fn purge_state(&mut self, state: &str) -> usize {
        self.groups.values_mut().map(|g| g.purge_state(state)).sum()
    }

    /// Collect the handlers for an event on `origin` and each of its ancestors.
    ///
    /// One-shot handlers are drained as they are collected.
    pub(crate) fn bubble(&mut self, origin: &str, kind: GroupEventKind) -> PendingEvent {
        let handler_kind = match kind {
            GroupEventKind::Transition { .. } => HandlerKind::Transition,
            GroupEventKind::Enabled => HandlerKind::Enable,
            GroupEventKind::Disabled => HandlerKind::Disable,
        };
        let mut handlers = Vec::new();
        for name in self.ancestry(origin) {
            if let Some(entry) = self.groups.get_mut(&name) {
                handlers.extend(entry.handlers.set_mut(handler_kind).take());
            }
        }
        PendingEvent {
            event: GroupEvent {
                group: origin.to_string(),
                kind,
            },
            handlers,
        }
    }

    /// Set the explicit enabled flag, optionally over the whole subtree.
    ///
    /// The whole cascade is applied before any handler runs. Events are
    /// produced only for groups whose flag actually changed. Any pending
    /// temporary re-enable timer on a touched group is cancelled.
    pub(crate) fn set_enabled(
        &mut self,
        full_name: &str,
        enabled: bool,
        prevent_manual: Option<bool>,
        cascade: bool,
    ) -> Result<Vec<PendingEvent>, ConfigError> {
        self.entry(full_name)?;
        let targets = if cascade {
            self.subtree(full_name)
        } else {
            vec![full_name.to_string()]
        };

        let mut changed = Vec::new();
        for name in &targets {
            if let Some(entry) = self.groups.get_mut(name) {
                entry.cancel_reenable_timer();
                if let Some(prevent) = prevent_manual {
                    entry.prevent_manual = prevent;
                } else if enabled {
                    entry.prevent_manual = false;
                }
                if entry.enabled != enabled {
                    entry.enabled = enabled;
                    changed.push(name.clone());
                }
            }
        }

        let kind = if enabled {
            GroupEventKind::Enabled
        } else {
            GroupEventKind::Disabled
        };
        Ok(changed
            .iter()
            .map(|name| self.bubble(name, kind.clone()))
            .collect())
    }
}
