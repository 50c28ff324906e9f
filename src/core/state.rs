//! Named states and their lifecycle hooks.
//!
//! A state owns the names it can transition to plus three hook lists: enter
//! hooks, exit hooks, and "do" handlers that run once the state is entered.

use super::context::Context;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Error type returned by user callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a user callback.
pub type CallbackResult = Result<(), CallbackError>;

/// Boxed future returned by hooks and middleware.
pub type CallbackFuture = BoxFuture<'static, CallbackResult>;

/// Arguments handed to every state hook.
///
/// `from` and `to` describe the transition being executed, so an exit hook
/// sees its own state as `from` and an enter hook sees its own state as `to`.
#[derive(Clone, Debug, PartialEq)]
pub struct HookArgs {
    pub from: String,
    pub to: String,
    pub context: Context,
}

/// Async callback attached to a state.
#[derive(Clone)]
pub struct Hook(Arc<dyn Fn(HookArgs) -> CallbackFuture + Send + Sync>);

impl Hook {
    /// Create a hook from an async function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HookArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        Hook(Arc::new(move |args| f(args).boxed()))
    }

    /// Create a hook from a synchronous function.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&HookArgs) -> CallbackResult + Send + Sync + 'static,
    {
        Hook(Arc::new(move |args| {
            let result = f(&args);
            futures::future::ready(result).boxed()
        }))
    }

    pub fn call(&self, args: HookArgs) -> CallbackFuture {
        (self.0)(args)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook(<fn>)")
    }
}

/// A registered state.
#[derive(Clone, Debug)]
pub struct StateNode {
    name: String,
    transitions: Vec<String>,
    enter_hooks: Vec<Hook>,
    exit_hooks: Vec<Hook>,
    handlers: Vec<Hook>,
}

impl StateNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transitions: Vec::new(),
            enter_hooks: Vec::new(),
            exit_hooks: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reachable target names in registration order.
    pub fn transitions(&self) -> &[String] {
        &self.transitions
    }

    /// Add a reachable target. Returns `false` if it was already listed.
    pub fn add_transition(&mut self, to: impl Into<String>) -> bool {
        let to = to.into();
        if self.transitions.contains(&to) {
            return false;
        }
        self.transitions.push(to);
        true
    }

    /// Remove a reachable target. Returns `true` if it was listed.
    pub fn remove_transition(&mut self, to: &str) -> bool {
        let before = self.transitions.len();
        self.transitions.retain(|t| t != to);
        self.transitions.len() != before
    }

    pub fn can_reach(&self, to: &str) -> bool {
        self.transitions.iter().any(|t| t == to)
    }

    pub fn add_enter_hook(&mut self, hook: Hook) {
        self.enter_hooks.push(hook);
    }

    pub fn add_exit_hook(&mut self, hook: Hook) {
        self.exit_hooks.push(hook);
    }

    pub fn add_handler(&mut self, handler: Hook) {
        self.handlers.push(handler);
    }

    pub fn enter_hooks(&self) -> &[Hook] {
        &self.enter_hooks
    }

    pub fn exit_hooks(&self) -> &[Hook] {
        &self.exit_hooks
    }

    pub fn handlers(&self) -> &[Hook] {
        &self.handlers
    }
}
