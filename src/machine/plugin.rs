//! Plugin registration.
//!
//! A plugin is one of three explicit shapes, chosen by the caller when the
//! plugin is built rather than inferred from the value.

use super::machine::StateMachine;
use super::middleware::Middleware;
use std::fmt;

/// An object that configures a machine when installed.
pub trait Installable: Send + Sync {
    fn install(&self, machine: &StateMachine);
}

pub enum Plugin {
    /// Invoked once with the machine
    Setup(Box<dyn FnOnce(&StateMachine) + Send>),
    /// Appended to the global middleware chain
    Middleware(Middleware),
    /// Installed through [`Installable::install`]
    Installable(Box<dyn Installable>),
}

impl Plugin {
    pub fn setup<F>(f: F) -> Self
    where
        F: FnOnce(&StateMachine) + Send + 'static,
    {
        Plugin::Setup(Box::new(f))
    }

    pub fn middleware(middleware: Middleware) -> Self {
        Plugin::Middleware(middleware)
    }

    pub fn installable<I>(plugin: I) -> Self
    where
        I: Installable + 'static,
    {
        Plugin::Installable(Box::new(plugin))
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plugin::Setup(_) => f.write_str("Plugin::Setup"),
            Plugin::Middleware(_) => f.write_str("Plugin::Middleware"),
            Plugin::Installable(_) => f.write_str("Plugin::Installable"),
        }
    }
}
