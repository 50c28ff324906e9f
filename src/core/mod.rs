//! Core data types shared by every layer of the machine.
//!
//! This module holds plain data and pure helpers:
//! - Named states with their hook lists
//! - Conditions guarding automatic transitions
//! - Static-or-dynamic settings
//! - Context path access and merging
//! - Transition attempt records
//!
//! Nothing in here touches the scheduler or the executor.

pub mod context;
mod condition;
mod history;
mod setting;
mod state;

pub use condition::Condition;
pub use context::Context;
pub use history::{TransitionHistory, TransitionRecord};
pub use setting::Setting;
pub use state::{CallbackError, CallbackFuture, CallbackResult, Hook, HookArgs, StateNode};
