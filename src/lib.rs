//! Statecraft: a finite-state machine runtime with hierarchical transition
//! groups.
//!
//! States are plain names connected by declared edges. Automatic transitions
//! live in transition groups, which form a tree: a group inherits every
//! setting it leaves unset from its ancestors, can be enabled or disabled as
//! a subtree, and observes the events of its descendants. Context updates
//! drive evaluation of the automatic transitions leaving the current state,
//! filtered by watch paths and skip predicates, debounced, and dispatched on
//! one of three scheduling lanes.
//!
//! # Core Concepts
//!
//! - **StateMachine**: a cloneable handle owning states, groups, and history
//! - **TransitionGroup**: a handle onto one group of automatic transitions
//! - **Middleware**: async gates every attempt must pass through
//! - **Scheduler**: debounce timers plus `nextTick` and `idle` lanes
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use statecraft::group::{AutoTransitionConfig, EvaluationConfig};
//! use statecraft::{Condition, StateMachine};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let machine = StateMachine::new();
//! machine.add_state("pending").unwrap();
//! machine.add_state("paid").unwrap();
//! machine.set_current_state("pending").unwrap();
//!
//! let billing = machine.create_namespaced_group("orders", "billing").unwrap();
//! billing
//!     .add_transition(
//!         "pending",
//!         "paid",
//!         AutoTransitionConfig::new(Condition::new(|_state, ctx| ctx["balance"] == 0))
//!             .evaluation(EvaluationConfig::new().watch("balance")),
//!     )
//!     .unwrap();
//!
//! machine.update_context(json!({"balance": 0})).await;
//! assert_eq!(machine.current_state().as_deref(), Some("paid"));
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod core;
pub mod group;
pub mod machine;
pub mod scheduler;
pub mod snapshot;

// Re-export commonly used types
pub use builder::{BuildError, GroupBuilder, StateMachineBuilder};
pub use config::MachineConfig;
pub use self::core::{CallbackError, Condition, Context, Hook, HookArgs, TransitionRecord};
pub use group::{
    AutoTransitionConfig, DisableOptions, EnableOptions, EvaluationStrategy, GroupConfig,
    TransitionGroup,
};
pub use machine::{ConfigError, Middleware, Plugin, StateMachine};
pub use snapshot::{GroupSnapshot, SnapshotError};
