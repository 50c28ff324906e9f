//! Hierarchical transition groups.
//!
//! A group collects automatic transitions that share configuration, enabled
//! state, event handlers, and middleware. Groups form a tree: a group inherits
//! every setting it does not define from its ancestors, and events raised in a
//! group are observed by each of its ancestors.
//!
//! - [`config`]: configuration records for groups and transitions
//! - [`registry`]: the arena storing every group of a machine
//! - [`resolver`]: merging a transition's configuration with its ancestors'
//! - [`TransitionGroup`]: the public handle

pub mod config;
mod handle;
pub mod registry;
pub mod resolver;

pub use config::{
    AutoTransitionConfig, EffectiveConfig, EvaluationConfig, EvaluationStrategy, GroupConfig,
    ResolvedRetry, RetryConfig, SkipIf,
};
pub use handle::{DisableOptions, EnableOptions, TransitionGroup};
pub use registry::{full_name, GroupEntry, GroupEvent, GroupEventKind, GroupRegistry};
pub use resolver::resolve;
