//! Builder API for assembling a machine in one expression.
//!
//! Declarations are collected first and applied in dependency order on
//! [`build`](StateMachineBuilder::build): states, edges, groups, context,
//! the initial state, and finally plugins.

pub mod error;
mod group;
pub mod machine;

pub use error::BuildError;
pub use group::GroupBuilder;
pub use machine::StateMachineBuilder;
