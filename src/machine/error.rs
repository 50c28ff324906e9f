//! Setup-time configuration errors.

use thiserror::Error;

/// Programmer errors raised while declaring states and groups.
///
/// Transition attempts never produce these; they report `false` instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("State '{0}' already exists")]
    DuplicateState(String),

    #[error("State '{0}' does not exist")]
    UnknownState(String),

    #[error("Group '{0}' already exists")]
    DuplicateGroup(String),

    #[error("Group '{0}' does not exist")]
    UnknownGroup(String),

    #[error("Making '{parent}' the parent of '{group}' would create a cycle")]
    HierarchyCycle { group: String, parent: String },

    #[error("No async runtime available to schedule {0}")]
    NoRuntime(String),
}
