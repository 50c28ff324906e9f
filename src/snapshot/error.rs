//! Snapshot error types.

use crate::machine::ConfigError;
use thiserror::Error;

/// A reason a snapshot cannot be imported into a particular machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotIssue {
    #[error("group '{0}' already exists")]
    DuplicateGroup(String),

    #[error("parent group '{0}' does not exist")]
    MissingParent(String),

    #[error("state '{0}' does not exist")]
    UnknownState(String),
}

/// Errors that can occur during snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Serialization to JSON or binary format failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deserialization from JSON or binary format failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Every problem found while validating against the target machine
    #[error("Snapshot validation failed: {issues:?}")]
    ValidationFailed { issues: Vec<SnapshotIssue> },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
