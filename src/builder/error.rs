//! Build errors for the machine and group builders.

use crate::machine::ConfigError;
use thiserror::Error;

/// Errors that can occur when building a state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("No states defined. Add at least one state with .state(name)")]
    NoStates,

    #[error("Initial state not specified. Call .initial(state) before .build()")]
    MissingInitialState,

    #[error("Initial state '{0}' was never declared")]
    UnknownInitialState(String),

    #[error("Transition target '{to}' (from '{from}') was never declared")]
    UnknownTarget { from: String, to: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
