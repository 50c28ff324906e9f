//! Machine-wide options.

use crate::group::EvaluationStrategy;
use serde::{Deserialize, Serialize};

/// Options fixed when a machine is built.
///
/// # Example
///
/// ```rust
/// use statecraft::MachineConfig;
///
/// let config = MachineConfig::from_json(r#"{ "historyLimit": 10 }"#).unwrap();
/// assert_eq!(config.history_limit, 10);
/// assert!(config.record_history);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MachineConfig {
    /// Keep attempt records in the machine's history
    pub record_history: bool,
    /// Maximum retained attempt records
    pub history_limit: usize,
    /// Attach a context snapshot to each attempt record
    pub record_context: bool,
    /// Lane used when no evaluation strategy resolves for a transition
    pub default_strategy: EvaluationStrategy,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            record_history: true,
            history_limit: 1000,
            record_context: true,
            default_strategy: EvaluationStrategy::Immediate,
        }
    }
}

impl MachineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = MachineConfig::from_json("{}").unwrap();
        assert_eq!(config, MachineConfig::default());
    }

    #[test]
    fn strategy_parses_from_camel_case() {
        let config = MachineConfig::from_json(r#"{ "defaultStrategy": "nextTick" }"#).unwrap();
        assert_eq!(config.default_strategy, EvaluationStrategy::NextTick);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(MachineConfig::from_json(r#"{ "defaultStrategy": "soon" }"#).is_err());
    }
}
