//! Configuration records owned by groups and transitions.

use crate::core::{Condition, Context, Setting};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Timing lane used when dispatching a condition check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationStrategy {
    /// Check in the current turn
    #[default]
    Immediate,
    /// Check at the start of the next cooperative turn, FIFO
    NextTick,
    /// Check only when no next-turn work is pending
    Idle,
}

/// Predicate that drops a relevant context change without checking the condition.
#[derive(Clone)]
pub struct SkipIf(Arc<dyn Fn(&Context) -> bool + Send + Sync>);

impl SkipIf {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        SkipIf(Arc::new(f))
    }

    pub fn check(&self, context: &Context) -> bool {
        (self.0)(context)
    }
}

impl fmt::Debug for SkipIf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SkipIf(<fn>)")
    }
}

/// Retry policy for automatic transitions whose attempt fails.
#[derive(Clone, Debug, Default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: Option<Setting<u32>>,
    /// Milliseconds between attempts
    pub delay: Option<Setting<u64>>,
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, value: impl Into<Setting<u32>>) -> Self {
        self.max_attempts = Some(value.into());
        self
    }

    pub fn delay(mut self, value: impl Into<Setting<u64>>) -> Self {
        self.delay = Some(value.into());
        self
    }
}

/// When and how a transition's condition is re-checked.
#[derive(Clone, Debug, Default)]
pub struct EvaluationConfig {
    /// Dotted context paths; empty means every change is relevant
    pub watch_properties: Vec<String>,
    pub skip_if: Option<SkipIf>,
    pub strategy: Option<EvaluationStrategy>,
}

impl EvaluationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(mut self, path: impl Into<String>) -> Self {
        self.watch_properties.push(path.into());
        self
    }

    pub fn skip_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.skip_if = Some(SkipIf::new(f));
        self
    }

    pub fn strategy(mut self, strategy: EvaluationStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Configuration owned by a group and inherited by its descendants.
///
/// # Example
///
/// ```rust
/// use statecraft::group::{GroupConfig, RetryConfig};
///
/// let config = GroupConfig::new()
///     .priority(1)
///     .debounce(100)
///     .retry(RetryConfig::new().max_attempts(3));
///
/// assert!(config.priority.is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct GroupConfig {
    pub priority: Option<Setting<i32>>,
    pub debounce: Option<Setting<u64>>,
    pub retry: Option<RetryConfig>,
    pub evaluation: Option<EvaluationConfig>,
}

impl GroupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, value: impl Into<Setting<i32>>) -> Self {
        self.priority = Some(value.into());
        self
    }

    pub fn debounce(mut self, value: impl Into<Setting<u64>>) -> Self {
        self.debounce = Some(value.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn evaluation(mut self, evaluation: EvaluationConfig) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    /// Overwrite every field that `other` defines.
    pub fn merge(&mut self, other: GroupConfig) {
        if other.priority.is_some() {
            self.priority = other.priority;
        }
        if other.debounce.is_some() {
            self.debounce = other.debounce;
        }
        if other.retry.is_some() {
            self.retry = other.retry;
        }
        if other.evaluation.is_some() {
            self.evaluation = other.evaluation;
        }
    }
}

/// A transition registered in a group, guarded by a condition.
#[derive(Clone, Debug, Default)]
pub struct AutoTransitionConfig {
    pub condition: Condition,
    pub priority: Option<Setting<i32>>,
    pub debounce: Option<Setting<u64>>,
    pub retry: Option<RetryConfig>,
    pub evaluation: Option<EvaluationConfig>,
    pub tags: Vec<String>,
}

impl AutoTransitionConfig {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            ..Self::default()
        }
    }

    /// Unconditional transition.
    pub fn always() -> Self {
        Self::new(Condition::always())
    }

    pub fn priority(mut self, value: impl Into<Setting<i32>>) -> Self {
        self.priority = Some(value.into());
        self
    }

    pub fn debounce(mut self, value: impl Into<Setting<u64>>) -> Self {
        self.debounce = Some(value.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn evaluation(mut self, evaluation: EvaluationConfig) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }
}

/// Retry policy after inheritance has been applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolvedRetry {
    pub max_attempts: Option<u32>,
    pub delay: Option<u64>,
}

/// A transition's configuration merged with its group's ancestor chain.
#[derive(Clone, Debug)]
pub struct EffectiveConfig {
    pub from: String,
    pub to: String,
    pub condition: Condition,
    pub priority: Option<i32>,
    pub debounce: Option<u64>,
    pub retry: ResolvedRetry,
    pub watch_properties: Vec<String>,
    pub skip_if: Option<SkipIf>,
    pub strategy: Option<EvaluationStrategy>,
    pub tags: Vec<String>,
}

/// Compares every resolved setting. Predicates are compared by presence only.
impl PartialEq for EffectiveConfig {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.priority == other.priority
            && self.debounce == other.debounce
            && self.retry == other.retry
            && self.watch_properties == other.watch_properties
            && self.skip_if.is_some() == other.skip_if.is_some()
            && self.strategy == other.strategy
            && self.tags == other.tags
    }
}
