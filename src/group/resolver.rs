//! Effective configuration resolution.
//!
//! A transition inherits settings from every group on its owner's ancestor
//! chain. The chain is walked from the root down, so a closer definition
//! overwrites a more distant one, and the transition's own settings win over
//! anything inherited. Watch properties are the exception: they accumulate.

use super::config::{
    EffectiveConfig, EvaluationConfig, EvaluationStrategy, ResolvedRetry, RetryConfig, SkipIf,
};
use super::registry::GroupRegistry;
use crate::core::{Context, Setting};

/// Running winners while walking the chain.
#[derive(Default)]
struct Layered<'a> {
    priority: Option<&'a Setting<i32>>,
    debounce: Option<&'a Setting<u64>>,
    max_attempts: Option<&'a Setting<u32>>,
    delay: Option<&'a Setting<u64>>,
    watch: Vec<String>,
    skip_if: Option<&'a SkipIf>,
    strategy: Option<EvaluationStrategy>,
}

impl<'a> Layered<'a> {
    fn apply(
        &mut self,
        priority: Option<&'a Setting<i32>>,
        debounce: Option<&'a Setting<u64>>,
        retry: Option<&'a RetryConfig>,
        evaluation: Option<&'a EvaluationConfig>,
    ) {
        if priority.is_some() {
            self.priority = priority;
        }
        if debounce.is_some() {
            self.debounce = debounce;
        }
        if let Some(retry) = retry {
            if retry.max_attempts.is_some() {
                self.max_attempts = retry.max_attempts.as_ref();
            }
            if retry.delay.is_some() {
                self.delay = retry.delay.as_ref();
            }
        }
        if let Some(evaluation) = evaluation {
            for path in &evaluation.watch_properties {
                if !self.watch.contains(path) {
                    self.watch.push(path.clone());
                }
            }
            if evaluation.skip_if.is_some() {
                self.skip_if = evaluation.skip_if.as_ref();
            }
            if evaluation.strategy.is_some() {
                self.strategy = evaluation.strategy;
            }
        }
    }
}

/// Resolve the effective configuration of `from -> to` in `group`.
///
/// Returns `None` when the group does not exist or does not own the pair.
/// Without a context, any winning setting that is dynamic reads as unset.
pub fn resolve(
    registry: &GroupRegistry,
    group: &str,
    from: &str,
    to: &str,
    context: Option<&Context>,
) -> Option<EffectiveConfig> {
    let transition = registry.get(group)?.transition(from, to)?;

    let mut layers = Layered::default();
    for entry in registry.chain(group) {
        let config = &entry.config;
        layers.apply(
            config.priority.as_ref(),
            config.debounce.as_ref(),
            config.retry.as_ref(),
            config.evaluation.as_ref(),
        );
    }
    layers.apply(
        transition.priority.as_ref(),
        transition.debounce.as_ref(),
        transition.retry.as_ref(),
        transition.evaluation.as_ref(),
    );

    Some(EffectiveConfig {
        from: from.to_string(),
        to: to.to_string(),
        condition: transition.condition.clone(),
        priority: layers.priority.and_then(|s| s.resolve(context)),
        debounce: layers.debounce.and_then(|s| s.resolve(context)),
        retry: ResolvedRetry {
            max_attempts: layers.max_attempts.and_then(|s| s.resolve(context)),
            delay: layers.delay.and_then(|s| s.resolve(context)),
        },
        watch_properties: layers.watch,
        skip_if: layers.skip_if.cloned(),
        strategy: layers.strategy,
        tags: transition.tags.clone(),
    })
}
