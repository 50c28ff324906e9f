//! Automatic transitions driven by context changes.
//!
//! A context change produces one candidate per group transition leaving the
//! current state. Candidates are filtered by watch properties, `skip_if`, and
//! the group's enabled state, then handed to the scheduler or dispatched in
//! place. Dispatch re-checks everything, because by the time a deferred check
//! runs the machine may have moved on.

use super::machine::StateMachine;
use crate::core::{context, Context};
use crate::group::registry::GateView;
use crate::group::resolver::resolve;
use crate::group::EffectiveConfig;
use crate::scheduler::{Job, Lane, TransitionKey};
use futures::FutureExt;
use std::cmp::Reverse;
use std::time::Duration;
use tracing::{debug, trace, warn};

struct Candidate {
    key: TransitionKey,
    config: EffectiveConfig,
    gate: GateView,
}

impl StateMachine {
    /// Shallow-merge `patch` into the context and evaluate automatic
    /// transitions whose watched paths changed.
    pub async fn update_context(&self, patch: Context) {
        let (previous, next) = self.write(|core| {
            let previous = core.context.clone();
            context::merge(&mut core.context, patch);
            (previous, core.context.clone())
        });
        self.evaluate(&previous, &next, true).await;
    }

    /// Replace the context and evaluate automatic transitions whose watched
    /// paths changed.
    pub async fn set_context(&self, context: Context) {
        let (previous, next) = self.write(|core| {
            let previous = std::mem::replace(&mut core.context, context);
            (previous, core.context.clone())
        });
        self.evaluate(&previous, &next, true).await;
    }

    /// Evaluate every automatic transition leaving the current state, ignoring
    /// watch properties.
    pub async fn evaluate_auto_transitions(&self) {
        let current = self.context();
        self.evaluate(&current, &current, false).await;
    }

    async fn evaluate(&self, previous: &Context, next: &Context, changed_only: bool) {
        for candidate in self.candidates(next) {
            let Candidate { key, config, .. } = candidate;
            if changed_only && !context::watched_changed(previous, next, &config.watch_properties) {
                trace!(key = %key, "no watched property changed");
                continue;
            }
            if config.skip_if.as_ref().is_some_and(|skip| skip.check(next)) {
                debug!(key = %key, "evaluation skipped");
                continue;
            }

            let strategy = config.strategy.unwrap_or(self.config().default_strategy);
            let scheduled = match config.debounce.filter(|ms| *ms > 0) {
                Some(ms) => self.scheduler().debounce(
                    key.clone(),
                    Duration::from_millis(ms),
                    strategy,
                    self.dispatch_job(key.clone()),
                ),
                None => match Lane::for_strategy(strategy) {
                    Some(lane) => self
                        .scheduler()
                        .enqueue(lane, key.clone(), self.dispatch_job(key.clone())),
                    None => {
                        self.dispatch(&key).await;
                        Ok(())
                    }
                },
            };
            if let Err(error) = scheduled {
                warn!(key = %key, error = %error, "automatic transition not scheduled");
            }
        }
    }

    /// Enabled candidates leaving the current state, highest priority first.
    ///
    /// Equal priorities keep group creation order, then target order.
    fn candidates(&self, context: &Context) -> Vec<Candidate> {
        let mut candidates = self.read(|core| {
            let Some(current) = core.current.as_deref() else {
                return Vec::new();
            };
            let mut found = Vec::new();
            for group in core.groups.iter() {
                for (to, _) in group.transitions_from(current) {
                    let resolved = resolve(&core.groups, group.full_name(), current, to, Some(context));
                    if let Some(config) = resolved {
                        found.push(Candidate {
                            key: TransitionKey::new(group.full_name(), current, to.as_str()),
                            config,
                            gate: group.gate(),
                        });
                    }
                }
            }
            found
        });
        candidates.retain(|c| c.gate.is_enabled(Some(context)));
        candidates.sort_by_key(|c| Reverse(c.config.priority.unwrap_or(0)));
        candidates
    }

    fn dispatch_job(&self, key: TransitionKey) -> Job {
        let machine = self.downgrade();
        Box::new(move || {
            async move {
                if let Some(machine) = machine.upgrade() {
                    machine.dispatch(&key).await;
                }
            }
            .boxed()
        })
    }

    /// Check the condition for `key` and attempt the transition, retrying
    /// according to the resolved retry policy.
    ///
    /// Nothing happens unless the machine is still in the source state and the
    /// group still owns the transition and is enabled. Both are checked again
    /// after the condition resolves, and cancelling matching work through the
    /// scheduler stops the dispatch at that point.
    pub(crate) async fn dispatch(&self, key: &TransitionKey) -> bool {
        let ticket = self.scheduler().begin(key.clone());
        let mut attempt = 1;
        loop {
            let Some((config, context)) = self.dispatch_view(key) else {
                trace!(key = %key, "dispatch target no longer applies");
                return false;
            };
            if !config.condition.check(&key.from, &context).await {
                trace!(key = %key, "condition not met");
                return false;
            }
            if ticket.is_cancelled() || self.dispatch_view(key).is_none() {
                debug!(key = %key, "dispatch cancelled while the condition was pending");
                return false;
            }
            if self.transition(&key.to).await {
                return true;
            }

            let max_attempts = config.retry.max_attempts.unwrap_or(1).max(1);
            if attempt >= max_attempts {
                return false;
            }
            let delay = config.retry.delay.unwrap_or(0);
            debug!(key = %key, attempt, max_attempts, delay, "automatic transition failed, retrying");
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if ticket.is_cancelled() {
                return false;
            }
            attempt += 1;
        }
    }

    fn dispatch_view(&self, key: &TransitionKey) -> Option<(EffectiveConfig, Context)> {
        let (config, context, gate) = self.read(|core| {
            if core.current.as_deref() != Some(key.from.as_str()) {
                return None;
            }
            let gate = core.groups.get(&key.group)?.gate();
            let config = resolve(&core.groups, &key.group, &key.from, &key.to, Some(&core.context))?;
            Some((config, core.context.clone(), gate))
        })?;
        gate.is_enabled(Some(&context)).then_some((config, context))
    }
}
