//! Transition execution.
//!
//! Every attempt walks the same ordered pipeline. Each stage before the commit
//! may stop the attempt; stages after it can only report faults.
//!
//! | stage            | on refusal or error                     |
//! |------------------|-----------------------------------------|
//! | before observers | blocked                                 |
//! | group gate       | blocked                                 |
//! | validate         | failed observers run, blocked           |
//! | global middleware| blocked                                 |
//! | group middleware | blocked                                 |
//! | exit hooks       | blocked, state unchanged                |
//! | commit           |                                         |
//! | enter hooks      | fault logged                            |
//! | after observers  |                                         |
//! | do-handlers      | fault logged, run concurrently          |
//! | group handlers   |                                         |

use super::machine::{fire_all, StateMachine};
use super::middleware::{run_chain, ChainOutcome, Middleware, MiddlewareArgs};
use super::observer::Observers;
use super::telemetry::LogLevel;
use crate::core::{CallbackError, Context, HookArgs, TransitionRecord};
use crate::group::GroupEventKind;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Before,
    GroupGate,
    Validate,
    GlobalMiddleware,
    GroupMiddleware,
    Exit,
    Enter,
    Handlers,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Before => "before",
            Stage::GroupGate => "group gate",
            Stage::Validate => "validate",
            Stage::GlobalMiddleware => "global middleware",
            Stage::GroupMiddleware => "group middleware",
            Stage::Exit => "exit hook",
            Stage::Enter => "enter hook",
            Stage::Handlers => "state handler",
        };
        f.write_str(name)
    }
}

enum Outcome {
    Committed,
    Blocked { stage: Stage, reason: String },
}

impl Outcome {
    fn blocked(stage: Stage, reason: impl Into<String>) -> Self {
        Outcome::Blocked {
            stage,
            reason: reason.into(),
        }
    }
}

impl StateMachine {
    /// Attempt to move from the current state to `to`.
    ///
    /// Returns `true` only when the state was committed. Refusals and
    /// callback faults before the commit leave the machine where it was.
    pub async fn transition(&self, to: &str) -> bool {
        let started = Instant::now();
        let snapshot = self.read(|core| {
            core.current.clone().map(|current| {
                let owners = core.groups.owners(&current, to);
                (current, core.context.clone(), owners)
            })
        });
        let Some((from, context, owners)) = snapshot else {
            warn!(to = %to, "transition requested without a current state");
            return false;
        };

        let outcome = self.run_pipeline(&from, to, &context, &owners).await;
        let committed = matches!(outcome, Outcome::Committed);
        self.finish(&from, to, &context, owners.first().cloned(), &outcome, started);
        committed
    }

    async fn run_pipeline(&self, from: &str, to: &str, context: &Context, owners: &[String]) -> Outcome {
        let before = self.read(|core| core.observers.before.clone());
        if !Observers::approve(&before, from, to) {
            return Outcome::blocked(Stage::Before, "refused by an observer");
        }

        let gates = self.read(|core| {
            owners
                .iter()
                .filter_map(|name| core.groups.get(name).map(|g| (name.clone(), g.gate())))
                .collect::<Vec<_>>()
        });
        if let Some((name, _)) = gates.iter().find(|(_, gate)| !gate.allows_manual()) {
            return Outcome::blocked(Stage::GroupGate, format!("group '{name}' is disabled"));
        }

        if !self.read(|core| core.can(from, to)) {
            let failed = self.read(|core| core.observers.failed.clone());
            for observer in &failed {
                observer(from, to);
            }
            return Outcome::blocked(Stage::Validate, format!("'{to}' is not reachable from '{from}'"));
        }

        let args = MiddlewareArgs {
            from: from.to_string(),
            to: to.to_string(),
            context: context.clone(),
        };
        let global = self.read(|core| core.middleware.clone());
        if let Some(blocked) = self.check_chain(Stage::GlobalMiddleware, &global, &args).await {
            return blocked;
        }
        let scoped: Vec<Middleware> = self.read(|core| {
            owners
                .iter()
                .filter_map(|name| core.groups.get(name))
                .flat_map(|g| g.middleware.iter().cloned())
                .collect()
        });
        if let Some(blocked) = self.check_chain(Stage::GroupMiddleware, &scoped, &args).await {
            return blocked;
        }

        let hook_args = HookArgs {
            from: from.to_string(),
            to: to.to_string(),
            context: context.clone(),
        };
        let exit_hooks = self.read(|core| {
            core.states
                .get(from)
                .map(|s| s.exit_hooks().to_vec())
                .unwrap_or_default()
        });
        for hook in exit_hooks {
            if let Err(error) = hook.call(hook_args.clone()).await {
                self.report_fault(Stage::Exit, from, to, &error);
                return Outcome::blocked(Stage::Exit, error.to_string());
            }
        }

        self.write(|core| core.current = Some(to.to_string()));
        if from != to {
            self.scheduler().cancel_where(|key| key.from == from);
        }

        let (enter_hooks, handlers) = self.read(|core| {
            core.states
                .get(to)
                .map(|s| (s.enter_hooks().to_vec(), s.handlers().to_vec()))
                .unwrap_or_default()
        });
        for hook in enter_hooks {
            if let Err(error) = hook.call(hook_args.clone()).await {
                self.report_fault(Stage::Enter, from, to, &error);
            }
        }

        let after = self.read(|core| core.observers.after.clone());
        for observer in &after {
            observer(from, to);
        }

        let results = join_all(handlers.iter().map(|h| h.call(hook_args.clone()))).await;
        for error in results.into_iter().filter_map(Result::err) {
            self.report_fault(Stage::Handlers, from, to, &error);
        }

        let events: Vec<_> = self.write(|core| {
            owners
                .iter()
                .map(|name| {
                    core.groups.bubble(
                        name,
                        GroupEventKind::Transition {
                            from: from.to_string(),
                            to: to.to_string(),
                        },
                    )
                })
                .collect()
        });
        fire_all(events);

        Outcome::Committed
    }

    async fn check_chain(
        &self,
        stage: Stage,
        chain: &[Middleware],
        args: &MiddlewareArgs,
    ) -> Option<Outcome> {
        match run_chain(chain, args).await {
            ChainOutcome::Proceed => None,
            ChainOutcome::Blocked { index } => Some(Outcome::blocked(
                stage,
                format!("middleware #{index} did not proceed"),
            )),
            ChainOutcome::Faulted { index, error } => {
                self.telemetry().log(
                    LogLevel::Error,
                    &format!("{stage} #{index} failed: {error}"),
                    Some(&json!({ "from": args.from, "to": args.to })),
                );
                Some(Outcome::blocked(stage, error))
            }
        }
    }

    fn report_fault(&self, stage: Stage, from: &str, to: &str, error: &CallbackError) {
        self.telemetry().log(
            LogLevel::Error,
            &format!("{stage} failed during {from} -> {to}: {error}"),
            Some(&json!({ "from": from, "to": to, "stage": stage.to_string() })),
        );
    }

    fn finish(
        &self,
        from: &str,
        to: &str,
        context: &Context,
        group: Option<String>,
        outcome: &Outcome,
        started: Instant,
    ) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let success = matches!(outcome, Outcome::Committed);
        match outcome {
            Outcome::Committed => {
                info!(from = %from, to = %to, elapsed_ms, "transition committed");
            }
            Outcome::Blocked { stage, reason } => {
                debug!(from = %from, to = %to, stage = %stage, reason = %reason, "transition blocked");
            }
        }

        let mut record = TransitionRecord::new(from, to, success).with_group(group.clone());
        if self.config().record_context {
            record = record.with_context(context.clone());
        }

        let telemetry = self.telemetry();
        telemetry.record_attempt(&record);
        let mut tags = BTreeMap::new();
        tags.insert("success".to_string(), success.to_string());
        if let Some(group) = group {
            tags.insert("group".to_string(), group);
        }
        telemetry.record_metric("transition", &format!("{from}->{to}"), elapsed_ms, Some(&tags));

        if self.config().record_history {
            self.write(|core| core.history.record(record));
        }
    }
}
