//! End-to-end behaviour across builder, groups, evaluation, and snapshots.

use serde_json::json;
use statecraft::group::EvaluationConfig;
use statecraft::machine::Installable;
use statecraft::snapshot::ConditionMap;
use statecraft::{
    AutoTransitionConfig, Condition, DisableOptions, EnableOptions, GroupBuilder, GroupConfig,
    GroupSnapshot, Middleware, Plugin, StateMachine, StateMachineBuilder,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn paid() -> Condition {
    Condition::new(|_, ctx| ctx["balance"] == json!(0))
}

fn order_machine() -> StateMachine {
    StateMachineBuilder::new()
        .states(["pending", "paid", "shipped", "cancelled"])
        .transition("pending", "cancelled")
        .group(
            GroupBuilder::new("fulfilment")
                .namespace("orders")
                .config(GroupConfig::new().priority(1))
                .transition(
                    "pending",
                    "paid",
                    AutoTransitionConfig::new(paid())
                        .evaluation(EvaluationConfig::new().watch("balance")),
                )
                .child(GroupBuilder::new("shipping").transition(
                    "paid",
                    "shipped",
                    AutoTransitionConfig::new(Condition::new(|_, ctx| {
                        ctx["label"] == json!(true)
                    })),
                )),
        )
        .context(json!({"balance": 10}))
        .initial("pending")
        .build()
        .unwrap()
}

#[tokio::test]
async fn context_updates_walk_the_order_through_its_states() {
    let machine = order_machine();

    machine.update_context(json!({"note": "unrelated"})).await;
    assert_eq!(machine.current_state().as_deref(), Some("pending"));

    machine.update_context(json!({"balance": 0})).await;
    assert_eq!(machine.current_state().as_deref(), Some("paid"));

    machine.update_context(json!({"label": true})).await;
    assert_eq!(machine.current_state().as_deref(), Some("shipped"));

    assert_eq!(machine.path(), vec!["pending", "paid", "shipped"]);
    let groups: Vec<_> = machine
        .history()
        .into_iter()
        .map(|record| record.group_name)
        .collect();
    assert_eq!(
        groups,
        vec![
            Some("orders:fulfilment".to_string()),
            Some("orders:shipping".to_string())
        ]
    );
}

#[tokio::test]
async fn disabling_a_parent_silences_its_subtree() {
    let machine = order_machine();
    machine.set_current_state("paid").unwrap();
    let root = machine.group("orders:fulfilment").unwrap();
    let disabled = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&disabled);
    root.on_disable(move |event| seen.lock().unwrap().push(event.group.clone()))
        .unwrap();

    root.disable(DisableOptions::new().cascade()).unwrap();
    machine.update_context(json!({"label": true})).await;
    assert_eq!(machine.current_state().as_deref(), Some("paid"));
    assert_eq!(
        *disabled.lock().unwrap(),
        vec!["orders:fulfilment", "orders:shipping"]
    );

    root.enable(EnableOptions::new().cascade()).unwrap();
    machine.evaluate_auto_transitions().await;
    assert_eq!(machine.current_state().as_deref(), Some("shipped"));
}

#[tokio::test]
async fn snapshot_survives_json_into_a_fresh_machine() {
    let source = order_machine();
    let json = source
        .group("orders:fulfilment")
        .and_then(|g| g.snapshot())
        .unwrap()
        .to_json()
        .unwrap();

    let target = StateMachine::new();
    for state in ["pending", "paid"] {
        target.add_state(state).unwrap();
    }
    target.set_current_state("pending").unwrap();

    let snapshot = GroupSnapshot::from_json(&json).unwrap();
    let conditions = ConditionMap::new().with("orders:fulfilment", "pending", "paid", paid());
    let group = target.import_group(&snapshot, &conditions).unwrap();

    assert_eq!(group.full_name(), "orders:fulfilment");
    assert_eq!(
        group.effective_config("pending", "paid", None),
        source
            .group("orders:fulfilment")
            .unwrap()
            .effective_config("pending", "paid", None)
    );

    target.update_context(json!({"balance": 5})).await;
    assert_eq!(target.current_state().as_deref(), Some("pending"));
    target.update_context(json!({"balance": 0})).await;
    assert_eq!(target.current_state().as_deref(), Some("paid"));
}

struct AuditPlugin {
    log: Arc<Mutex<Vec<String>>>,
}

impl Installable for AuditPlugin {
    fn install(&self, machine: &StateMachine) {
        let log = Arc::clone(&self.log);
        machine.on_after_transition(move |from, to| {
            log.lock().unwrap().push(format!("{from}->{to}"));
        });
    }
}

#[tokio::test]
async fn plugins_observe_and_gate_manual_transitions() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let machine = StateMachineBuilder::new()
        .states(["pending", "paid", "cancelled"])
        .transition("pending", "cancelled")
        .transition("pending", "paid")
        .initial("pending")
        .plugin(Plugin::installable(AuditPlugin {
            log: Arc::clone(&log),
        }))
        .plugin(Plugin::middleware(Middleware::sync(|args, next| {
            if args.context["locked"] != json!(true) {
                next.proceed();
            }
            Ok(())
        })))
        .build()
        .unwrap();

    machine.update_context(json!({"locked": true})).await;
    assert!(!machine.transition("cancelled").await);

    machine.update_context(json!({"locked": false})).await;
    assert!(machine.transition("paid").await);

    assert_eq!(*log.lock().unwrap(), vec!["pending->paid"]);
    assert_eq!(machine.history().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn temporary_disable_expires_on_its_own() {
    let machine = order_machine();
    let root = machine.group("orders:fulfilment").unwrap();

    root.disable_temporarily(Duration::from_millis(500), DisableOptions::new())
        .unwrap();
    machine.update_context(json!({"balance": 0})).await;
    assert_eq!(machine.current_state().as_deref(), Some("pending"));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(root.is_enabled(None));

    machine.evaluate_auto_transitions().await;
    assert_eq!(machine.current_state().as_deref(), Some("paid"));
}
