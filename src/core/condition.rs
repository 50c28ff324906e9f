//! Conditions guarding automatic transitions.
//!
//! A condition is a predicate over the current state name and the transition
//! context. It may answer synchronously or asynchronously; the scheduler awaits
//! either kind the same way.

use super::context::Context;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type SyncPredicate = Arc<dyn Fn(&str, &Context) -> bool + Send + Sync>;
type AsyncPredicate = Arc<dyn Fn(String, Context) -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Clone)]
enum Predicate {
    Sync(SyncPredicate),
    Async(AsyncPredicate),
}

/// Predicate that decides whether an automatic transition should fire.
///
/// # Example
///
/// ```rust
/// use statecraft::core::Condition;
/// use serde_json::json;
///
/// let ready = Condition::new(|_state, ctx| ctx["ready"] == json!(true));
///
/// # futures::executor::block_on(async {
/// assert!(ready.check("idle", &json!({ "ready": true })).await);
/// assert!(!ready.check("idle", &json!({ "ready": false })).await);
/// # });
/// ```
#[derive(Clone)]
pub struct Condition {
    predicate: Predicate,
}

impl Condition {
    /// Create a condition from a synchronous predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str, &Context) -> bool + Send + Sync + 'static,
    {
        Condition {
            predicate: Predicate::Sync(Arc::new(predicate)),
        }
    }

    /// Create a condition whose answer is awaited.
    ///
    /// The predicate receives owned copies of the state name and context so
    /// the returned future can outlive the call.
    pub fn new_async<F, Fut>(predicate: F) -> Self
    where
        F: Fn(String, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Condition {
            predicate: Predicate::Async(Arc::new(move |state, ctx| predicate(state, ctx).boxed())),
        }
    }

    /// A condition that always holds.
    pub fn always() -> Self {
        Condition::new(|_, _| true)
    }

    /// Evaluate the condition.
    pub async fn check(&self, state: &str, context: &Context) -> bool {
        match &self.predicate {
            Predicate::Sync(f) => f(state, context),
            Predicate::Async(f) => f(state.to_string(), context.clone()).await,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self.predicate, Predicate::Async(_))
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::always()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.predicate {
            Predicate::Sync(_) => f.write_str("Condition(sync)"),
            Predicate::Async(_) => f.write_str("Condition(async)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sync_condition_reads_context() {
        let cond = Condition::new(|_, ctx| ctx["count"].as_i64().unwrap_or(0) > 2);

        assert!(!cond.check("s", &json!({ "count": 1 })).await);
        assert!(cond.check("s", &json!({ "count": 3 })).await);
        assert!(!cond.is_async());
    }

    #[tokio::test]
    async fn condition_sees_state_name() {
        let cond = Condition::new(|state, _| state == "loading");

        assert!(cond.check("loading", &json!({})).await);
        assert!(!cond.check("idle", &json!({})).await);
    }

    #[tokio::test]
    async fn async_condition_is_awaited() {
        let cond = Condition::new_async(|_state, ctx| async move {
            tokio::task::yield_now().await;
            ctx["ok"] == json!(true)
        });

        assert!(cond.is_async());
        assert!(cond.check("s", &json!({ "ok": true })).await);
        assert!(!cond.check("s", &json!({ "ok": false })).await);
    }

    #[tokio::test]
    async fn always_holds() {
        assert!(Condition::always().check("any", &json!(null)).await);
        assert!(Condition::default().check("any", &json!(null)).await);
    }
}
