//! Transition middleware.
//!
//! A middleware sees every attempt that reaches its stage and must explicitly
//! consume its [`Next`] token to let the attempt continue. Returning without
//! proceeding blocks the attempt; returning an error blocks it as well.

use crate::core::{CallbackFuture, CallbackResult, Context};
use futures::future::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What a middleware is told about the attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct MiddlewareArgs {
    pub from: String,
    pub to: String,
    pub context: Context,
}

/// Permission token for continuing past a middleware.
#[derive(Debug)]
pub struct Next {
    proceeded: Arc<AtomicBool>,
}

impl Next {
    fn new() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            Next {
                proceeded: Arc::clone(&flag),
            },
            flag,
        )
    }

    /// Allow the attempt to continue to the next stage.
    pub fn proceed(self) {
        self.proceeded.store(true, Ordering::SeqCst);
    }
}

type MiddlewareFn = Arc<dyn Fn(MiddlewareArgs, Next) -> CallbackFuture + Send + Sync>;

/// A registered middleware function.
///
/// # Example
///
/// ```rust
/// use statecraft::machine::Middleware;
///
/// // Only allow transitions into "admin" when the context says so.
/// let gate = Middleware::sync(|args, next| {
///     if args.to != "admin" || args.context["role"] == "admin" {
///         next.proceed();
///     }
///     Ok(())
/// });
/// # let _ = gate;
/// ```
#[derive(Clone)]
pub struct Middleware(MiddlewareFn);

impl Middleware {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(MiddlewareArgs, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        Middleware(Arc::new(move |args, next| f(args, next).boxed()))
    }

    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&MiddlewareArgs, Next) -> CallbackResult + Send + Sync + 'static,
    {
        Middleware(Arc::new(move |args, next| {
            let result = f(&args, next);
            futures::future::ready(result).boxed()
        }))
    }

    fn call(&self, args: MiddlewareArgs, next: Next) -> CallbackFuture {
        (self.0)(args, next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware(<fn>)")
    }
}

/// Result of running a middleware chain.
#[derive(Debug, PartialEq)]
pub(crate) enum ChainOutcome {
    Proceed,
    /// The middleware at `index` returned without proceeding.
    Blocked { index: usize },
    /// The middleware at `index` returned an error.
    Faulted { index: usize, error: String },
}

/// Run middlewares in order, stopping at the first that does not proceed.
pub(crate) async fn run_chain(chain: &[Middleware], args: &MiddlewareArgs) -> ChainOutcome {
    for (index, middleware) in chain.iter().enumerate() {
        let (next, flag) = Next::new();
        if let Err(error) = middleware.call(args.clone(), next).await {
            return ChainOutcome::Faulted {
                index,
                error: error.to_string(),
            };
        }
        if !flag.load(Ordering::SeqCst) {
            return ChainOutcome::Blocked { index };
        }
    }
    ChainOutcome::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CallbackError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn args() -> MiddlewareArgs {
        MiddlewareArgs {
            from: "a".into(),
            to: "b".into(),
            context: json!({}),
        }
    }

    fn passing() -> Middleware {
        Middleware::sync(|_, next| {
            next.proceed();
            Ok(())
        })
    }

    #[tokio::test]
    async fn empty_chain_proceeds() {
        assert_eq!(run_chain(&[], &args()).await, ChainOutcome::Proceed);
    }

    #[tokio::test]
    async fn all_passing_proceeds() {
        let chain = vec![passing(), passing()];
        assert_eq!(run_chain(&chain, &args()).await, ChainOutcome::Proceed);
    }

    #[tokio::test]
    async fn first_non_proceeding_middleware_blocks() {
        let spy_calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&spy_calls);
        let spy = Middleware::sync(move |_, next| {
            seen.fetch_add(1, Ordering::SeqCst);
            next.proceed();
            Ok(())
        });
        let blocker = Middleware::sync(|_, _next| Ok(()));

        let outcome = run_chain(&[passing(), blocker, spy], &args()).await;

        assert_eq!(outcome, ChainOutcome::Blocked { index: 1 });
        assert_eq!(spy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_is_a_fault_even_after_proceeding() {
        let faulty = Middleware::new(|_args, next| async move {
            next.proceed();
            Err::<(), CallbackError>("middleware exploded".into())
        });

        let outcome = run_chain(&[faulty], &args()).await;

        assert_eq!(
            outcome,
            ChainOutcome::Faulted {
                index: 0,
                error: "middleware exploded".into()
            }
        );
    }

    #[tokio::test]
    async fn async_middleware_is_awaited() {
        let slow = Middleware::new(|args, next| async move {
            tokio::task::yield_now().await;
            if args.to == "b" {
                next.proceed();
            }
            Ok::<(), CallbackError>(())
        });

        assert_eq!(run_chain(&[slow], &args()).await, ChainOutcome::Proceed);
    }
}
