//! Timing of automatic condition checks.
//!
//! The scheduler owns three kinds of pending work:
//!
//! - **debounce timers**, one per transition, restarted by every relevant change
//!   so only the trailing edge fires;
//! - the **next-tick lane**, drained in FIFO order once the current task yields;
//! - the **idle lane**, drained only when the next-tick lane is empty.
//!
//! Dispatches that have already started register an [`InFlight`] ticket.
//! Cancelling them cannot interrupt user code, but flags the ticket so the
//! dispatch stops before attempting the transition.
//!
//! Every piece of pending work is keyed by [`TransitionKey`], so removing a
//! state, a transition, or a group can cancel exactly the work that refers to it.

use crate::group::EvaluationStrategy;
use crate::machine::ConfigError;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Identifies the transition a piece of pending work belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionKey {
    /// Full name of the owning group
    pub group: String,
    pub from: String,
    pub to: String,
}

impl TransitionKey {
    pub fn new(group: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn touches_state(&self, state: &str) -> bool {
        self.from == state || self.to == state
    }
}

impl fmt::Display for TransitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.group, self.from, self.to)
    }
}

/// Deferred lane for work that does not run in the current turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lane {
    NextTick,
    Idle,
}

impl Lane {
    /// The lane for a strategy, or `None` for immediate work.
    pub fn for_strategy(strategy: EvaluationStrategy) -> Option<Lane> {
        match strategy {
            EvaluationStrategy::Immediate => None,
            EvaluationStrategy::NextTick => Some(Lane::NextTick),
            EvaluationStrategy::Idle => Some(Lane::Idle),
        }
    }
}

struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Lanes {
    timers: HashMap<TransitionKey, Timer>,
    next_tick: VecDeque<(TransitionKey, Job)>,
    idle: VecDeque<(TransitionKey, Job)>,
    running: HashMap<u64, (TransitionKey, Arc<AtomicBool>)>,
    pump: Option<JoinHandle<()>>,
    generation: u64,
}

impl Lanes {
    fn pop(&mut self) -> Option<(TransitionKey, Job)> {
        if let Some(item) = self.next_tick.pop_front() {
            return Some(item);
        }
        self.idle.pop_front()
    }
}

fn lock(shared: &Mutex<Lanes>) -> MutexGuard<'_, Lanes> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of a dispatch that is already running.
///
/// Unregisters itself when dropped.
pub struct InFlight {
    shared: Arc<Mutex<Lanes>>,
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl InFlight {
    /// Whether matching work was cancelled since the ticket was issued.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.shared).running.remove(&self.id);
    }
}

/// Debounce timers and deferred lanes for one machine.
///
/// Dropping the scheduler cancels all of its pending work.
#[derive(Default)]
pub struct EvaluationScheduler {
    shared: Arc<Mutex<Lanes>>,
}

impl fmt::Debug for EvaluationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lanes = lock(&self.shared);
        f.debug_struct("EvaluationScheduler")
            .field("timers", &lanes.timers.len())
            .field("next_tick", &lanes.next_tick.len())
            .field("idle", &lanes.idle.len())
            .finish()
    }
}

impl EvaluationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start, or restart, the trailing-edge timer for `key`.
    ///
    /// When the timer elapses the job runs in `strategy`'s lane. A newer call
    /// for the same key replaces the pending job.
    pub fn debounce(
        &self,
        key: TransitionKey,
        delay: Duration,
        strategy: EvaluationStrategy,
        job: Job,
    ) -> Result<(), ConfigError> {
        let runtime = Handle::try_current()
            .map_err(|_| ConfigError::NoRuntime(format!("debounce of {key}")))?;

        let mut lanes = lock(&self.shared);
        lanes.generation += 1;
        let generation = lanes.generation;
        if let Some(previous) = lanes.timers.remove(&key) {
            previous.task.abort();
            trace!(key = %key, "debounce restarted");
        }

        let shared = Arc::clone(&self.shared);
        let timer_key = key.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut lanes = lock(&shared);
                match lanes.timers.get(&timer_key) {
                    Some(timer) if timer.generation == generation => {
                        lanes.timers.remove(&timer_key);
                        true
                    }
                    _ => false,
                }
            };
            if !current {
                return;
            }
            debug!(key = %timer_key, "debounce elapsed");
            match Lane::for_strategy(strategy) {
                None => job().await,
                Some(lane) => push(&shared, lane, timer_key, job),
            }
        });
        lanes.timers.insert(key, Timer { generation, task });
        Ok(())
    }

    /// Queue a job in a deferred lane.
    pub fn enqueue(&self, lane: Lane, key: TransitionKey, job: Job) -> Result<(), ConfigError> {
        Handle::try_current().map_err(|_| ConfigError::NoRuntime(format!("{lane:?} lane for {key}")))?;
        push(&self.shared, lane, key, job);
        Ok(())
    }

    /// Register a dispatch for `key` that is about to run.
    pub fn begin(&self, key: TransitionKey) -> InFlight {
        let mut lanes = lock(&self.shared);
        lanes.generation += 1;
        let id = lanes.generation;
        let cancelled = Arc::new(AtomicBool::new(false));
        lanes.running.insert(id, (key, Arc::clone(&cancelled)));
        InFlight {
            shared: Arc::clone(&self.shared),
            id,
            cancelled,
        }
    }

    /// Cancel every timer, queued job, and running dispatch whose key
    /// matches. Returns how many were cancelled.
    pub fn cancel_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&TransitionKey) -> bool,
    {
        let mut lanes = lock(&self.shared);
        let before = lanes.timers.len() + lanes.next_tick.len() + lanes.idle.len();
        lanes.timers.retain(|key, timer| {
            if predicate(key) {
                timer.task.abort();
                false
            } else {
                true
            }
        });
        lanes.next_tick.retain(|(key, _)| !predicate(key));
        lanes.idle.retain(|(key, _)| !predicate(key));
        let after = lanes.timers.len() + lanes.next_tick.len() + lanes.idle.len();
        let mut cancelled = before - after;
        lanes.running.retain(|_, (key, flag)| {
            if predicate(key) {
                flag.store(true, Ordering::SeqCst);
                cancelled += 1;
                false
            } else {
                true
            }
        });
        if cancelled > 0 {
            debug!(cancelled, "pending evaluations cancelled");
        }
        cancelled
    }

    /// Cancel everything, including a running lane pump.
    pub fn cancel_all(&self) {
        let mut lanes = lock(&self.shared);
        for (_, timer) in lanes.timers.drain() {
            timer.task.abort();
        }
        lanes.next_tick.clear();
        lanes.idle.clear();
        for (_, (_, flag)) in lanes.running.drain() {
            flag.store(true, Ordering::SeqCst);
        }
        if let Some(pump) = lanes.pump.take() {
            pump.abort();
        }
    }

    pub fn pending_timers(&self) -> usize {
        lock(&self.shared).timers.len()
    }

    pub fn queued(&self) -> usize {
        let lanes = lock(&self.shared);
        lanes.next_tick.len() + lanes.idle.len()
    }

    /// Dispatches currently past their scheduling stage.
    pub fn running(&self) -> usize {
        lock(&self.shared).running.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_timers() == 0 && self.queued() == 0
    }
}

impl Drop for EvaluationScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Queue a job and make sure a pump is draining the lanes.
///
/// Must be called from within a tokio runtime.
fn push(shared: &Arc<Mutex<Lanes>>, lane: Lane, key: TransitionKey, job: Job) {
    let mut lanes = lock(shared);
    trace!(key = %key, lane = ?lane, "evaluation queued");
    match lane {
        Lane::NextTick => lanes.next_tick.push_back((key, job)),
        Lane::Idle => lanes.idle.push_back((key, job)),
    }
    if lanes.pump.is_none() {
        let pump = tokio::spawn(drain(Arc::clone(shared)));
        lanes.pump = Some(pump);
    }
}

/// Run queued jobs one at a time, yielding before each so the task that queued
/// them finishes its turn first. Next-tick work always goes before idle work.
async fn drain(shared: Arc<Mutex<Lanes>>) {
    loop {
        tokio::task::yield_now().await;
        let next = {
            let mut lanes = lock(&shared);
            match lanes.pop() {
                Some(item) => item,
                None => {
                    lanes.pump = None;
                    return;
                }
            }
        };
        let (key, job) = next;
        trace!(key = %key, "running queued evaluation");
        job().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn recording_job(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Job {
        let log = Arc::clone(log);
        let label = label.to_string();
        Box::new(move || {
            async move {
                log.lock().unwrap().push(label);
            }
            .boxed()
        })
    }

    fn key(to: &str) -> TransitionKey {
        TransitionKey::new("g", "a", to)
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_fires_only_the_trailing_edge() {
        let scheduler = EvaluationScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            scheduler
                .debounce(
                    key("b"),
                    Duration::from_millis(100),
                    EvaluationStrategy::Immediate,
                    recording_job(&log, label),
                )
                .unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*log.lock().unwrap(), vec!["third"]);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_debounce_independently() {
        let scheduler = EvaluationScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for to in ["b", "c"] {
            scheduler
                .debounce(
                    key(to),
                    Duration::from_millis(10),
                    EvaluationStrategy::Immediate,
                    recording_job(&log, to),
                )
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut seen = log.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let scheduler = EvaluationScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler
            .debounce(
                key("b"),
                Duration::from_millis(10),
                EvaluationStrategy::Immediate,
                recording_job(&log, "b"),
            )
            .unwrap();

        assert_eq!(scheduler.cancel_where(|k| k.touches_state("b")), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn next_tick_runs_before_idle_in_fifo_order() {
        let scheduler = EvaluationScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue(Lane::Idle, key("i1"), recording_job(&log, "i1")).unwrap();
        scheduler.enqueue(Lane::NextTick, key("n1"), recording_job(&log, "n1")).unwrap();
        scheduler.enqueue(Lane::NextTick, key("n2"), recording_job(&log, "n2")).unwrap();
        assert!(log.lock().unwrap().is_empty());

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*log.lock().unwrap(), vec!["n1", "n2", "i1"]);
        assert!(scheduler.is_idle());
    }

    #[tokio::test]
    async fn cancel_where_drops_queued_jobs() {
        let scheduler = EvaluationScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.enqueue(Lane::NextTick, key("b"), recording_job(&log, "b")).unwrap();
        scheduler.enqueue(Lane::Idle, key("c"), recording_job(&log, "c")).unwrap();

        assert_eq!(scheduler.cancel_where(|k| k.to == "b"), 1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*log.lock().unwrap(), vec!["c"]);
    }

    #[test]
    fn cancelling_flags_running_dispatches() {
        let scheduler = EvaluationScheduler::new();
        let target_b = scheduler.begin(key("b"));
        let target_c = scheduler.begin(key("c"));
        assert_eq!(scheduler.running(), 2);

        assert_eq!(scheduler.cancel_where(|k| k.touches_state("b")), 1);

        assert!(target_b.is_cancelled());
        assert!(!target_c.is_cancelled());
        assert_eq!(scheduler.running(), 1);
        drop(target_c);
        assert_eq!(scheduler.running(), 0);
    }

    #[test]
    fn cancel_all_flags_every_running_dispatch() {
        let scheduler = EvaluationScheduler::new();
        let ticket = scheduler.begin(key("b"));

        scheduler.cancel_all();

        assert!(ticket.is_cancelled());
        assert_eq!(scheduler.running(), 0);
    }

    #[test]
    fn scheduling_outside_a_runtime_is_an_error() {
        let scheduler = EvaluationScheduler::new();
        let job: Job = Box::new(|| async {}.boxed());
        let err = scheduler
            .debounce(key("b"), Duration::from_millis(1), EvaluationStrategy::Immediate, job)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoRuntime(_)));
    }
}
