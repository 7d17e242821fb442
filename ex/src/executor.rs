//! Executor - fire/kill pipeline with unbounded fan-out and a full drain
//!
//! An executor owns two pipelines that run independently:
//!
//! - dispatch: intake -> one spawned `action` task per item -> result queue
//! - consumption: result queue -> one spawned `handle` task per result
//!
//! [`Executor::fire`] feeds the intake; [`Executor::kill`] closes it and
//! waits, in order, for the dispatcher, every action, the result queue, the
//! consumer and every handle.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ExecutorError;
use crate::wait_group::WaitGroup;

/// Default capacity of the queue between the action and handle stages
pub const DEFAULT_RESULT_BUFFER: usize = 1024;

/// How `fire` hands items to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intake {
    /// `fire` returns only after the dispatcher has taken the item and
    /// spawned its action
    #[default]
    Rendezvous,

    /// `fire` returns once the item is queued; it only waits while the
    /// queue holds `n` unaccepted items
    Buffered(usize),
}

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Intake policy
    pub intake: Intake,

    /// Cap on concurrently running actions (and, separately, handles).
    /// `None` means unbounded fan-out.
    pub max_in_flight: Option<usize>,

    /// Capacity of the result queue
    pub result_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            intake: Intake::Rendezvous,
            max_in_flight: None,
            result_buffer: DEFAULT_RESULT_BUFFER,
        }
    }
}

impl ExecutorConfig {
    /// Reject values tokio would panic on or that could never make progress
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if let Intake::Buffered(0) = self.intake {
            return Err(ExecutorError::InvalidConfig(
                "buffered intake capacity must be > 0".to_string(),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(ExecutorError::InvalidConfig("max_in_flight must be > 0".to_string()));
        }
        if self.result_buffer == 0 {
            return Err(ExecutorError::InvalidConfig("result_buffer must be > 0".to_string()));
        }
        Ok(())
    }

    fn intake_capacity(&self) -> usize {
        match self.intake {
            Intake::Rendezvous => 1,
            Intake::Buffered(n) => n,
        }
    }
}

/// Lifecycle of an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Running,
    Draining,
    Terminated,
}

impl std::fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// What the drain observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items accepted by `fire`
    pub fired: u64,
    /// Action invocations that returned a result
    pub actioned: u64,
    /// Handle invocations that returned
    pub handled: u64,
    /// Action invocations that panicked
    pub actions_panicked: u64,
    /// Handle invocations that panicked
    pub handles_panicked: u64,
    /// Time spent inside the drain
    pub drain_time: Duration,
}

impl DrainReport {
    /// True when every fired item went through both stages
    pub fn is_clean(&self) -> bool {
        self.actions_panicked == 0
            && self.handles_panicked == 0
            && self.fired == self.actioned
            && self.actioned == self.handled
    }
}

#[derive(Debug, Default)]
struct Counters {
    fired: AtomicU64,
    actioned: AtomicU64,
    handled: AtomicU64,
}

/// An item on its way to the dispatcher
struct Submission<T> {
    item: T,
    accepted: Option<oneshot::Sender<()>>,
}

/// Everything `kill` needs to join; taken by the first caller
struct Drain<R> {
    dispatcher: JoinHandle<mpsc::Sender<R>>,
    consumer: JoinHandle<()>,
    actions: WaitGroup,
    handles: WaitGroup,
}

/// Concurrent fire/kill executor
///
/// `T` is the item type accepted by [`fire`](Self::fire), `R` the result
/// type produced by the action and consumed by the handle. Must be created
/// inside a tokio runtime.
pub struct Executor<T, R> {
    intake: Mutex<Option<mpsc::Sender<Submission<T>>>>,
    drain: Mutex<Option<Drain<R>>>,
    state: Arc<watch::Sender<ExecutorState>>,
    report: Arc<OnceLock<DrainReport>>,
    counters: Arc<Counters>,
    config: ExecutorConfig,
}

impl<T, R> Executor<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Start an executor with the default config (rendezvous intake,
    /// unbounded fan-out)
    pub fn new<A, AFut, H, HFut>(action: A, handle: H) -> Self
    where
        A: Fn(T) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = R> + Send + 'static,
        H: Fn(R) -> HFut + Send + Sync + 'static,
        HFut: Future<Output = ()> + Send + 'static,
    {
        Self::start(ExecutorConfig::default(), action, handle)
    }

    /// Start an executor with an explicit config
    pub fn with_config<A, AFut, H, HFut>(config: ExecutorConfig, action: A, handle: H) -> Result<Self, ExecutorError>
    where
        A: Fn(T) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = R> + Send + 'static,
        H: Fn(R) -> HFut + Send + Sync + 'static,
        HFut: Future<Output = ()> + Send + 'static,
    {
        config.validate()?;
        Ok(Self::start(config, action, handle))
    }

    fn start<A, AFut, H, HFut>(config: ExecutorConfig, action: A, handle: H) -> Self
    where
        A: Fn(T) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = R> + Send + 'static,
        H: Fn(R) -> HFut + Send + Sync + 'static,
        HFut: Future<Output = ()> + Send + 'static,
    {
        debug!(?config, "Executor::start: called");
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity());
        let (result_tx, result_rx) = mpsc::channel(config.result_buffer);

        let counters = Arc::new(Counters::default());
        let actions = WaitGroup::new();
        let handles = WaitGroup::new();
        let limit = config.max_in_flight;

        let dispatcher = tokio::spawn(dispatch(
            intake_rx,
            result_tx,
            Arc::new(action),
            actions.clone(),
            limit.map(|n| Arc::new(Semaphore::new(n))),
            Arc::clone(&counters),
        ));
        let consumer = tokio::spawn(consume(
            result_rx,
            Arc::new(handle),
            handles.clone(),
            limit.map(|n| Arc::new(Semaphore::new(n))),
            Arc::clone(&counters),
        ));

        let (state, _) = watch::channel(ExecutorState::Running);

        Self {
            intake: Mutex::new(Some(intake_tx)),
            drain: Mutex::new(Some(Drain {
                dispatcher,
                consumer,
                actions,
                handles,
            })),
            state: Arc::new(state),
            report: Arc::new(OnceLock::new()),
            counters,
            config,
        }
    }

    /// Hand an item to the dispatch pipeline
    ///
    /// With [`Intake::Rendezvous`] this waits until the dispatcher has spawned
    /// the item's action. Returns [`ExecutorError::Closed`] once `kill` has
    /// begun; the item is dropped in that case.
    pub async fn fire(&self, item: T) -> Result<(), ExecutorError> {
        let tx = self
            .intake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ExecutorError::Closed)?;

        match self.config.intake {
            Intake::Rendezvous => {
                let (accepted_tx, accepted_rx) = oneshot::channel();
                tx.send(Submission {
                    item,
                    accepted: Some(accepted_tx),
                })
                .await
                .map_err(|_| ExecutorError::Closed)?;
                drop(tx);
                accepted_rx.await.map_err(|_| ExecutorError::Closed)
            }
            Intake::Buffered(_) => tx
                .send(Submission { item, accepted: None })
                .await
                .map_err(|_| ExecutorError::Closed),
        }
    }

    /// Close intake and drain both pipelines
    ///
    /// Returns only after every item accepted before the call has been
    /// through its action and its handle. Safe to call more than once and
    /// from several tasks: later callers wait for the first drain to finish
    /// and get the same report. The drain runs in its own task, so dropping
    /// a `kill` future part way does not stop it.
    pub async fn kill(&self) -> DrainReport {
        let drain = self.drain.lock().unwrap_or_else(PoisonError::into_inner).take();
        match drain {
            Some(drain) => {
                info!(fired = self.counters.fired.load(Ordering::Acquire), "Executor::kill: draining");

                // (a) close intake
                self.state.send_replace(ExecutorState::Draining);
                drop(self.intake.lock().unwrap_or_else(PoisonError::into_inner).take());

                tokio::spawn(run_drain(
                    drain,
                    Arc::clone(&self.state),
                    Arc::clone(&self.report),
                    Arc::clone(&self.counters),
                ));
            }
            None => debug!("Executor::kill: drain already in progress, waiting"),
        }
        self.wait_terminated().await
    }

    async fn wait_terminated(&self) -> DrainReport {
        let mut rx = self.state.subscribe();
        // The sender lives in self, so this cannot fail while we borrow it.
        let _ = rx.wait_for(|state| *state == ExecutorState::Terminated).await;
        self.report.get().cloned().unwrap_or_default()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    /// Items accepted so far
    pub fn fired(&self) -> u64 {
        self.counters.fired.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

/// Steps (b) to (f) of `kill`; publishes the report, then `Terminated`
async fn run_drain<R>(
    drain: Drain<R>,
    state: Arc<watch::Sender<ExecutorState>>,
    report: Arc<OnceLock<DrainReport>>,
    counters: Arc<Counters>,
) where
    R: Send + 'static,
{
    let started = Instant::now();

    // (b) dispatcher has seen the close and spawned everything it accepted
    let results = match drain.dispatcher.await {
        Ok(results) => Some(results),
        Err(e) => {
            error!(error = %e, "run_drain: dispatcher task failed");
            None
        }
    };
    debug!("run_drain: dispatcher stopped");

    // (c) every action has finished
    drain.actions.wait().await;
    debug!("run_drain: actions drained");

    // (d) close the result queue
    drop(results);

    // (e) consumer has seen the close
    if let Err(e) = drain.consumer.await {
        error!(error = %e, "run_drain: consumer task failed");
    }
    debug!("run_drain: consumer stopped");

    // (f) every handle has finished
    drain.handles.wait().await;

    let drained = DrainReport {
        fired: counters.fired.load(Ordering::Acquire),
        actioned: counters.actioned.load(Ordering::Acquire),
        handled: counters.handled.load(Ordering::Acquire),
        actions_panicked: drain.actions.panicked() as u64,
        handles_panicked: drain.handles.panicked() as u64,
        drain_time: started.elapsed(),
    };
    if drained.actions_panicked > 0 || drained.handles_panicked > 0 {
        error!(
            actions_panicked = drained.actions_panicked,
            handles_panicked = drained.handles_panicked,
            "run_drain: invocations panicked"
        );
    }
    info!(report = ?drained, "Executor::kill: terminated");

    let _ = report.set(drained);
    state.send_replace(ExecutorState::Terminated);
}

async fn acquire(limit: &Option<Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match limit {
        // The semaphore is never closed, so acquire only fails if it is.
        Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
        None => None,
    }
}

async fn dispatch<T, R, A, AFut>(
    mut intake: mpsc::Receiver<Submission<T>>,
    results: mpsc::Sender<R>,
    action: Arc<A>,
    actions: WaitGroup,
    limit: Option<Arc<Semaphore>>,
    counters: Arc<Counters>,
) -> mpsc::Sender<R>
where
    T: Send + 'static,
    R: Send + 'static,
    A: Fn(T) -> AFut + Send + Sync + 'static,
    AFut: Future<Output = R> + Send + 'static,
{
    debug!("dispatch: started");
    while let Some(Submission { item, accepted }) = intake.recv().await {
        let permit = acquire(&limit).await;
        let guard = actions.add();
        counters.fired.fetch_add(1, Ordering::AcqRel);

        let action = Arc::clone(&action);
        let tx = results.clone();
        let counters = Arc::clone(&counters);
        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            let result = action(item).await;
            counters.actioned.fetch_add(1, Ordering::AcqRel);
            if tx.send(result).await.is_err() {
                warn!("dispatch: result queue closed, result dropped");
            }
            drop(tx);
        });

        if let Some(accepted) = accepted {
            // The caller may have given up waiting; the item still runs.
            let _ = accepted.send(());
        }
    }
    debug!("dispatch: intake closed");
    results
}

async fn consume<R, H, HFut>(
    mut results: mpsc::Receiver<R>,
    handle: Arc<H>,
    handles: WaitGroup,
    limit: Option<Arc<Semaphore>>,
    counters: Arc<Counters>,
) where
    R: Send + 'static,
    H: Fn(R) -> HFut + Send + Sync + 'static,
    HFut: Future<Output = ()> + Send + 'static,
{
    debug!("consume: started");
    while let Some(result) = results.recv().await {
        let permit = acquire(&limit).await;
        let guard = handles.add();
        let handle = Arc::clone(&handle);
        let counters = Arc::clone(&counters);
        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            handle(result).await;
            counters.handled.fetch_add(1, Ordering::AcqRel);
        });
    }
    debug!("consume: result queue closed");
}
