//! Single-flight scheduler for the reconcile loop.
//!
//! Triggers are reduced to a key and coalesced in a pending set; at most one cycle runs at a
//! time. After a cycle the outcome decides what happens next:
//!
//! | Outcome | Next run |
//! |---|---|
//! | converged | after the resync period |
//! | no requeue | on the next trigger only |
//! | conflict | immediately |
//! | failure, timeout, panic | after exponential backoff |
//!
//! A panicking cycle is contained in its task and reported through [`Reconciler::on_panic`].

#![forbid(unsafe_code)]

pub mod backoff;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{error::Elapsed, Instant};
use tracing::{debug, error, info, warn};

use netop_core::names::OPERATOR_CONFIG;
use netop_core::{ReconcileKey, StatusKey, TriggerEvent};
use netop_reconcile::{reconcile_key, Engine, Outcome, ReconcileError};

pub use backoff::Backoff;

/// What the scheduler drives: the engine in production.
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync + 'static {
    async fn reconcile(&self, key: &ReconcileKey) -> Result<Outcome, ReconcileError>;

    /// Report a cycle that panicked.
    async fn on_panic(&self, key: &ReconcileKey, message: &str);
}

#[async_trait::async_trait]
impl Reconciler for Engine {
    async fn reconcile(&self, key: &ReconcileKey) -> Result<Outcome, ReconcileError> {
        Engine::reconcile(self, key).await
    }

    async fn on_panic(&self, key: &ReconcileKey, message: &str) {
        let status = self.status();
        status.set_degraded(StatusKey::OperatorConfig, "Panic", format!("Internal error while reconciling {key}: {message}"));
        if let Err(e) = status.publish().await {
            warn!(error = %e, "failed to publish status after panic");
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// The only key that ever runs.
    pub singleton: String,
    pub cycle_deadline: Duration,
    pub backoff: Backoff,
    /// Run a cycle at start-up without waiting for a trigger.
    pub initial_run: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { singleton: OPERATOR_CONFIG.to_string(), cycle_deadline: Duration::from_secs(600), backoff: Backoff::default(), initial_run: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleResult {
    Converged,
    NotRequeued,
    Conflict(String),
    Failed { reason: String, message: String },
    TimedOut,
    Panicked(String),
}

/// Summary of the most recent cycle, readable without touching the loop.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub last: Option<CycleResult>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Delay until the next scheduled run, if one is scheduled.
    pub next_run_in: Option<Duration>,
}

pub struct SchedulerHandle {
    report: Arc<ArcSwap<CycleReport>>,
    cycles_rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn current(&self) -> Arc<CycleReport> {
        self.report.load_full()
    }

    /// Ticks once per finished cycle.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.cycles_rx.clone()
    }

    /// Wait for the loop to stop. It stops once every trigger sender is gone and no cycle runs.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler loop aborted");
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

type CycleJoin = Result<Result<Result<Outcome, ReconcileError>, Elapsed>, JoinError>;

struct InFlight {
    key: ReconcileKey,
    handle: JoinHandle<Result<Result<Outcome, ReconcileError>, Elapsed>>,
}

async fn join_in_flight(slot: &mut Option<InFlight>) -> CycleJoin {
    match slot {
        Some(f) => (&mut f.handle).await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => payload.downcast_ref::<&str>().map(|s| s.to_string()).unwrap_or_else(|| "unknown panic".to_string()),
    }
}

struct Loop<R: Reconciler> {
    reconciler: Arc<R>,
    config: SchedulerConfig,
    pending: FxHashSet<ReconcileKey>,
    /// Key and instant of the next timed run (resync or backoff).
    due: Option<(ReconcileKey, Instant)>,
    failures: u32,
    cycles: u64,
    report: Arc<ArcSwap<CycleReport>>,
    cycles_tx: watch::Sender<u64>,
}

impl<R: Reconciler> Loop<R> {
    fn start(&self, key: ReconcileKey) -> InFlight {
        let reconciler = Arc::clone(&self.reconciler);
        let deadline = self.config.cycle_deadline;
        let run_key = key.clone();
        let handle = tokio::spawn(async move { tokio::time::timeout(deadline, reconciler.reconcile(&run_key)).await });
        InFlight { key, handle }
    }

    fn schedule(&mut self, key: ReconcileKey, after: Duration) {
        self.due = Some((key, Instant::now() + after));
    }

    async fn finish(&mut self, key: ReconcileKey, joined: CycleJoin) {
        self.cycles += 1;
        let result = match joined {
            Ok(Ok(Ok(Outcome::ResyncAfter(after)))) => {
                self.failures = 0;
                self.schedule(key, after);
                CycleResult::Converged
            }
            Ok(Ok(Ok(Outcome::NoRequeue))) => {
                self.failures = 0;
                if self.due.as_ref().is_some_and(|(k, _)| *k == key) {
                    self.due = None;
                }
                CycleResult::NotRequeued
            }
            Ok(Ok(Err(e))) if e.requeue_immediately() => {
                debug!(key = %key, error = %e, "requeueing immediately");
                self.pending.insert(key);
                CycleResult::Conflict(e.to_string())
            }
            Ok(Ok(Err(e))) => {
                self.backoff(key);
                CycleResult::Failed { reason: e.reason().unwrap_or_default().to_string(), message: e.to_string() }
            }
            Ok(Err(_)) => {
                warn!(key = %key, deadline = ?self.config.cycle_deadline, "reconcile cycle timed out");
                metrics::counter!("reconcile_timeouts_total", 1u64);
                self.backoff(key);
                CycleResult::TimedOut
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(key = %key, panic = %message, "reconcile cycle panicked");
                metrics::counter!("reconcile_panics_total", 1u64);
                self.reconciler.on_panic(&key, &message).await;
                self.backoff(key);
                CycleResult::Panicked(message)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "reconcile task cancelled");
                self.backoff(key);
                CycleResult::Failed { reason: "Cancelled".into(), message: e.to_string() }
            }
        };
        let next_run_in = if self.pending.is_empty() { self.due.as_ref().map(|(_, at)| at.saturating_duration_since(Instant::now())) } else { Some(Duration::ZERO) };
        self.report.store(Arc::new(CycleReport {
            cycles: self.cycles,
            consecutive_failures: self.failures,
            last: Some(result),
            finished_at: Some(Utc::now()),
            next_run_in,
        }));
        let _ = self.cycles_tx.send(self.cycles);
    }

    fn backoff(&mut self, key: ReconcileKey) {
        self.failures = self.failures.saturating_add(1);
        let delay = self.config.backoff.delay(self.failures);
        debug!(key = %key, failures = self.failures, ?delay, "backing off");
        self.schedule(key, delay);
    }

    async fn run(mut self, mut triggers: mpsc::Receiver<TriggerEvent>) {
        let mut in_flight: Option<InFlight> = None;
        let mut closed = false;
        if self.config.initial_run {
            self.pending.insert(ReconcileKey::new(self.config.singleton.clone()));
        }
        loop {
            if in_flight.is_none() {
                if let Some(key) = self.pending.iter().next().cloned() {
                    self.pending.remove(&key);
                    if self.due.as_ref().is_some_and(|(k, _)| *k == key) {
                        self.due = None;
                    }
                    in_flight = Some(self.start(key));
                } else if closed {
                    break;
                }
            }
            let due_at = self.due.as_ref().map_or_else(Instant::now, |(_, at)| *at);
            tokio::select! {
                ev = triggers.recv(), if !closed => match ev {
                    Some(ev) => match reconcile_key(&ev, &self.config.singleton) {
                        Some(key) if key.name() == self.config.singleton => {
                            self.pending.insert(key);
                        }
                        Some(key) => debug!(key = %key, "ignoring trigger for a foreign config"),
                        None => debug!(event = ?ev, "trigger filtered"),
                    },
                    None => {
                        debug!("trigger channel closed; stopping after the running cycle");
                        closed = true;
                    }
                },
                joined = join_in_flight(&mut in_flight) => {
                    let key = match in_flight.take() {
                        Some(f) => f.key,
                        None => continue,
                    };
                    self.finish(key, joined).await;
                }
                _ = tokio::time::sleep_until(due_at), if self.due.is_some() => {
                    if let Some((key, _)) = self.due.take() {
                        self.pending.insert(key);
                    }
                }
            }
        }
        info!(cycles = self.cycles, "scheduler stopped");
    }
}

/// Spawn the scheduler loop consuming `triggers`.
pub fn spawn<R: Reconciler>(reconciler: Arc<R>, config: SchedulerConfig, triggers: mpsc::Receiver<TriggerEvent>) -> SchedulerHandle {
    let report = Arc::new(ArcSwap::from_pointee(CycleReport::default()));
    let (cycles_tx, cycles_rx) = watch::channel(0u64);
    let state = Loop {
        reconciler,
        config,
        pending: FxHashSet::default(),
        due: None,
        failures: 0,
        cycles: 0,
        report: Arc::clone(&report),
        cycles_tx,
    };
    let task = tokio::spawn(state.run(triggers));
    SchedulerHandle { report, cycles_rx, task }
}
