use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use netop_core::{NodeChange, ReconcileKey, TriggerEvent};
use netop_reconcile::{Outcome, ReconcileError};
use netop_scheduler::{spawn, CycleResult, Reconciler, SchedulerConfig};

enum Step {
    Return(Result<Outcome, ReconcileError>),
    Slow(Duration, Outcome),
    Panic(&'static str),
}

#[derive(Default)]
struct Scripted {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: Mutex<Vec<Instant>>,
    panics: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(steps.into_iter().collect()), ..Default::default() })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Reconciler for Scripted {
    async fn reconcile(&self, key: &ReconcileKey) -> Result<Outcome, ReconcileError> {
        self.keys.lock().unwrap().push(key.name().to_string());
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(Instant::now());
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let step = self.script.lock().unwrap().pop_front();
        let out = match step {
            None => Ok(Outcome::NoRequeue),
            Some(Step::Return(r)) => r,
            Some(Step::Slow(d, o)) => {
                tokio::time::sleep(d).await;
                Ok(o)
            }
            Some(Step::Panic(msg)) => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("{msg}");
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        out
    }

    async fn on_panic(&self, _key: &ReconcileKey, message: &str) {
        self.panics.lock().unwrap().push(message.to_string());
    }
}

fn desired(name: &str) -> TriggerEvent {
    TriggerEvent::DesiredConfig { name: name.into(), spec_changed: true }
}

fn render_failure() -> ReconcileError {
    ReconcileError::Render("template missing".into())
}

#[tokio::test(start_paused = true)]
async fn triggers_during_a_cycle_coalesce_into_one_rerun() {
    let r = Scripted::new([Step::Slow(Duration::from_millis(50), Outcome::NoRequeue)]);
    let (tx, rx) = mpsc::channel(16);
    let handle = spawn(Arc::clone(&r), SchedulerConfig::default(), rx);

    for _ in 0..5 {
        tx.send(desired("cluster")).await.unwrap();
    }
    tx.send(TriggerEvent::Node { name: "worker-1".into(), change: NodeChange::LabelsChanged }).await.unwrap();
    drop(tx);
    handle.join().await;

    assert_eq!(r.calls(), 2, "initial run plus one coalesced rerun");
    assert_eq!(r.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn foreign_and_filtered_triggers_never_run() {
    let r = Scripted::new([]);
    let (tx, rx) = mpsc::channel(16);
    let config = SchedulerConfig { initial_run: false, ..Default::default() };
    let handle = spawn(Arc::clone(&r), config, rx);

    tx.send(desired("not-cluster")).await.unwrap();
    tx.send(TriggerEvent::DesiredConfig { name: "cluster".into(), spec_changed: false }).await.unwrap();
    tx.send(TriggerEvent::Node { name: "worker-1".into(), change: NodeChange::Updated }).await.unwrap();
    drop(tx);
    handle.join().await;

    assert_eq!(r.calls(), 0);
    assert!(r.keys.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn conflicts_retry_immediately_failures_back_off() {
    let r = Scripted::new([
        Step::Return(Err(ReconcileError::Conflict { stage: "applying objects", message: "modified".into() })),
        Step::Return(Err(render_failure())),
        Step::Return(Err(render_failure())),
        Step::Return(Ok(Outcome::NoRequeue)),
    ]);
    let (tx, rx) = mpsc::channel(16);
    let handle = spawn(Arc::clone(&r), SchedulerConfig::default(), rx);
    let mut ticks = handle.subscribe();
    while *ticks.borrow_and_update() < 4 {
        ticks.changed().await.unwrap();
    }
    let report = handle.current();
    assert_eq!(report.last, Some(CycleResult::NotRequeued));
    assert_eq!(report.consecutive_failures, 0);
    drop(tx);
    handle.join().await;

    let started = r.started.lock().unwrap().clone();
    assert_eq!(started.len(), 4);
    assert!(started[1] - started[0] < Duration::from_millis(1), "conflict requeues without delay");
    assert!(started[2] - started[1] >= Duration::from_millis(5));
    assert!(started[3] - started[2] >= Duration::from_millis(10), "second failure doubles the delay");
}

#[tokio::test(start_paused = true)]
async fn converged_cycles_resync_after_the_period() {
    let resync = Duration::from_secs(180);
    let r = Scripted::new([Step::Return(Ok(Outcome::ResyncAfter(resync))), Step::Return(Ok(Outcome::NoRequeue))]);
    let (tx, rx) = mpsc::channel(16);
    let handle = spawn(Arc::clone(&r), SchedulerConfig::default(), rx);
    let mut ticks = handle.subscribe();

    ticks.changed().await.unwrap();
    assert_eq!(handle.current().last, Some(CycleResult::Converged));
    assert_eq!(handle.current().next_run_in, Some(resync));
    while *ticks.borrow_and_update() < 2 {
        ticks.changed().await.unwrap();
    }
    let started = r.started.lock().unwrap().clone();
    assert!(started[1] - started[0] >= resync);
    drop(tx);
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn foreign_triggers_keep_the_singleton_resync() {
    let resync = Duration::from_secs(180);
    let r = Scripted::new([Step::Return(Ok(Outcome::ResyncAfter(resync))), Step::Return(Ok(Outcome::NoRequeue))]);
    let (tx, rx) = mpsc::channel(16);
    let handle = spawn(Arc::clone(&r), SchedulerConfig::default(), rx);
    let mut ticks = handle.subscribe();

    ticks.changed().await.unwrap();
    assert_eq!(handle.current().next_run_in, Some(resync));
    tx.send(desired("other")).await.unwrap();
    while *ticks.borrow_and_update() < 2 {
        ticks.changed().await.unwrap();
    }
    assert_eq!(*r.keys.lock().unwrap(), vec!["cluster".to_string(), "cluster".to_string()]);
    let started = r.started.lock().unwrap().clone();
    assert!(started[1] - started[0] >= resync, "second run is the resync, not the foreign trigger");
    drop(tx);
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn panics_are_contained_and_reported() {
    let r = Scripted::new([Step::Panic("index out of range"), Step::Return(Ok(Outcome::NoRequeue))]);
    let (tx, rx) = mpsc::channel(16);
    let handle = spawn(Arc::clone(&r), SchedulerConfig::default(), rx);
    let mut ticks = handle.subscribe();

    ticks.changed().await.unwrap();
    assert_eq!(handle.current().last, Some(CycleResult::Panicked("index out of range".into())));
    assert_eq!(handle.current().consecutive_failures, 1);
    while *ticks.borrow_and_update() < 2 {
        ticks.changed().await.unwrap();
    }
    assert_eq!(*r.panics.lock().unwrap(), vec!["index out of range".to_string()]);
    assert_eq!(r.calls(), 2, "the scheduler keeps running after a panic");
    drop(tx);
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn cycles_past_the_deadline_time_out() {
    let r = Scripted::new([Step::Slow(Duration::from_secs(30), Outcome::NoRequeue)]);
    let (tx, rx) = mpsc::channel(16);
    let config = SchedulerConfig { cycle_deadline: Duration::from_secs(1), ..Default::default() };
    let handle = spawn(Arc::clone(&r), config, rx);
    let mut ticks = handle.subscribe();

    ticks.changed().await.unwrap();
    assert_eq!(handle.current().last, Some(CycleResult::TimedOut));
    while *ticks.borrow_and_update() < 2 {
        ticks.changed().await.unwrap();
    }
    assert_eq!(handle.current().last, Some(CycleResult::NotRequeued));
    drop(tx);
    handle.join().await;
}
