//! Worker pool that checks a target list.
//!
//! N workers pull targets from one shared cursor until it runs dry or the
//! pool is stopped. Each finished check lands in exactly one of three
//! buckets (on, off, error) under a single lock, together with the checked
//! counter. A monitor task reports progress on a fixed interval and fires
//! the completion callback once every worker has exited.

use crate::checker::rate_limiter::RateLimiter;
use crate::checker::target_check::TargetCheck;
use crate::checker::traits::{CheckOutcome, NoopObserver, PoolObserver, Progress, SessionFactory};
use crate::config::CheckerSettings;
use crate::error::CheckError;
use crate::types::Target;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A target whose check ended in an error.
#[derive(Debug, Clone)]
pub struct FailedTarget {
    pub target: Target,
    pub error: Arc<CheckError>,
}

/// Result collections of a run.
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub on: Vec<Target>,
    pub off: Vec<Target>,
    pub errors: Vec<FailedTarget>,
    /// Targets that completed without being cancelled.
    pub checked: usize,
}

impl Buckets {
    fn record(&mut self, target: Target, outcome: CheckOutcome) {
        match outcome {
            CheckOutcome::On => self.on.push(target),
            CheckOutcome::Off => self.off.push(target),
            CheckOutcome::Error(error) => self.errors.push(FailedTarget { target, error }),
            CheckOutcome::Discarded => return,
        }
        self.checked += 1;
    }

    /// Entries across all three buckets.
    pub fn len(&self) -> usize {
        self.on.len() + self.off.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Cursor {
    next: usize,
    running: bool,
}

struct PoolInner {
    targets: Vec<Target>,
    workers: usize,
    settings: CheckerSettings,
    factory: Arc<dyn SessionFactory>,
    observer: Arc<dyn PoolObserver>,
    limiter: Option<RateLimiter>,
    cursor: Mutex<Cursor>,
    buckets: Mutex<Buckets>,
    workers_done: AtomicUsize,
    finished: Notify,
    cancel: CancellationToken,
}

impl PoolInner {
    /// The single critical section handing out targets.
    fn next_target(&self) -> Option<Target> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if !cursor.running || cursor.next >= self.targets.len() {
            return None;
        }
        let target = self.targets[cursor.next].clone();
        cursor.next += 1;
        Some(target)
    }

    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_complete(&self) -> bool {
        self.workers_done.load(Ordering::Acquire) == self.workers
    }

    fn progress(&self) -> Progress {
        Progress {
            checked: self.buckets().checked,
            total: self.targets.len(),
            workers_done: self.workers_done.load(Ordering::Acquire),
            workers: self.workers,
        }
    }
}

/// Checks a list of targets with a fixed number of concurrent workers.
pub struct CheckerPool {
    inner: Arc<PoolInner>,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CheckerPool {
    /// Create a pool. `settings.concurrency` is the worker count.
    pub fn new(targets: Vec<Target>, settings: CheckerSettings, factory: Arc<dyn SessionFactory>) -> Self {
        let workers = settings.concurrency.max(1);
        let limiter = RateLimiter::new(settings.rate_limit);
        Self {
            inner: Arc::new(PoolInner {
                targets,
                workers,
                settings,
                factory,
                observer: Arc::new(NoopObserver),
                limiter,
                cursor: Mutex::new(Cursor {
                    next: 0,
                    running: true,
                }),
                buckets: Mutex::new(Buckets::default()),
                workers_done: AtomicUsize::new(0),
                finished: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Receive progress and completion events. Must be set before
    /// [`CheckerPool::check`].
    pub fn with_observer(mut self, observer: Arc<dyn PoolObserver>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.observer = observer;
        }
        self
    }

    /// Start the workers and the monitor.
    ///
    /// With `blocking` the call returns once the run is complete; otherwise it
    /// returns immediately and [`CheckerPool::wait`] joins the run later.
    /// A pool runs once; later calls only wait when `blocking` is set.
    pub async fn check(&self, blocking: bool) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("checker pool already started");
            if blocking {
                self.wait().await;
            }
            return;
        }

        info!(
            targets = self.inner.targets.len(),
            workers = self.inner.workers,
            "starting check run"
        );

        let mut handles: Vec<JoinHandle<()>> = (0..self.inner.workers)
            .map(|id| tokio::spawn(worker(self.inner.clone(), id)))
            .collect();
        handles.push(tokio::spawn(monitor(self.inner.clone())));
        *self.handles.lock().unwrap_or_else(PoisonError::into_inner) = handles;

        if blocking {
            self.wait().await;
        }
    }

    /// Wait for a started run to complete and its completion callback to
    /// return. Returns at once if the run was never started.
    pub async fn wait(&self) {
        if !self.started.load(Ordering::Acquire) {
            debug!("wait called before check, nothing to wait for");
            return;
        }
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "checker task failed");
            }
        }
        // Another caller may hold the handles.
        loop {
            let finished = self.inner.finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();
            if self.inner.is_complete() {
                break;
            }
            finished.await;
        }
    }

    /// Stop handing out targets and cancel every in-flight check.
    pub fn stop(&self) {
        self.inner
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running = false;
        self.inner.cancel.cancel();
        info!("check run stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            && !self.is_complete()
    }

    /// Whether every worker has exited.
    pub fn is_complete(&self) -> bool {
        self.inner.is_complete()
    }

    pub fn progress(&self) -> Progress {
        self.inner.progress()
    }

    pub fn total(&self) -> usize {
        self.inner.targets.len()
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn checked_count(&self) -> usize {
        self.inner.buckets().checked
    }

    /// Targets whose credentials worked so far.
    pub fn on(&self) -> Vec<Target> {
        self.inner.buckets().on.clone()
    }

    /// Targets that refused their credentials so far.
    pub fn off(&self) -> Vec<Target> {
        self.inner.buckets().off.clone()
    }

    /// Targets that failed with an error so far.
    pub fn errors(&self) -> Vec<FailedTarget> {
        self.inner.buckets().errors.clone()
    }

    /// A consistent copy of all buckets.
    pub fn snapshot(&self) -> Buckets {
        self.inner.buckets().clone()
    }
}

impl Drop for CheckerPool {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn worker(inner: Arc<PoolInner>, id: usize) {
    trace!(worker = id, "worker started");
    while let Some(target) = inner.next_target() {
        if let Some(limiter) = &inner.limiter {
            tokio::select! {
                _ = limiter.wait() => {}
                _ = inner.cancel.cancelled() => break,
            }
        }

        let check = TargetCheck::new(target, inner.factory.clone())
            .with_timeouts(inner.settings.connect_timeout(), inner.settings.kex_timeout())
            .with_cancel(inner.cancel.child_token());
        check.run().await;

        match check.outcome() {
            Some(CheckOutcome::Discarded) | None => {
                debug!(target = %check.target().address(), "discarding cancelled check");
            }
            Some(outcome) => inner.buckets().record(check.target().clone(), outcome),
        }
    }

    let done = inner.workers_done.fetch_add(1, Ordering::AcqRel) + 1;
    trace!(worker = id, done, "worker finished");
    if done == inner.workers {
        inner.finished.notify_waiters();
    }
}

async fn monitor(inner: Arc<PoolInner>) {
    let period = inner.settings.poll_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let finished = inner.finished.notified();
        tokio::pin!(finished);
        finished.as_mut().enable();
        if inner.is_complete() {
            break;
        }
        inner.observer.on_progress(inner.progress());
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut finished => {}
        }
    }

    let progress = inner.progress();
    info!(%progress, "check run complete");
    inner.observer.on_complete(progress);
}
