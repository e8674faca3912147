//! Coalescing pipeline stages.
//!
//! A [`Stage`] runs one [`StageWork`] on a dedicated task. Queueing work
//! while a run is already pending is a no-op, so any number of triggers
//! between two runs collapse into a single run. A run repeats the work until
//! it reports completion or the stage is force-stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use inbox_core::defaults::STAGE_EVENT_CAPACITY;

/// Per-call context handed to [`StageWork`].
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Fires when the stage is force-stopped.
    pub cancel: CancellationToken,
    /// The previous call in the same run returned `false`.
    pub retry: bool,
    /// No run of this stage has completed yet.
    pub first_work: bool,
}

/// The unit of work a stage executes.
#[async_trait]
pub trait StageWork: Send + Sync {
    /// Called once before the stage starts waiting for work.
    async fn setup(&self, _ctx: &StageContext) {}

    /// Perform one pass. Returns `true` when done, `false` to be called
    /// again immediately (with `retry` set).
    async fn work(&self, ctx: &StageContext) -> bool;
}

/// Event emitted by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// Work was queued.
    Queued { stage: String },
    /// A run started.
    Started { stage: String },
    /// A run finished after `attempts` calls of the work.
    Finished { stage: String, attempts: u32 },
    /// The stage loop ended.
    Stopped { stage: String },
}

struct StageInner {
    name: String,
    /// A launch signal is in the channel and not yet picked up.
    pending: AtomicBool,
    launch_tx: Mutex<Option<mpsc::Sender<()>>>,
    launch_rx: Mutex<Option<mpsc::Receiver<()>>>,
    queued_at: Mutex<Option<Instant>>,
    working: AtomicBool,
    first_work: AtomicBool,
    waiters: Mutex<Vec<oneshot::Sender<()>>>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<StageEvent>,
}

/// Cloneable handle to a pipeline stage.
#[derive(Clone)]
pub struct Stage {
    inner: Arc<StageInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Stage {
    /// Create an idle stage.
    pub fn new(name: impl Into<String>) -> Self {
        let (launch_tx, launch_rx) = mpsc::channel(1);
        let (event_tx, _) = broadcast::channel(STAGE_EVENT_CAPACITY);
        Self {
            inner: Arc::new(StageInner {
                name: name.into(),
                pending: AtomicBool::new(false),
                launch_tx: Mutex::new(Some(launch_tx)),
                launch_rx: Mutex::new(Some(launch_rx)),
                queued_at: Mutex::new(None),
                working: AtomicBool::new(false),
                first_work: AtomicBool::new(true),
                waiters: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
                event_tx,
            }),
        }
    }

    /// Create a stage with one run already queued.
    pub fn queued(name: impl Into<String>) -> Self {
        let stage = Self::new(name);
        stage.queue_work();
        stage
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a run unless one is already pending.
    ///
    /// Returns whether a new run was queued. Does nothing once the stage
    /// has been stopped.
    pub fn queue_work(&self) -> bool {
        let inner = &self.inner;
        let guard = lock(&inner.launch_tx);
        let Some(tx) = guard.as_ref() else {
            debug!(stage = %inner.name, "Stage closed, not queueing");
            return false;
        };
        if inner
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *lock(&inner.queued_at) = Some(Instant::now());
        if tx.try_send(()).is_err() {
            inner.pending.store(false, Ordering::Release);
            warn!(stage = %inner.name, "Stage launch channel unavailable");
            return false;
        }
        info!(stage = %inner.name, "Queued pipeline stage");
        let _ = inner.event_tx.send(StageEvent::Queued {
            stage: inner.name.clone(),
        });
        true
    }

    /// Queue a run and wait until the stage has no pending work left.
    ///
    /// Resolves `true` once a run that started after this call has finished
    /// with nothing queued behind it, `false` if the stage stopped first.
    pub async fn queue_work_blocking(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = lock(&self.inner.waiters);
            if lock(&self.inner.launch_tx).is_none() {
                return false;
            }
            waiters.push(tx);
            self.queue_work();
        }
        rx.await.is_ok()
    }

    /// A run is in progress.
    pub fn is_working(&self) -> bool {
        self.inner.working.load(Ordering::Acquire)
    }

    /// No run has completed yet.
    pub fn is_first_work(&self) -> bool {
        self.inner.first_work.load(Ordering::Acquire)
    }

    /// Time since work was last queued; `Duration::MAX` if never queued.
    pub fn time_since_queued(&self) -> Duration {
        lock(&self.inner.queued_at)
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX)
    }

    /// Subscribe to stage events.
    pub fn events(&self) -> broadcast::Receiver<StageEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Cancellation token observed by the work.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Stop accepting work. A queued run still executes, then the loop ends.
    pub fn stop(&self) {
        if lock(&self.inner.launch_tx).take().is_some() {
            info!(stage = %self.inner.name, "Stopping pipeline stage");
        }
    }

    /// Stop accepting work and cancel the running work.
    pub fn force_stop(&self) {
        self.stop();
        self.inner.cancel.cancel();
    }

    /// Run the stage loop on a new task.
    pub fn spawn(&self, work: Arc<dyn StageWork>) -> JoinHandle<()> {
        let stage = self.clone();
        tokio::spawn(async move { stage.run(work).await })
    }

    /// Run setup, then execute queued runs until the stage is stopped.
    ///
    /// Only the first call runs; later calls return immediately.
    pub async fn run(&self, work: Arc<dyn StageWork>) {
        let inner = &self.inner;
        let Some(mut launch_rx) = lock(&inner.launch_rx).take() else {
            warn!(stage = %inner.name, "Pipeline stage is already running");
            return;
        };

        work.setup(&self.context(false)).await;

        while launch_rx.recv().await.is_some() {
            inner.pending.store(false, Ordering::Release);
            if inner.cancel.is_cancelled() {
                continue;
            }
            info!(stage = %inner.name, "Executing pipeline stage");
            inner.working.store(true, Ordering::Release);
            let _ = inner.event_tx.send(StageEvent::Started {
                stage: inner.name.clone(),
            });

            let started = Instant::now();
            let mut attempts = 0u32;
            let mut retry = false;
            loop {
                attempts += 1;
                let done = work.work(&self.context(retry)).await;
                if done || inner.cancel.is_cancelled() {
                    break;
                }
                retry = true;
            }

            inner.working.store(false, Ordering::Release);
            inner.first_work.store(false, Ordering::Release);
            {
                let mut waiters = lock(&inner.waiters);
                if !inner.pending.load(Ordering::Acquire) {
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                }
            }
            info!(
                stage = %inner.name,
                attempts,
                duration_ms = started.elapsed().as_millis() as u64,
                "Done executing pipeline stage"
            );
            let _ = inner.event_tx.send(StageEvent::Finished {
                stage: inner.name.clone(),
                attempts,
            });
        }

        // Waiters left behind were queued after the stage closed.
        lock(&inner.waiters).clear();
        info!(stage = %inner.name, "Pipeline stage stopped");
        let _ = inner.event_tx.send(StageEvent::Stopped {
            stage: inner.name.clone(),
        });
    }

    fn context(&self, retry: bool) -> StageContext {
        StageContext {
            cancel: self.inner.cancel.clone(),
            retry,
            first_work: self.is_first_work(),
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.inner.name)
            .field("working", &self.is_working())
            .finish()
    }
}

/// Sleep unless cancelled first. Returns `false` if cancelled.
pub async fn cancellable_sleep(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
