use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::browser::SessionResult;
use crate::config::PoolSection;
use crate::queue::DispatchQueue;
use crate::registry::TaskRegistry;
use crate::task::{ErrorCode, TaskId, TaskOutcome, TaskRequest};

/// Capability boundary to the browser-automation engine. One driver is owned
/// by exactly one worker; the core never shares or branches on the concrete
/// engine after construction.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Loads the target and reports the solved token, or why it could not.
    async fn attempt(&mut self, request: &TaskRequest) -> SessionResult<String>;

    /// Aborts any in-flight page state after an interrupted attempt. An
    /// error here means the session is broken and must be recreated.
    async fn recycle(&mut self) -> SessionResult<()>;

    async fn close(self: Box<Self>);
}

/// Creates fresh driver sessions, at startup and on fault recovery.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> SessionResult<Box<dyn BrowserDriver>>;
}

/// Per-worker state machine. Fault recovery is a first-class phase rather
/// than a branch buried in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    Starting = 0,
    AwaitingTask = 1,
    Processing = 2,
    RecoveringSession = 3,
    /// No usable session could be obtained; the worker stopped dequeuing.
    Degraded = 4,
    Stopped = 5,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerPhase::AwaitingTask,
            2 => WorkerPhase::Processing,
            3 => WorkerPhase::RecoveringSession,
            4 => WorkerPhase::Degraded,
            5 => WorkerPhase::Stopped,
            _ => WorkerPhase::Starting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerPhase::Starting => "starting",
            WorkerPhase::AwaitingTask => "awaiting-task",
            WorkerPhase::Processing => "processing",
            WorkerPhase::RecoveringSession => "recovering-session",
            WorkerPhase::Degraded => "degraded",
            WorkerPhase::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub threads: usize,
    pub solve_timeout: Duration,
    pub session_retry_attempts: u32,
    pub session_retry_backoff: Duration,
}

impl From<&PoolSection> for WorkerOptions {
    fn from(section: &PoolSection) -> Self {
        Self {
            threads: section.threads.max(1),
            solve_timeout: Duration::from_secs(section.solve_timeout_seconds),
            session_retry_attempts: section.session_retry_attempts.max(1),
            session_retry_backoff: Duration::from_secs(section.session_retry_backoff_seconds),
        }
    }
}

enum SessionDisposition {
    Keep(Box<dyn BrowserDriver>),
    Recreate,
}

struct Worker {
    id: usize,
    registry: Arc<TaskRegistry>,
    queue: DispatchQueue,
    factory: Arc<dyn SessionFactory>,
    options: WorkerOptions,
    phase: Arc<AtomicU8>,
}

impl Worker {
    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    async fn run(self) {
        let mut driver = match self.acquire_session().await {
            Some(driver) => driver,
            None => {
                self.set_phase(WorkerPhase::Degraded);
                return;
            }
        };

        self.set_phase(WorkerPhase::AwaitingTask);
        while let Some(id) = self.queue.dequeue().await {
            self.set_phase(WorkerPhase::Processing);
            driver = match self.process(id, driver).await {
                SessionDisposition::Keep(driver) => driver,
                SessionDisposition::Recreate => {
                    self.set_phase(WorkerPhase::RecoveringSession);
                    match self.acquire_session().await {
                        Some(driver) => driver,
                        None => {
                            self.set_phase(WorkerPhase::Degraded);
                            return;
                        }
                    }
                }
            };
            self.set_phase(WorkerPhase::AwaitingTask);
        }

        driver.close().await;
        self.set_phase(WorkerPhase::Stopped);
        debug!(worker = self.id, "worker stopped");
    }

    /// Runs one task to its terminal state. Every solve-phase error is
    /// recorded into the task; nothing propagates past the worker loop.
    async fn process(&self, id: TaskId, mut driver: Box<dyn BrowserDriver>) -> SessionDisposition {
        let task = match self.registry.get(id) {
            Some(task) => task,
            None => {
                // Evicted or never created; nothing to do.
                warn!(worker = self.id, task = %id, "dequeued unknown task");
                return SessionDisposition::Keep(driver);
            }
        };
        if let Err(err) = self.registry.begin(id) {
            error!(worker = self.id, task = %id, error = %err, "refused begin transition");
            return SessionDisposition::Keep(driver);
        }

        let started = Instant::now();
        let solve = timeout(self.options.solve_timeout, driver.attempt(&task.request)).await;
        match solve {
            Ok(Ok(token)) => {
                let elapsed = started.elapsed();
                info!(
                    worker = self.id,
                    task = %id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "challenge solved"
                );
                self.finish(
                    id,
                    TaskOutcome::Solved {
                        token,
                        elapsed,
                    },
                );
                SessionDisposition::Keep(driver)
            }
            Ok(Err(err)) if err.is_fault() => {
                warn!(worker = self.id, task = %id, error = %err, "session fault during solve");
                self.finish(
                    id,
                    TaskOutcome::Failed {
                        code: ErrorCode::SessionError,
                        elapsed: started.elapsed().min(self.options.solve_timeout),
                    },
                );
                driver.close().await;
                SessionDisposition::Recreate
            }
            Ok(Err(err)) => {
                debug!(worker = self.id, task = %id, error = %err, "engine reported failure");
                self.finish(
                    id,
                    TaskOutcome::Failed {
                        code: ErrorCode::CaptchaFail,
                        elapsed: started.elapsed().min(self.options.solve_timeout),
                    },
                );
                SessionDisposition::Keep(driver)
            }
            Err(_elapsed) => {
                warn!(
                    worker = self.id,
                    task = %id,
                    timeout_s = self.options.solve_timeout.as_secs(),
                    "solve attempt timed out"
                );
                self.finish(
                    id,
                    TaskOutcome::Failed {
                        code: ErrorCode::SolveTimeout,
                        elapsed: self.options.solve_timeout,
                    },
                );
                if let Err(err) = driver.recycle().await {
                    warn!(worker = self.id, error = %err, "session unusable after timeout");
                    driver.close().await;
                    SessionDisposition::Recreate
                } else {
                    SessionDisposition::Keep(driver)
                }
            }
        }
    }

    fn finish(&self, id: TaskId, outcome: TaskOutcome) {
        if let Err(err) = self.registry.finish(id, outcome) {
            // By construction each task has one owning worker invocation, so
            // this path indicates a bug rather than a runtime condition.
            error!(worker = self.id, task = %id, error = %err, "refused terminal transition");
        }
    }

    async fn acquire_session(&self) -> Option<Box<dyn BrowserDriver>> {
        for attempt in 1..=self.options.session_retry_attempts {
            match self.factory.create().await {
                Ok(driver) => {
                    info!(worker = self.id, attempt, "browser session ready");
                    return Some(driver);
                }
                Err(err) => {
                    warn!(
                        worker = self.id,
                        attempt,
                        max_attempts = self.options.session_retry_attempts,
                        error = %err,
                        "session construction failed"
                    );
                    if attempt < self.options.session_retry_attempts {
                        sleep(self.options.session_retry_backoff).await;
                    }
                }
            }
        }
        error!(
            worker = self.id,
            "no usable session after retries, worker degraded"
        );
        None
    }
}

struct WorkerHandle {
    phase: Arc<AtomicU8>,
    join: JoinHandle<()>,
}

/// Fixed-size pool of workers, each owning one exclusive browser session.
/// The pool size is the sole admission-control mechanism: at most `threads`
/// tasks are ever in `processing`.
pub struct WorkerPool {
    queue: DispatchQueue,
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn start(
        registry: Arc<TaskRegistry>,
        queue: DispatchQueue,
        factory: Arc<dyn SessionFactory>,
        options: WorkerOptions,
    ) -> Self {
        let workers = (0..options.threads)
            .map(|id| {
                let phase = Arc::new(AtomicU8::new(WorkerPhase::Starting as u8));
                let worker = Worker {
                    id,
                    registry: Arc::clone(&registry),
                    queue: queue.clone(),
                    factory: Arc::clone(&factory),
                    options: options.clone(),
                    phase: Arc::clone(&phase),
                };
                WorkerHandle {
                    phase,
                    join: tokio::spawn(worker.run()),
                }
            })
            .collect();
        info!(threads = options.threads, "worker pool started");
        Self { queue, workers }
    }

    /// Phase snapshot, in worker order. Exposes degraded workers for
    /// health/readiness reporting.
    pub fn phases(&self) -> Vec<WorkerPhase> {
        self.workers
            .iter()
            .map(|worker| WorkerPhase::from_u8(worker.phase.load(Ordering::Acquire)))
            .collect()
    }

    /// Closes the queue, lets in-flight tasks finish, and joins every
    /// worker.
    pub async fn shutdown(self) {
        self.queue.close();
        for worker in self.workers {
            if let Err(err) = worker.join.await {
                warn!(error = %err, "worker join error");
            }
        }
        info!("worker pool stopped");
    }
}
