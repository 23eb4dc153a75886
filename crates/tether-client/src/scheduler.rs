//! Shared timeout scheduler.
//!
//! One scheduler task drives the call timeouts of every session that holds
//! one of its handles. Sessions never own the scheduler: when the owning
//! [`TimeoutScheduler`] is shut down or dropped, pending timers are discarded
//! and [`SchedulerHandle::schedule`] starts returning `false`.
//!
//! [`TimeoutScheduler::global`] is the process-wide scheduler used by
//! [`Connector::new`](crate::Connector::new). It runs on its own thread and
//! lives until the process exits.

use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Process-wide scheduler, started on first use.
static GLOBAL: OnceLock<TimeoutScheduler> = OnceLock::new();

/// Owner of the scheduler task.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tether_client::TimeoutScheduler;
///
/// # #[tokio::main]
/// # async fn main() {
/// let scheduler = TimeoutScheduler::spawn();
/// let (tx, rx) = tokio::sync::oneshot::channel();
/// scheduler.handle().schedule(Duration::from_millis(10), move || {
///     let _ = tx.send(());
/// });
/// rx.await.unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct TimeoutScheduler {
    handle: SchedulerHandle,
    shutdown: CancellationToken,
}

impl TimeoutScheduler {
    /// Starts the scheduler task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(run(rx, shutdown.clone()));

        Self {
            handle: SchedulerHandle { tx },
            shutdown,
        }
    }

    /// Starts the scheduler on a dedicated thread with its own runtime.
    ///
    /// The scheduler keeps running regardless of which runtime its handles
    /// are used from.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the thread cannot be created.
    pub fn spawn_dedicated() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let token = shutdown.clone();
        std::thread::Builder::new()
            .name("tether-timeouts".to_string())
            .spawn(move || runtime.block_on(run(rx, token)))?;

        Ok(Self {
            handle: SchedulerHandle { tx },
            shutdown,
        })
    }

    /// Returns a handle to the process-wide scheduler, starting it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler thread cannot be started.
    pub fn global() -> std::io::Result<SchedulerHandle> {
        if let Some(scheduler) = GLOBAL.get() {
            return Ok(scheduler.handle());
        }
        let scheduler = Self::spawn_dedicated()?;
        // A scheduler that loses the initialization race is dropped and stops.
        Ok(GLOBAL.get_or_init(|| scheduler).handle())
    }

    /// Returns a non-owning handle for scheduling timers.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Stops the scheduler. Timers that have not fired are dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Cheap, cloneable handle to a running [`TimeoutScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<(Duration, Task)>,
}

impl SchedulerHandle {
    /// Runs `task` on the scheduler task once `delay` has elapsed.
    ///
    /// Returns `false` if the scheduler has stopped; the task is dropped
    /// without running.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send((delay, Box::new(task))).is_ok()
    }

    /// Whether the scheduler task is still accepting timers.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Whether both handles point at the same scheduler.
    pub fn same_scheduler(&self, other: &SchedulerHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<(Duration, Task)>, shutdown: CancellationToken) {
    let mut timers: DelayQueue<Task> = DelayQueue::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some((delay, task)) => {
                    timers.insert(task, delay);
                }
                None => break,
            },
            Some(expired) = timers.next(), if !timers.is_empty() => {
                (expired.into_inner())();
            }
        }
    }

    tracing::debug!(discarded = timers.len(), "Timeout scheduler stopped");
}
