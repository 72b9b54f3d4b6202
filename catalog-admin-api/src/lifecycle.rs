//! Shutdown signals and supervised background tasks.
//!
//! # Example
//!
//! ```no_run
//! use catalog_admin_api::lifecycle::{ShutdownSignal, TaskSupervisor};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let supervisor = TaskSupervisor::new();
//! supervisor.spawn_periodic("heartbeat", Duration::from_secs(60), || {
//!     tracing::debug!("tick");
//! });
//!
//! ShutdownSignal::new().wait().await;
//! supervisor.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shutdown signal handler
#[derive(Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wait for SIGINT or SIGTERM
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
            _ = terminate => info!("Received SIGTERM"),
        }

        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ShutdownError {
    #[error("Shutdown timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task {task} failed: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,
}

struct SupervisedTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Owns periodic background tasks and stops them together.
///
/// Every task observes one watch channel; [`TaskSupervisor::shutdown`] flips
/// it and joins each handle within the given timeout.
pub struct TaskSupervisor {
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<SupervisedTask>>,
    is_shutting_down: AtomicBool,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            tasks: Mutex::new(Vec::new()),
            is_shutting_down: AtomicBool::new(false),
        }
    }

    /// Run `tick` every `period`, first after one full period.
    /// Ignored once shutdown has started.
    pub fn spawn_periodic<F>(&self, name: impl Into<String>, period: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        if self.is_shutting_down() {
            warn!(task = %name, "Supervisor shutting down, task not started");
            return;
        }

        let period = period.max(Duration::from_millis(1));
        let mut stop_rx = self.stop_tx.subscribe();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = %task_name, period_ms = period.as_millis() as u64, "Background task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(),
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!(task = %task_name, "Background task stopped");
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SupervisedTask { name, handle });
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Signal every task to stop and wait for all of them within `limit`.
    /// Tasks still running at the deadline are aborted.
    pub async fn shutdown(&self, limit: Duration) -> Result<(), ShutdownError> {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ShutdownError::AlreadyShuttingDown);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        info!(tasks = tasks.len(), "Stopping background tasks");
        let _ = self.stop_tx.send(true);

        let deadline = Instant::now() + limit;
        let mut first_error = None;

        for SupervisedTask { name, mut handle } in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, &mut handle).await {
                Ok(Ok(())) => debug!(task = %name, "Background task joined"),
                Ok(Err(e)) => {
                    warn!(task = %name, error = %e, "Background task failed");
                    first_error.get_or_insert(ShutdownError::TaskFailed {
                        task: name,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(task = %name, "Background task did not stop in time, aborting");
                    handle.abort();
                    first_error.get_or_insert(ShutdownError::Timeout(limit));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("Background tasks stopped");
                Ok(())
            }
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}
