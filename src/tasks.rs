//! Lifecycle of the service's background loops.
//!
//! The monitor runs up to three long-lived loops: the offsets-topic consumer
//! and the end-to-end producer and consumer. None of them is supposed to
//! return, so a finished task is reported as [`TaskStatus::Exited`] unless the
//! registry was shutting down.
//!
//! ```rust,no_run
//! use minion::tasks::TaskRegistry;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut tasks = TaskRegistry::new();
//!     tasks.spawn("end_to_end_producer", async {
//!         loop {
//!             tokio::time::sleep(Duration::from_millis(100)).await;
//!         }
//!     });
//!
//!     assert!(tasks.all_running());
//!     tasks.shutdown_all().await;
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Grace period for [`TaskRegistry::shutdown_all`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    /// Returned or panicked on its own.
    Exited,
    /// Stopped by the shutdown signal.
    Stopped,
}

/// Named background tasks sharing one shutdown signal.
pub struct TaskRegistry {
    tasks: HashMap<&'static str, JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: bool,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: HashMap::new(),
            shutdown_tx,
            shutting_down: false,
        }
    }

    /// Spawn `task` under `name`. A previous task of the same name is aborted.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down {
            warn!(task = name, "Ignoring spawn during shutdown");
            return;
        }

        if let Some(previous) = self.tasks.remove(name) {
            previous.abort();
            debug!(task = name, "Aborted previous task instance");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task => {
                    warn!(task = name, "Background task exited");
                }
                _ = shutdown_rx.recv() => {
                    debug!(task = name, "Background task received shutdown signal");
                }
            }
        });

        info!(task = name, "Spawned background task");
        self.tasks.insert(name, handle);
    }

    /// Status of every task, sorted by name.
    pub fn health_check(&self) -> Vec<(&'static str, TaskStatus)> {
        let mut statuses: Vec<_> = self
            .tasks
            .iter()
            .map(|(name, handle)| (*name, self.status_of(handle)))
            .collect();
        statuses.sort_by_key(|(name, _)| *name);
        statuses
    }

    fn status_of(&self, handle: &JoinHandle<()>) -> TaskStatus {
        match (handle.is_finished(), self.shutting_down) {
            (false, _) => TaskStatus::Running,
            (true, true) => TaskStatus::Stopped,
            (true, false) => TaskStatus::Exited,
        }
    }

    pub fn all_running(&self) -> bool {
        self.tasks.values().all(|handle| !handle.is_finished())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub async fn shutdown_all(&mut self) {
        self.shutdown_all_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Signal every task and wait up to `timeout` in total. Stragglers are
    /// aborted. Calling this twice is a no-op.
    pub async fn shutdown_all_with_timeout(&mut self, timeout: Duration) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        info!(task_count = self.tasks.len(), "Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        let deadline = Instant::now() + timeout;
        for (name, handle) in self.tasks.drain() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(task = name, "Aborting task, shutdown timeout exceeded");
                handle.abort();
                continue;
            }

            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => debug!(task = name, "Task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Task panicked"),
                Err(_) => warn!(task = name, "Task did not stop in time, aborted"),
            }
        }

        info!("Background tasks stopped");
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        if !self.shutting_down {
            let _ = self.shutdown_tx.send(());
            for (_, handle) in self.tasks.drain() {
                handle.abort();
            }
        }
    }
}
