//! Single-flight background execution.
//!
//! [`BackgroundExecutor::execute`] runs a task immediately on the runtime.
//! At most one execution per [`TaskKey`] is live: submitting a key that is
//! still in flight cancels the earlier execution before the new one is
//! registered. Each registration carries a generation number so a cancelled
//! execution finishing late never removes its successor's entry.

use crate::config::BackgroundConfig;
use crate::error::{AutopilotError, Result};
use crate::service::{Service, ServiceState};
use crate::task::{CancelListener, ExecutionOutcome, Task, TaskKey, run_to_outcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace};

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

struct ExecutorInner {
    in_flight: Mutex<HashMap<TaskKey, InFlight>>,
    state: Mutex<ServiceState>,
    next_generation: AtomicU64,
    shutdown_timeout: Duration,
    cancel: CancellationToken,
    workers: TaskTracker,
}

/// Runs tasks now, one live execution per key.
///
/// Cheap to clone; clones share the same in-flight set.
#[derive(Clone)]
pub struct BackgroundExecutor {
    inner: Arc<ExecutorInner>,
}

/// Handle to one submitted execution.
#[derive(Debug)]
pub struct ExecutionHandle {
    key: TaskKey,
    join: JoinHandle<ExecutionOutcome>,
}

impl ExecutionHandle {
    /// Key of the submitted task.
    #[must_use]
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Whether the execution has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the execution to end.
    pub async fn outcome(self) -> ExecutionOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(task = %self.key, error = %e, "execution join failed");
                ExecutionOutcome::Cancelled
            }
        }
    }
}

impl BackgroundExecutor {
    /// Create a stopped executor.
    #[must_use]
    pub fn new(config: &BackgroundConfig) -> Self {
        Self::build(config.shutdown_timeout())
    }

    /// Override the shutdown bound (useful for testing).
    #[must_use]
    pub fn with_shutdown_timeout(self, timeout: Duration) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.shutdown_timeout = timeout;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                debug!("executor already shared, override ignored");
                Self { inner }
            }
        }
    }

    fn build(shutdown_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                in_flight: Mutex::new(HashMap::new()),
                state: Mutex::new(ServiceState::Idle),
                next_generation: AtomicU64::new(0),
                shutdown_timeout,
                cancel: CancellationToken::new(),
                workers: TaskTracker::new(),
            }),
        }
    }

    /// Submit `task` for immediate execution.
    ///
    /// A live execution with the same key is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`AutopilotError::Lifecycle`] when the executor is not running
    /// or the caller is outside a tokio runtime.
    pub fn execute(&self, task: Arc<dyn Task>) -> Result<ExecutionHandle> {
        if *self.inner.state() != ServiceState::Running {
            return Err(AutopilotError::Lifecycle(
                "background executor is not running".to_owned(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AutopilotError::Lifecycle(format!("execute needs a runtime: {e}")))?;

        let key = task.key();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.cancel.child_token();
        {
            let mut in_flight = self.inner.in_flight();
            let entry = InFlight {
                generation,
                token: token.clone(),
            };
            if let Some(previous) = in_flight.insert(key.clone(), entry) {
                previous.token.cancel();
                debug!(task = %key, "previous execution cancelled");
            }
        }

        let executor: Weak<ExecutorInner> = Arc::downgrade(&self.inner);
        let listener: CancelListener = Arc::new(move |key: &TaskKey| {
            if let Some(executor) = executor.upgrade() {
                executor.cancel_generation(key, generation);
            }
        });
        task.set_cancel_listener(listener);

        trace!(task = %key, generation, "executing");
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let join = self.inner.workers.spawn_on(
            async move {
                let outcome = run_to_outcome(task.as_ref(), &token).await;
                inner.finish(&task_key, generation);
                outcome
            },
            &runtime,
        );
        Ok(ExecutionHandle { key, join })
    }

    /// Cancel the live execution for `key`. Returns `false` when none is live.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        self.inner.cancel(key)
    }

    /// Whether an execution for `key` is live.
    #[must_use]
    pub fn is_running(&self, key: &TaskKey) -> bool {
        self.inner.in_flight().contains_key(key)
    }

    /// Number of live executions.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight().len()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.inner.state()
    }

    /// Accept submissions.
    ///
    /// # Errors
    ///
    /// Returns [`AutopilotError::Lifecycle`] when already running or stopped.
    pub fn start(&self) -> Result<()> {
        self.inner.state().begin_start("background executor")?;
        info!("background executor started");
        Ok(())
    }

    /// Cancel every live execution and wait for them, bounded by the
    /// shutdown timeout. A timeout is logged, not returned.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.state().begin_stop() {
            return Ok(());
        }
        trace!("stopping background executor");
        self.inner.cancel.cancel();
        self.inner.workers.close();
        if tokio::time::timeout(self.inner.shutdown_timeout, self.inner.workers.wait())
            .await
            .is_err()
        {
            error!(
                timeout_secs = self.inner.shutdown_timeout.as_secs_f64(),
                abandoned = self.inner.workers.len(),
                "background executor took too long to shut down, executions abandoned"
            );
        }
        self.inner.in_flight().clear();
        info!("background executor stopped");
        Ok(())
    }
}

impl ExecutorInner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<TaskKey, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn cancel(&self, key: &TaskKey) -> bool {
        let removed = self.in_flight().remove(key);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                debug!(task = %key, "execution cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel the entry for `key` only if it still belongs to `generation`.
    fn cancel_generation(&self, key: &TaskKey, generation: u64) {
        let mut in_flight = self.in_flight();
        match in_flight.get(key) {
            Some(entry) if entry.generation == generation => {
                entry.token.cancel();
                in_flight.remove(key);
                debug!(task = %key, generation, "execution cancelled by its task");
            }
            Some(_) => trace!(task = %key, generation, "stale cancel ignored, key re-executed"),
            None => {}
        }
    }

    /// Drop the entry for `key` if it still belongs to `generation`.
    fn finish(&self, key: &TaskKey, generation: u64) {
        let mut in_flight = self.in_flight();
        if in_flight
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            in_flight.remove(key);
        }
    }
}

#[async_trait]
impl Service for BackgroundExecutor {
    fn name(&self) -> &str {
        "background executor"
    }

    async fn start(&self) -> Result<()> {
        BackgroundExecutor::start(self)
    }

    async fn stop(&self) -> Result<()> {
        BackgroundExecutor::stop(self).await
    }
}
