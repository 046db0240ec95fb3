//! Planned-task registry and its poll loop.
//!
//! Tasks are planned against a [`Schedule`] and keyed by their [`TaskKey`].
//! A tokio task wakes every poll interval, claims all entries whose
//! schedule has passed and hands each one to the worker pool. Claiming
//! removes the entry under the registry lock, so an entry is dispatched
//! exactly once even when polls overlap, and a task that re-plans itself
//! while running never races its own removal.

use crate::config::SchedulerConfig;
use crate::error::{AutopilotError, Result};
use crate::scheduler::Schedule;
use crate::service::{Service, ServiceState};
use crate::task::{CancelListener, Task, TaskKey, run_to_outcome};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// Policy for two different tasks planned at the identical instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep both; both fire.
    #[default]
    KeepBoth,
    /// The newest plan evicts every other task at that instant.
    Replace,
    /// Refuse the newer plan.
    Reject,
}

/// Snapshot of one pending entry.
#[derive(Clone)]
pub struct PlannedTask {
    /// Identity of the planned task.
    pub key: TaskKey,
    /// When it becomes due.
    pub schedule: Schedule,
    /// The task itself.
    pub task: Arc<dyn Task>,
}

impl std::fmt::Debug for PlannedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedTask")
            .field("key", &self.key)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct PendingEntry {
    schedule: Schedule,
    task: Arc<dyn Task>,
}

struct SchedulerInner {
    pending: Mutex<HashMap<TaskKey, PendingEntry>>,
    state: Mutex<ServiceState>,
    poll_loop: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    collision_policy: CollisionPolicy,
    cancel: CancellationToken,
    workers: TaskTracker,
    permits: Arc<Semaphore>,
}

/// Registry of one-shot tasks fired when due.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pending: Mutex::new(HashMap::new()),
                state: Mutex::new(ServiceState::Idle),
                poll_loop: Mutex::new(None),
                poll_interval: config.poll_interval(),
                shutdown_timeout: config.shutdown_timeout(),
                collision_policy: config.collision_policy,
                cancel: CancellationToken::new(),
                workers: TaskTracker::new(),
                permits: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
            }),
        }
    }

    /// Override the poll interval (useful for testing).
    ///
    /// Only valid before the scheduler is shared.
    #[must_use]
    pub fn with_poll_interval(self, interval: Duration) -> Self {
        self.rebuild(|inner| inner.poll_interval = interval)
    }

    /// Override the shutdown bound (useful for testing).
    #[must_use]
    pub fn with_shutdown_timeout(self, timeout: Duration) -> Self {
        self.rebuild(|inner| inner.shutdown_timeout = timeout)
    }

    fn rebuild(self, apply: impl FnOnce(&mut SchedulerInner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                debug!("scheduler already shared, override ignored");
                Self { inner }
            }
        }
    }

    /// Plan `task` to fire once `schedule` has passed.
    ///
    /// Planning a key that is already pending replaces its schedule.
    ///
    /// # Errors
    ///
    /// Returns [`AutopilotError::ScheduleCollision`] when the collision policy
    /// is [`CollisionPolicy::Reject`] and another task holds the same instant,
    /// and [`AutopilotError::Lifecycle`] once the scheduler is stopped.
    pub fn plan(&self, task: Arc<dyn Task>, schedule: Schedule) -> Result<()> {
        let mut pending = self.inner.pending();
        self.inner.ensure_accepting()?;
        admit(&mut pending, self.inner.collision_policy, task, schedule)
    }

    /// Atomically drop every pending task whose key matches `remove` and plan
    /// `plans` in their place. Returns how many tasks were dropped.
    ///
    /// Either every plan is admitted or nothing changes.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::plan`]; on error the pending set is untouched.
    pub fn replan(
        &self,
        remove: impl Fn(&TaskKey) -> bool,
        plans: Vec<(Arc<dyn Task>, Schedule)>,
    ) -> Result<usize> {
        let mut pending = self.inner.pending();
        self.inner.ensure_accepting()?;

        let mut staged = pending.clone();
        let before = staged.len();
        staged.retain(|key, _| !remove(key));
        let removed = before - staged.len();
        for (task, schedule) in plans {
            admit(&mut staged, self.inner.collision_policy, task, schedule)?;
        }

        *pending = staged;
        Ok(removed)
    }

    /// Snapshot of every pending task, earliest first.
    #[must_use]
    pub fn planned(&self) -> Vec<PlannedTask> {
        self.find_where(|_| true)
    }

    /// Snapshot of the pending tasks matching `predicate`, earliest first.
    pub fn find_where(&self, predicate: impl Fn(&PlannedTask) -> bool) -> Vec<PlannedTask> {
        let mut planned: Vec<PlannedTask> = self
            .inner
            .pending()
            .iter()
            .map(|(key, entry)| PlannedTask {
                key: key.clone(),
                schedule: entry.schedule,
                task: Arc::clone(&entry.task),
            })
            .collect();
        planned.retain(|planned| predicate(planned));
        planned.sort_by(|a, b| a.schedule.cmp(&b.schedule).then_with(|| a.key.cmp(&b.key)));
        planned
    }

    /// Schedule of the pending task with `key`, if any.
    #[must_use]
    pub fn find(&self, key: &TaskKey) -> Option<Schedule> {
        self.inner.pending().get(key).map(|entry| entry.schedule)
    }

    /// Remove the pending task with `key`. Returns `false` when nothing was pending.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        self.inner.remove(key)
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.pending().len()
    }

    /// Whether no task is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.inner.state()
    }

    /// Run one poll pass now, independently of the poll loop.
    ///
    /// Returns how many tasks were dispatched. Nothing is claimed unless the
    /// scheduler is running and the caller is inside a tokio runtime.
    pub fn poll_now(&self) -> usize {
        if *self.inner.state() != ServiceState::Running {
            return 0;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("poll_now called outside a tokio runtime, nothing dispatched");
            return 0;
        }
        self.inner.poll()
    }

    /// Begin the poll loop.
    ///
    /// # Errors
    ///
    /// Returns [`AutopilotError::Lifecycle`] outside a tokio runtime, when
    /// already running, or after [`Scheduler::stop`].
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AutopilotError::Lifecycle(format!("scheduler needs a runtime: {e}")))?;
        self.inner.state().begin_start("scheduler")?;

        trace!("starting scheduler");
        let inner = Arc::clone(&self.inner);
        let handle = runtime.spawn(async move {
            info!(
                interval_secs = inner.poll_interval.as_secs_f64(),
                "scheduler started"
            );
            let mut interval = tokio::time::interval(inner.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        trace!("looking up due tasks");
                        let fired = inner.poll();
                        trace!(fired, "poll done");
                    }
                }
            }
            debug!("scheduler poll loop exited");
        });
        *self
            .inner
            .poll_loop
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    /// Stop polling, cancel running tasks and drop every pending plan.
    ///
    /// Waits up to the shutdown bound for running tasks; tasks still running
    /// after that are abandoned and logged. Never fails on timeout.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.state().begin_stop() {
            return Ok(());
        }
        trace!("stopping scheduler");
        self.inner.cancel.cancel();

        let poll_loop = self
            .inner
            .poll_loop
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(poll_loop) = poll_loop {
            let _ = poll_loop.await;
        }

        self.inner.workers.close();
        if tokio::time::timeout(self.inner.shutdown_timeout, self.inner.workers.wait())
            .await
            .is_err()
        {
            error!(
                timeout_secs = self.inner.shutdown_timeout.as_secs_f64(),
                abandoned = self.inner.workers.len(),
                "scheduler took too long to shut down, running tasks abandoned"
            );
        }
        self.inner.permits.close();
        self.inner.pending().clear();
        info!("scheduler stopped");
        Ok(())
    }
}

/// Insert one entry into `pending` under `policy`. Nothing changes on error.
fn admit(
    pending: &mut HashMap<TaskKey, PendingEntry>,
    policy: CollisionPolicy,
    task: Arc<dyn Task>,
    schedule: Schedule,
) -> Result<()> {
    let key = task.key();
    match policy {
        CollisionPolicy::KeepBoth => {}
        CollisionPolicy::Replace => pending.retain(|existing, entry| {
            let evict = *existing != key && entry.schedule == schedule;
            if evict {
                debug!(task = %existing, by = %key, %schedule, "planned task replaced");
            }
            !evict
        }),
        CollisionPolicy::Reject => {
            if let Some(existing) = pending
                .iter()
                .find(|(existing, entry)| **existing != key && entry.schedule == schedule)
                .map(|(existing, _)| existing)
            {
                return Err(AutopilotError::ScheduleCollision {
                    existing: existing.to_string(),
                    when: schedule.to_string(),
                });
            }
        }
    }

    match pending.insert(key.clone(), PendingEntry { schedule, task }) {
        Some(previous) => {
            debug!(task = %key, %schedule, previous = %previous.schedule, "task re-planned")
        }
        None => debug!(task = %key, %schedule, "task planned"),
    }
    Ok(())
}

impl SchedulerInner {
    /// Called with the pending lock held, so `stop` cannot clear in between.
    fn ensure_accepting(&self) -> Result<()> {
        if *self.state() == ServiceState::Stopped {
            return Err(AutopilotError::Lifecycle(
                "scheduler is stopped, plan rejected".to_owned(),
            ));
        }
        Ok(())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<TaskKey, PendingEntry>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn remove(&self, key: &TaskKey) -> bool {
        let removed = self.pending().remove(key);
        match removed {
            Some(entry) => {
                debug!(task = %key, schedule = %entry.schedule, "planned task cancelled");
                true
            }
            None => {
                trace!(task = %key, "cancel: nothing planned");
                false
            }
        }
    }

    /// Claim every due entry and dispatch it.
    fn poll(self: &Arc<Self>) -> usize {
        let now = Utc::now();
        let due: Vec<(TaskKey, PendingEntry)> = {
            let mut pending = self.pending();
            let keys: Vec<TaskKey> = pending
                .iter()
                .filter(|(_, entry)| entry.schedule.is_due_at(now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| pending.remove_entry(&key))
                .collect()
        };

        let count = due.len();
        if count > 0 {
            trace!(count, "found due tasks");
        }
        for (key, entry) in due {
            self.dispatch(key, entry);
        }
        count
    }

    fn dispatch(self: &Arc<Self>, key: TaskKey, entry: PendingEntry) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let listener: CancelListener = Arc::new(move |key: &TaskKey| {
            if let Some(registry) = registry.upgrade() {
                registry.remove(key);
            }
        });
        entry.task.set_cancel_listener(listener);

        let permits = Arc::clone(&self.permits);
        let cancel = self.cancel.child_token();
        self.workers.spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            trace!(task = %key, planned_for = %entry.schedule, "running planned task");
            let outcome = run_to_outcome(entry.task.as_ref(), &cancel).await;
            trace!(task = %key, ?outcome, "planned task finished");
        });
    }
}

#[async_trait]
impl Service for Scheduler {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn start(&self) -> Result<()> {
        Scheduler::start(self)
    }

    async fn stop(&self) -> Result<()> {
        Scheduler::stop(self).await
    }
}
