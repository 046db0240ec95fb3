//! Units of work and their identity.
//!
//! Every task exposes an explicit, immutable [`TaskKey`]. The scheduler and
//! the background executor key their maps by it, so deduplication, lookup
//! and cancellation never depend on object equality.

pub mod long_running;

use crate::automation::resource::{InstanceAction, ResourceRef};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

pub use long_running::{LongRunningTask, ResultCallback};

static NEXT_UNIQUE_KEY: AtomicU64 = AtomicU64::new(1);

/// Logical identity of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKey {
    /// Start or stop of one instance; equal for equal (action, instance, region).
    Instance {
        /// Remote action issued by the task.
        action: InstanceAction,
        /// Target instance.
        resource: ResourceRef,
    },
    /// Identity of a single task object.
    Unique(u64),
}

impl TaskKey {
    /// Allocate a key no other task shares.
    #[must_use]
    pub fn unique() -> Self {
        Self::Unique(NEXT_UNIQUE_KEY.fetch_add(1, Ordering::Relaxed))
    }

    /// Key of the task starting `resource`.
    #[must_use]
    pub fn start(resource: ResourceRef) -> Self {
        Self::Instance {
            action: InstanceAction::Start,
            resource,
        }
    }

    /// Key of the task stopping `resource`.
    #[must_use]
    pub fn stop(resource: ResourceRef) -> Self {
        Self::Instance {
            action: InstanceAction::Stop,
            resource,
        }
    }

    /// Target instance, for instance keys.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceRef> {
        match self {
            Self::Instance { resource, .. } => Some(resource),
            Self::Unique(_) => None,
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instance { action, resource } => write!(f, "{action}:{resource}"),
            Self::Unique(id) => write!(f, "task#{id}"),
        }
    }
}

/// Notified with the task's key when the task gives up because the UI
/// consuming its result went away.
pub type CancelListener = Arc<dyn Fn(&TaskKey) + Send + Sync>;

/// A unit of work run by the scheduler or the background executor.
#[async_trait]
pub trait Task: Send + Sync {
    /// Identity used for dedup, lookup and cancellation.
    fn key(&self) -> TaskKey;

    /// Perform the work. Errors are logged by whoever runs the task.
    async fn run(&self) -> anyhow::Result<()>;

    /// Install the listener an owning executor uses to drop stale entries.
    ///
    /// Tasks that never cancel themselves can ignore it.
    fn set_cancel_listener(&self, _listener: CancelListener) {}
}

/// How one execution of a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// `run` returned `Ok`.
    Completed,
    /// `run` returned an error or panicked.
    Failed(String),
    /// The execution was cancelled before or while running.
    Cancelled,
}

impl ExecutionOutcome {
    /// Whether the execution was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Ad-hoc task built from a closure.
pub struct FnTask {
    key: TaskKey,
    work: Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>,
}

impl FnTask {
    /// Wrap `work` under a fresh unique key.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::with_key(TaskKey::unique(), work)
    }

    /// Wrap `work` under an explicit key.
    pub fn with_key<F, Fut>(key: TaskKey, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            key,
            work: Box::new(move || work().boxed()),
        }
    }
}

#[async_trait]
impl Task for FnTask {
    fn key(&self) -> TaskKey {
        self.key.clone()
    }

    async fn run(&self) -> anyhow::Result<()> {
        (self.work)().await
    }
}

/// Run `task` until it finishes or `cancel` fires.
///
/// Errors and panics from the task are caught here and reported as
/// [`ExecutionOutcome::Failed`].
pub(crate) async fn run_to_outcome(task: &dyn Task, cancel: &CancellationToken) -> ExecutionOutcome {
    let key = task.key();
    if cancel.is_cancelled() {
        trace!(task = %key, "cancelled before start");
        return ExecutionOutcome::Cancelled;
    }

    trace!(task = %key, "running");
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            trace!(task = %key, "cancelled while running");
            return ExecutionOutcome::Cancelled;
        }
        result = AssertUnwindSafe(task.run()).catch_unwind() => result,
    };

    match result {
        Ok(Ok(())) => {
            trace!(task = %key, "completed");
            ExecutionOutcome::Completed
        }
        Ok(Err(e)) => {
            warn!(task = %key, error = %e, "task failed");
            ExecutionOutcome::Failed(e.to_string())
        }
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            warn!(task = %key, panic = %msg, "task panicked");
            ExecutionOutcome::Failed(format!("panicked: {msg}"))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
