//! Detachable UI sink.
//!
//! The UI side owns a [`UiContext`] that executes marshalled jobs one at a
//! time; background work only ever sees a [`UiHandle`]. Liveness is an
//! explicit flag the UI revokes on teardown, so workers ask the handle
//! whether it is still valid instead of relying on the sink being dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// How the UI picks up changes made by marshalled jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushMode {
    /// The UI refreshes on its own after each job.
    #[default]
    Automatic,
    /// Changes become visible only after an explicit [`UiSink::push`].
    Manual,
    /// Server push is off; results are applied but never shown.
    Disabled,
}

/// The sink was torn down before or while it was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("UI sink is detached")]
pub struct SinkDetached;

/// Work marshalled onto the UI's serialized context.
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Consumer of completed background results.
pub trait UiSink: Send + Sync {
    /// Whether the sink still accepts jobs.
    fn is_attached(&self) -> bool;

    /// Queue `job` on the sink's serialized context.
    fn access(&self, job: UiJob) -> Result<(), SinkDetached>;

    /// Refresh model of the sink.
    fn push_mode(&self) -> PushMode;

    /// Flush pending changes to the user (manual push mode).
    fn push(&self) -> Result<(), SinkDetached>;
}

enum UiCommand {
    Run(UiJob),
    Push,
    Detach,
}

struct UiShared {
    attached: AtomicBool,
    push_mode: PushMode,
    jobs_run: AtomicU64,
    pushes: AtomicU64,
}

/// Revocable handle onto a [`UiContext`].
#[derive(Clone)]
pub struct UiHandle {
    shared: Arc<UiShared>,
    tx: mpsc::UnboundedSender<UiCommand>,
}

impl std::fmt::Debug for UiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiHandle")
            .field("attached", &self.is_attached())
            .field("push_mode", &self.shared.push_mode)
            .finish()
    }
}

impl UiHandle {
    /// Revoke the handle. Queued jobs that have not run yet are dropped.
    pub fn detach(&self) {
        if self.shared.attached.swap(false, Ordering::SeqCst) {
            debug!("UI sink detached");
            let _ = self.tx.send(UiCommand::Detach);
        }
    }

    /// Number of jobs the context has executed.
    #[must_use]
    pub fn jobs_run(&self) -> u64 {
        self.shared.jobs_run.load(Ordering::SeqCst)
    }

    /// Number of explicit pushes the context has performed.
    #[must_use]
    pub fn pushes(&self) -> u64 {
        self.shared.pushes.load(Ordering::SeqCst)
    }
}

impl UiSink for UiHandle {
    fn is_attached(&self) -> bool {
        self.shared.attached.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn access(&self, job: UiJob) -> Result<(), SinkDetached> {
        if !self.is_attached() {
            return Err(SinkDetached);
        }
        self.tx.send(UiCommand::Run(job)).map_err(|_| SinkDetached)
    }

    fn push_mode(&self) -> PushMode {
        self.shared.push_mode
    }

    fn push(&self) -> Result<(), SinkDetached> {
        if !self.is_attached() {
            return Err(SinkDetached);
        }
        self.tx.send(UiCommand::Push).map_err(|_| SinkDetached)
    }
}

/// Serialized execution context owned by the UI.
pub struct UiContext {
    shared: Arc<UiShared>,
    rx: mpsc::UnboundedReceiver<UiCommand>,
}

impl UiContext {
    /// Create a context and the handle background work will hold.
    #[must_use]
    pub fn new(push_mode: PushMode) -> (UiHandle, UiContext) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(UiShared {
            attached: AtomicBool::new(true),
            push_mode,
            jobs_run: AtomicU64::new(0),
            pushes: AtomicU64::new(0),
        });
        let handle = UiHandle {
            shared: Arc::clone(&shared),
            tx,
        };
        (handle, UiContext { shared, rx })
    }

    /// Execute marshalled jobs one at a time until the sink is detached or
    /// every handle is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            if !self.shared.attached.load(Ordering::SeqCst) {
                break;
            }
            match command {
                UiCommand::Run(job) => {
                    job();
                    self.shared.jobs_run.fetch_add(1, Ordering::SeqCst);
                }
                UiCommand::Push => {
                    self.shared.pushes.fetch_add(1, Ordering::SeqCst);
                    trace!("UI pushed");
                }
                UiCommand::Detach => break,
            }
        }
    }
}

impl Drop for UiContext {
    fn drop(&mut self) {
        self.shared.attached.store(false, Ordering::SeqCst);
    }
}
