//! Background work whose result is delivered to a detachable UI.
//!
//! [`LongRunningTask`] runs its work on the executor's worker, then marshals
//! the result onto the UI sink's own serialized context. The task never
//! keeps the result callback alive (it holds a [`Weak`]) and checks the
//! sink's validity before touching it. When the sink has gone away the task
//! notifies its cancel listener so the owning executor can drop the stale
//! entry.

use super::{CancelListener, Task, TaskKey};
use crate::ui::{PushMode, SinkDetached, UiJob, UiSink};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tracing::{error, trace, warn};

/// Receives the result of a [`LongRunningTask`] on the UI context.
pub type ResultCallback<R> = dyn Fn(R) + Send + Sync;

type Work<R> = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;

/// Work paired with a UI result callback and the sink that shows it.
pub struct LongRunningTask<R> {
    key: TaskKey,
    work: Work<R>,
    callback: Weak<ResultCallback<R>>,
    sink: Arc<dyn UiSink>,
    cancel_listener: Mutex<Option<CancelListener>>,
}

impl<R: Send + 'static> LongRunningTask<R> {
    /// Wrap `work`; `callback` stays owned by the caller.
    pub fn new<F, Fut>(work: F, callback: &Arc<ResultCallback<R>>, sink: Arc<dyn UiSink>) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        Self {
            key: TaskKey::unique(),
            work: Box::new(move || work().boxed()),
            callback: Arc::downgrade(callback),
            sink,
            cancel_listener: Mutex::new(None),
        }
    }

    /// Share identity with other tasks, e.g. one refresh per panel.
    #[must_use]
    pub fn with_key(mut self, key: TaskKey) -> Self {
        self.key = key;
        self
    }

    fn notify_detached(&self) {
        trace!(task = %self.key, "UI sink is detached, task cancelled");
        let listener = self
            .cancel_listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener(&self.key);
        }
    }
}

#[async_trait]
impl<R: Send + 'static> Task for LongRunningTask<R> {
    fn key(&self) -> TaskKey {
        self.key.clone()
    }

    async fn run(&self) -> anyhow::Result<()> {
        trace!(task = %self.key, "running background work");
        let result = match (self.work)().await {
            Ok(result) => result,
            Err(e) if e.downcast_ref::<SinkDetached>().is_some() => {
                self.notify_detached();
                return Ok(());
            }
            Err(e) => {
                warn!(task = %self.key, error = %e, "background work failed");
                return Ok(());
            }
        };
        trace!(task = %self.key, "background work done");

        let Some(callback) = self.callback.upgrade() else {
            trace!(task = %self.key, "result callback dropped, discarding result");
            return Ok(());
        };
        if !self.sink.is_attached() {
            self.notify_detached();
            return Ok(());
        }

        let sink = Arc::clone(&self.sink);
        let key = self.key.clone();
        let delivery: UiJob = Box::new(move || {
            callback(result);
            trace!(task = %key, "UI callback done");
            match sink.push_mode() {
                PushMode::Manual => match sink.push() {
                    Ok(()) => trace!(task = %key, "pushed"),
                    Err(e) => trace!(task = %key, error = %e, "UI sink detached before push"),
                },
                PushMode::Disabled => {
                    error!(task = %key, "push is disabled, result will not be shown");
                }
                PushMode::Automatic => {}
            }
        });

        if self.sink.access(delivery).is_err() {
            self.notify_detached();
        }
        Ok(())
    }

    fn set_cancel_listener(&self, listener: CancelListener) {
        *self
            .cancel_listener
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(listener);
    }
}
