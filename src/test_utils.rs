//! Shared test utilities used across multiple test modules.

use crate::automation::resource::{
    ControllerFactory, InstanceAction, InstanceController, InstanceState, InstanceStateChange,
    Region,
};
use crate::task::{Task, TaskKey};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded controller call: region, action, instance ids.
pub type ControllerCall = (String, InstanceAction, Vec<String>);

/// Controller factory that records every call instead of reaching a provider.
#[derive(Clone, Default)]
pub struct RecordingControllers {
    calls: Arc<Mutex<Vec<ControllerCall>>>,
    failure: Option<String>,
}

impl RecordingControllers {
    /// Factory whose controllers record the call, then fail with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            calls: Arc::default(),
            failure: Some(message.to_owned()),
        }
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().expect("calls lock").clone()
    }
}

struct RecordingController {
    region: Region,
    calls: Arc<Mutex<Vec<ControllerCall>>>,
    failure: Option<String>,
}

impl RecordingController {
    fn record(
        &self,
        action: InstanceAction,
        ids: &[String],
        previous: InstanceState,
        current: InstanceState,
    ) -> anyhow::Result<Vec<InstanceStateChange>> {
        self.calls.lock().expect("calls lock").push((
            self.region.to_string(),
            action,
            ids.to_vec(),
        ));
        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }
        Ok(ids
            .iter()
            .map(|id| InstanceStateChange {
                instance_id: id.clone(),
                previous,
                current,
            })
            .collect())
    }
}

#[async_trait]
impl InstanceController for RecordingController {
    async fn start_instances(&self, ids: &[String]) -> anyhow::Result<Vec<InstanceStateChange>> {
        self.record(
            InstanceAction::Start,
            ids,
            InstanceState::Stopped,
            InstanceState::Pending,
        )
    }

    async fn stop_instances(&self, ids: &[String]) -> anyhow::Result<Vec<InstanceStateChange>> {
        self.record(
            InstanceAction::Stop,
            ids,
            InstanceState::Running,
            InstanceState::Stopping,
        )
    }
}

impl ControllerFactory for RecordingControllers {
    fn for_region(&self, region: &Region) -> Arc<dyn InstanceController> {
        Arc::new(RecordingController {
            region: region.clone(),
            calls: Arc::clone(&self.calls),
            failure: self.failure.clone(),
        })
    }
}

/// Task that only counts how often it ran.
pub struct CountingTask {
    key: TaskKey,
    runs: Arc<AtomicUsize>,
}

impl CountingTask {
    /// Fresh task with a unique key and a zeroed counter.
    pub fn new() -> Self {
        Self {
            key: TaskKey::unique(),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared run counter.
    pub fn runs(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }
}

#[async_trait]
impl Task for CountingTask {
    fn key(&self) -> TaskKey {
        self.key.clone()
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
