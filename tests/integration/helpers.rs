//! Shared helpers for integration tests.

use async_trait::async_trait;
use autopilot::automation::{
    ControllerFactory, InstanceController, InstanceState, InstanceStateChange, Region,
};
use autopilot::config::SchedulerConfig;
use autopilot::{ResourceRef, Scheduler};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Controller factory recording `"<action> <id>@<region>"` per instance command.
#[derive(Clone, Default)]
pub(crate) struct CommandLog {
    commands: Arc<Mutex<Vec<String>>>,
}

impl CommandLog {
    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

struct LoggingController {
    region: Region,
    commands: Arc<Mutex<Vec<String>>>,
}

impl LoggingController {
    fn log(&self, action: &str, ids: &[String], current: InstanceState) -> Vec<InstanceStateChange> {
        let mut commands = self.commands.lock().unwrap();
        ids.iter()
            .map(|id| {
                commands.push(format!("{action} {id}@{}", self.region));
                InstanceStateChange {
                    instance_id: id.clone(),
                    previous: InstanceState::Unknown,
                    current,
                }
            })
            .collect()
    }
}

#[async_trait]
impl InstanceController for LoggingController {
    async fn start_instances(&self, ids: &[String]) -> anyhow::Result<Vec<InstanceStateChange>> {
        Ok(self.log("start", ids, InstanceState::Pending))
    }

    async fn stop_instances(&self, ids: &[String]) -> anyhow::Result<Vec<InstanceStateChange>> {
        Ok(self.log("stop", ids, InstanceState::Stopping))
    }
}

impl ControllerFactory for CommandLog {
    fn for_region(&self, region: &Region) -> Arc<dyn InstanceController> {
        Arc::new(LoggingController {
            region: region.clone(),
            commands: Arc::clone(&self.commands),
        })
    }
}

/// Scheduler polling every 20ms with a short shutdown bound.
pub(crate) fn fast_scheduler() -> Scheduler {
    Scheduler::new(&SchedulerConfig::default())
        .with_poll_interval(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_secs(2))
}

pub(crate) fn instance(id: &str) -> ResourceRef {
    ResourceRef::new(id, Region::new("us-east-1").unwrap())
}

/// Poll `condition` until it holds or `timeout` passes.
pub(crate) async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
