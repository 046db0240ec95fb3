//! Start and stop commands for one instance.

use super::resource::{ControllerFactory, InstanceAction, ResourceRef};
use crate::task::{Task, TaskKey};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Issues one start or stop command for one instance.
///
/// Two tasks with the same action and instance share a [`TaskKey`], so
/// planning either of them replaces the other.
pub struct InstanceTask {
    action: InstanceAction,
    resource: ResourceRef,
    controllers: Arc<dyn ControllerFactory>,
}

impl InstanceTask {
    /// Task starting `resource`.
    #[must_use]
    pub fn start(resource: ResourceRef, controllers: Arc<dyn ControllerFactory>) -> Self {
        Self {
            action: InstanceAction::Start,
            resource,
            controllers,
        }
    }

    /// Task stopping `resource`.
    #[must_use]
    pub fn stop(resource: ResourceRef, controllers: Arc<dyn ControllerFactory>) -> Self {
        Self {
            action: InstanceAction::Stop,
            resource,
            controllers,
        }
    }

    /// What this task does when it fires.
    #[must_use]
    pub fn action(&self) -> InstanceAction {
        self.action
    }

    /// The instance the action targets.
    #[must_use]
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }
}

impl std::fmt::Debug for InstanceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceTask")
            .field("action", &self.action)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Task for InstanceTask {
    fn key(&self) -> TaskKey {
        TaskKey::Instance {
            action: self.action,
            resource: self.resource.clone(),
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        let controller = self.controllers.for_region(&self.resource.region);
        let ids = vec![self.resource.instance_id.clone()];
        debug!(action = %self.action, instance = %self.resource, "issuing instance command");
        let changes = match self.action {
            InstanceAction::Start => controller.start_instances(&ids).await?,
            InstanceAction::Stop => controller.stop_instances(&ids).await?,
        };
        for change in &changes {
            info!(
                action = %self.action,
                instance = %change.instance_id,
                previous = ?change.previous,
                current = ?change.current,
                "instance state changed"
            );
        }
        Ok(())
    }
}
