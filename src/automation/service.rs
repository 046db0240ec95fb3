//! Composite start/stop plans for instances.
//!
//! Every composite operation replaces whatever is planned for the instance
//! with the new start and/or stop in one scheduler step. An instance
//! therefore never has more than one pending start and one pending stop.

use super::resource::{ControllerFactory, InstanceAction, ResourceRef};
use super::tasks::InstanceTask;
use crate::config::{AutomationEntry, AutomationMode};
use crate::error::{AutopilotError, Result};
use crate::scheduler::{PlannedTask, Schedule, Scheduler};
use crate::service::Service;
use crate::task::{Task, TaskKey};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// Plans instance starts and stops on a shared [`Scheduler`].
#[derive(Clone)]
pub struct AutomationService {
    scheduler: Scheduler,
    controllers: Arc<dyn ControllerFactory>,
}

impl AutomationService {
    /// Plan on `scheduler`, issuing commands through `controllers`.
    #[must_use]
    pub fn new(scheduler: Scheduler, controllers: Arc<dyn ControllerFactory>) -> Self {
        Self {
            scheduler,
            controllers,
        }
    }

    /// Start `resource` on the next poll and stop it at `stop_at`.
    ///
    /// # Errors
    ///
    /// Propagates a rejected plan from the scheduler's collision policy; the
    /// instance's previous plans are then kept unchanged.
    pub fn start_till(&self, resource: &ResourceRef, stop_at: Schedule) -> Result<()> {
        debug!(instance = %resource, %stop_at, "start till");
        self.install(
            resource,
            &[
                (InstanceAction::Start, Schedule::now()),
                (InstanceAction::Stop, stop_at),
            ],
        )
    }

    /// Start `resource` at `start_at` and stop it at `stop_at`.
    ///
    /// # Errors
    ///
    /// Propagates a rejected plan from the scheduler's collision policy; the
    /// instance's previous plans are then kept unchanged.
    pub fn run_between(
        &self,
        resource: &ResourceRef,
        start_at: Schedule,
        stop_at: Schedule,
    ) -> Result<()> {
        debug!(instance = %resource, %start_at, %stop_at, "run between");
        self.install(
            resource,
            &[
                (InstanceAction::Start, start_at),
                (InstanceAction::Stop, stop_at),
            ],
        )
    }

    /// Stop `resource` at `stop_at`.
    ///
    /// # Errors
    ///
    /// Propagates a rejected plan from the scheduler's collision policy; the
    /// instance's previous plans are then kept unchanged.
    pub fn stop_on(&self, resource: &ResourceRef, stop_at: Schedule) -> Result<()> {
        debug!(instance = %resource, %stop_at, "stop on");
        self.install(resource, &[(InstanceAction::Stop, stop_at)])
    }

    /// Drop every pending start and stop of `resource`. Returns how many were dropped.
    pub fn cancel_plans(&self, resource: &ResourceRef) -> usize {
        let mut cancelled = 0;
        for planned in self.plans_for(resource) {
            if self.scheduler.cancel(&planned.key) {
                trace!(task = %planned.key, "plan cancelled");
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(instance = %resource, cancelled, "cancelled plans");
        }
        cancelled
    }

    /// Whether `resource` has a pending start or stop.
    #[must_use]
    pub fn has_plan(&self, resource: &ResourceRef) -> bool {
        self.start_schedule(resource).is_some() || self.stop_schedule(resource).is_some()
    }

    /// Due-time of the pending start of `resource`.
    #[must_use]
    pub fn start_schedule(&self, resource: &ResourceRef) -> Option<Schedule> {
        self.scheduler.find(&TaskKey::start(resource.clone()))
    }

    /// Due-time of the pending stop of `resource`.
    #[must_use]
    pub fn stop_schedule(&self, resource: &ResourceRef) -> Option<Schedule> {
        self.scheduler.find(&TaskKey::stop(resource.clone()))
    }

    /// Pending plans for `instance_id` in any region, earliest first.
    #[must_use]
    pub fn plans_for_instance(&self, instance_id: &str) -> Vec<PlannedTask> {
        self.scheduler.find_where(|planned| {
            planned
                .key
                .resource()
                .is_some_and(|resource| resource.instance_id == instance_id)
        })
    }

    /// Install one configured automation.
    ///
    /// # Errors
    ///
    /// Returns [`AutopilotError::Config`] when the entry lacks a time its
    /// mode needs, or a region or collision error.
    pub fn apply(&self, entry: &AutomationEntry) -> Result<()> {
        let resource = entry.resource()?;
        let missing = |field: &str| {
            AutopilotError::Config(format!("automation for {resource} needs {field}"))
        };
        let stop_at = Schedule::at(entry.stop_at.ok_or_else(|| missing("stop_at"))?);
        match entry.mode {
            AutomationMode::StartTill => self.start_till(&resource, stop_at),
            AutomationMode::RunBetween => {
                let start_at = Schedule::at(entry.start_at.ok_or_else(|| missing("start_at"))?);
                self.run_between(&resource, start_at, stop_at)
            }
            AutomationMode::StopOn => self.stop_on(&resource, stop_at),
        }
    }

    fn plans_for(&self, resource: &ResourceRef) -> Vec<PlannedTask> {
        self.scheduler
            .find_where(|planned| planned.key.resource() == Some(resource))
    }

    /// Replace every plan of `resource` with `actions` in one scheduler step,
    /// so a rejected action leaves the previous plans in place.
    fn install(&self, resource: &ResourceRef, actions: &[(InstanceAction, Schedule)]) -> Result<()> {
        let plans: Vec<(Arc<dyn Task>, Schedule)> = actions
            .iter()
            .map(|&(action, when)| {
                let controllers = Arc::clone(&self.controllers);
                let task = match action {
                    InstanceAction::Start => InstanceTask::start(resource.clone(), controllers),
                    InstanceAction::Stop => InstanceTask::stop(resource.clone(), controllers),
                };
                (Arc::new(task) as Arc<dyn Task>, when)
            })
            .collect();
        let replaced = self
            .scheduler
            .replan(|key| key.resource() == Some(resource), plans)?;
        if replaced > 0 {
            debug!(instance = %resource, replaced, "previous plans replaced");
        }
        Ok(())
    }
}

#[async_trait]
impl Service for AutomationService {
    fn name(&self) -> &str {
        "automation"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
