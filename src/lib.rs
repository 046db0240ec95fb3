//! Autopilot: scheduled and single-flight background automation for cloud
//! instances.
//!
//! # Architecture
//!
//! - **Scheduler**: one-shot tasks planned against a due-time, keyed by
//!   identity, fired once by a polling loop into a bounded worker pool
//! - **Background executor**: immediate execution with at most one live run
//!   per task identity; resubmission cancels the earlier run
//! - **Long-running tasks**: background work whose result is marshalled onto
//!   a detachable UI sink
//! - **Automation**: start/stop plans for instances, issued through an
//!   [`automation::InstanceController`]
//!
//! Every long-lived component implements [`service::Service`] and is driven
//! by a [`service::ServiceManager`].

pub mod automation;
pub mod background;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod task;
pub mod ui;

#[cfg(test)]
pub(crate) mod test_utils;

pub use automation::{AutomationService, InstanceTask, Region, ResourceRef};
pub use background::{BackgroundExecutor, ExecutionHandle};
pub use config::AutopilotConfig;
pub use error::{AutopilotError, Result};
pub use scheduler::{CollisionPolicy, PlannedTask, Schedule, Scheduler};
pub use service::{Service, ServiceManager, ServiceState};
pub use task::{ExecutionOutcome, FnTask, LongRunningTask, Task, TaskKey};
