//! Instance start/stop automation built on the scheduler.

pub mod resource;
pub mod service;
pub mod tasks;

pub use resource::{
    ControllerFactory, DryRunController, DryRunControllers, InstanceAction, InstanceController,
    InstanceState, InstanceStateChange, Region, ResourceRef,
};
pub use service::AutomationService;
pub use tasks::InstanceTask;
