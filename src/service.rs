//! Start/stop lifecycle shared by the long-lived components.
//!
//! Services are registered with a [`ServiceManager`], started in
//! registration order and stopped in reverse order, so a service can rely
//! on everything registered before it while it runs.

use crate::error::{AutopilotError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, trace};

/// Lifecycle position of a component. Each component is single use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, not started.
    #[default]
    Idle,
    /// Started and accepting work.
    Running,
    /// Stopped; cannot be started again.
    Stopped,
}

impl ServiceState {
    /// Move to [`ServiceState::Running`], rejecting double and re-starts.
    pub(crate) fn begin_start(&mut self, name: &str) -> Result<()> {
        match self {
            Self::Idle => {
                *self = Self::Running;
                Ok(())
            }
            Self::Running => Err(AutopilotError::Lifecycle(format!(
                "{name} is already running"
            ))),
            Self::Stopped => Err(AutopilotError::Lifecycle(format!(
                "{name} cannot be restarted after stop"
            ))),
        }
    }

    /// Move to [`ServiceState::Stopped`]. Returns `false` when already stopped.
    pub(crate) fn begin_stop(&mut self) -> bool {
        let was_stopped = *self == Self::Stopped;
        *self = Self::Stopped;
        !was_stopped
    }
}

/// A component with an explicit start/stop lifecycle.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Allocate resources and begin work.
    async fn start(&self) -> Result<()>;

    /// Release resources. Must be safe to call on a never-started service.
    async fn stop(&self) -> Result<()>;
}

/// Ordered collection of services.
#[derive(Default)]
pub struct ServiceManager {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service; it starts after every service registered before it.
    pub fn add(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    /// Names of registered services, in start order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Start every service in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first start failure; later services are not started.
    pub async fn start(&self) -> Result<()> {
        info!("starting {} services", self.services.len());
        for service in &self.services {
            trace!(service = service.name(), "starting service");
            service.start().await?;
            trace!(service = service.name(), "service started");
        }
        info!("{} services started", self.services.len());
        Ok(())
    }

    /// Stop every service in reverse registration order.
    ///
    /// Every service is asked to stop even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure.
    pub async fn stop(&self) -> Result<()> {
        info!("stopping {} services", self.services.len());
        let mut first_error = None;
        for service in self.services.iter().rev() {
            trace!(service = service.name(), "stopping service");
            if let Err(e) = service.stop().await {
                error!(service = service.name(), error = %e, "service failed to stop");
                first_error.get_or_insert(e);
            }
        }
        info!("{} services stopped", self.services.len());
        first_error.map_or(Ok(()), Err)
    }
}
