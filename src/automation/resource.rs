//! Cloud instances and the controller that starts and stops them.

use crate::error::{AutopilotError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Cloud region name, e.g. `us-east-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Validate and wrap a region name.
    ///
    /// # Errors
    ///
    /// Returns [`AutopilotError::InvalidRegion`] for empty names or names with
    /// characters other than ASCII alphanumerics and `-`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if valid {
            Ok(Self(name.to_ascii_lowercase()))
        } else {
            Err(AutopilotError::InvalidRegion(name))
        }
    }

    /// The region name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Region {
    type Error = AutopilotError;

    fn try_from(name: String) -> Result<Self> {
        Self::new(name)
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.0
    }
}

impl std::str::FromStr for Region {
    type Err = AutopilotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One instance in one region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Instance id.
    pub instance_id: String,
    /// Region hosting the instance.
    pub region: Region,
}

impl ResourceRef {
    /// Refer to `instance_id` in `region`.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, region: Region) -> Self {
        Self {
            instance_id: instance_id.into(),
            region,
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.instance_id, self.region)
    }
}

/// Remote action an automation task issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceAction {
    /// Boot a stopped instance.
    Start,
    /// Shut a running instance down without terminating it.
    Stop,
}

impl std::fmt::Display for InstanceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// Instance lifecycle state, with the provider's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    /// State not reported yet (code `-1`).
    Unknown,
    /// Booting.
    Pending,
    /// Up and billed.
    Running,
    /// Being terminated.
    ShuttingDown,
    /// Gone for good.
    Terminated,
    /// On its way to `Stopped`.
    Stopping,
    /// Halted, can be started again.
    Stopped,
}

impl InstanceState {
    /// Numeric state code.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::Pending => 0,
            Self::Running => 16,
            Self::ShuttingDown => 32,
            Self::Terminated => 48,
            Self::Stopping => 64,
            Self::Stopped => 80,
        }
    }

    /// State for a numeric code. Only the low byte is significant.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        if code == -1 {
            return Some(Self::Unknown);
        }
        match code & 0xff {
            0 => Some(Self::Pending),
            16 => Some(Self::Running),
            32 => Some(Self::ShuttingDown),
            48 => Some(Self::Terminated),
            64 => Some(Self::Stopping),
            80 => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Transition reported by the controller for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStateChange {
    /// Instance id.
    pub instance_id: String,
    /// State before the command.
    pub previous: InstanceState,
    /// State right after the command was accepted.
    pub current: InstanceState,
}

/// Issues start/stop commands for instances of one region.
#[async_trait]
pub trait InstanceController: Send + Sync {
    /// Ask the provider to start `ids`.
    async fn start_instances(&self, ids: &[String]) -> anyhow::Result<Vec<InstanceStateChange>>;

    /// Ask the provider to stop `ids`.
    async fn stop_instances(&self, ids: &[String]) -> anyhow::Result<Vec<InstanceStateChange>>;
}

/// Builds a controller per region.
pub trait ControllerFactory: Send + Sync {
    /// Controller bound to `region`.
    fn for_region(&self, region: &Region) -> Arc<dyn InstanceController>;
}

/// Controller that only logs what it would do.
#[derive(Debug, Clone)]
pub struct DryRunController {
    region: Region,
}

impl DryRunController {
    /// Controller that only logs commands for `region`.
    #[must_use]
    pub fn new(region: Region) -> Self {
        Self { region }
    }
}

#[async_trait]
impl InstanceController for DryRunController {
    async fn start_instances(&self, ids: &[String]) -> anyhow::Result<Vec<InstanceStateChange>> {
        info!(region = %self.region, ?ids, "dry run: start instances");
        Ok(ids
            .iter()
            .map(|id| InstanceStateChange {
                instance_id: id.clone(),
                previous: InstanceState::Stopped,
                current: InstanceState::Pending,
            })
            .collect())
    }

    async fn stop_instances(&self, ids: &[String]) -> anyhow::Result<Vec<InstanceStateChange>> {
        info!(region = %self.region, ?ids, "dry run: stop instances");
        Ok(ids
            .iter()
            .map(|id| InstanceStateChange {
                instance_id: id.clone(),
                previous: InstanceState::Running,
                current: InstanceState::Stopping,
            })
            .collect())
    }
}

/// Factory producing [`DryRunController`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunControllers;

impl ControllerFactory for DryRunControllers {
    fn for_region(&self, region: &Region) -> Arc<dyn InstanceController> {
        Arc::new(DryRunController::new(region.clone()))
    }
}
