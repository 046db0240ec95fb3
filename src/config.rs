//! Configuration types for the scheduler, the background executor and the
//! automations planned at startup.

use crate::automation::resource::{Region, ResourceRef};
use crate::error::{AutopilotError, Result};
use crate::scheduler::CollisionPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    /// Planned-task registry settings.
    pub scheduler: SchedulerConfig,
    /// Immediate background execution settings.
    pub background: BackgroundConfig,
    /// Automations planned when the daemon starts.
    #[serde(rename = "automation")]
    pub automations: Vec<AutomationEntry>,
}

/// Task registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scans for due tasks. Due-times are not honoured more
    /// precisely than this.
    pub poll_interval_secs: u64,
    /// Seconds `stop` waits for running tasks before abandoning them.
    pub shutdown_timeout_secs: u64,
    /// Maximum number of planned tasks running at once.
    pub max_concurrent_runs: usize,
    /// What happens when two different tasks are planned for the same instant.
    pub collision_policy: CollisionPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            shutdown_timeout_secs: 30,
            max_concurrent_runs: 128,
            collision_policy: CollisionPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Shutdown bound as a [`Duration`].
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Background executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Seconds `stop` waits for in-flight executions before abandoning them.
    pub shutdown_timeout_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

impl BackgroundConfig {
    /// Shutdown bound as a [`Duration`].
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Which composite automation an entry installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    /// Start now, stop at `stop_at`.
    StartTill,
    /// Start at `start_at`, stop at `stop_at`.
    RunBetween,
    /// Stop at `stop_at`.
    StopOn,
}

/// One automation installed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationEntry {
    /// EC2 instance id, e.g. `i-0abc`.
    pub instance_id: String,
    /// Region name, e.g. `us-east-1`.
    pub region: String,
    /// Composite operation to install.
    pub mode: AutomationMode,
    /// Start time (RFC 3339), required for `run_between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// Stop time (RFC 3339), required for every mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_at: Option<DateTime<Utc>>,
}

impl AutomationEntry {
    /// Target instance of the entry.
    ///
    /// # Errors
    ///
    /// Returns [`AutopilotError::InvalidRegion`] for a malformed region.
    pub fn resource(&self) -> Result<ResourceRef> {
        Ok(ResourceRef::new(
            self.instance_id.clone(),
            Region::new(&self.region)?,
        ))
    }

    fn validate(&self) -> Result<()> {
        if self.instance_id.trim().is_empty() {
            return Err(AutopilotError::Config(
                "automation instance_id must not be empty".to_owned(),
            ));
        }
        self.resource()?;
        let Some(stop_at) = self.stop_at else {
            return Err(AutopilotError::Config(format!(
                "automation for {} needs stop_at",
                self.instance_id
            )));
        };
        match (self.mode, self.start_at) {
            (AutomationMode::RunBetween, None) => Err(AutopilotError::Config(format!(
                "run_between automation for {} needs start_at",
                self.instance_id
            ))),
            (AutomationMode::RunBetween, Some(start_at)) if start_at >= stop_at => {
                Err(AutopilotError::Config(format!(
                    "automation for {} starts after it stops",
                    self.instance_id
                )))
            }
            _ => Ok(()),
        }
    }
}

impl AutopilotConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| AutopilotError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AutopilotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges and automation entries.
    ///
    /// # Errors
    ///
    /// Returns [`AutopilotError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(AutopilotError::Config(
                "scheduler.poll_interval_secs must be positive".to_owned(),
            ));
        }
        if self.scheduler.max_concurrent_runs == 0 {
            return Err(AutopilotError::Config(
                "scheduler.max_concurrent_runs must be positive".to_owned(),
            ));
        }
        for entry in &self.automations {
            entry.validate()?;
        }
        Ok(())
    }

    /// Returns the default config file path.
    ///
    /// `AUTOPILOT_CONFIG_DIR` overrides the platform config directory.
    pub fn default_config_path() -> PathBuf {
        if let Some(dir) = std::env::var_os("AUTOPILOT_CONFIG_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        dirs::config_dir()
            .map(|d| d.join("ec2-autopilot"))
            .unwrap_or_else(|| PathBuf::from("/tmp/ec2-autopilot"))
            .join("config.toml")
    }
}
