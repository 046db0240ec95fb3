//! Configured automations are loaded from TOML and installed.

use crate::helpers::{CommandLog, instance};
use autopilot::config::AutomationMode;
use autopilot::{AutomationService, AutopilotConfig, CollisionPolicy, Scheduler};
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
[scheduler]
poll_interval_secs = 5
collision_policy = "reject"

[background]
shutdown_timeout_secs = 3

[[automation]]
instance_id = "i-web"
region = "us-east-1"
mode = "run_between"
start_at = "2099-01-01T08:00:00Z"
stop_at = "2099-01-01T18:00:00Z"

[[automation]]
instance_id = "i-batch"
region = "us-east-1"
mode = "stop_on"
stop_at = "2099-01-02T00:00:00Z"
"#;

#[test]
fn config_file_drives_the_services() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = AutopilotConfig::from_file(&path).unwrap();
    assert_eq!(config.scheduler.poll_interval(), Duration::from_secs(5));
    assert_eq!(config.scheduler.collision_policy, CollisionPolicy::Reject);
    assert_eq!(config.background.shutdown_timeout(), Duration::from_secs(3));
    assert_eq!(config.automations[1].mode, AutomationMode::StopOn);

    let scheduler = Scheduler::new(&config.scheduler);
    let automation = AutomationService::new(scheduler.clone(), Arc::new(CommandLog::default()));
    for entry in &config.automations {
        automation.apply(entry).unwrap();
    }

    assert_eq!(scheduler.len(), 3);
    assert!(automation.start_schedule(&instance("i-web")).is_some());
    assert!(automation.stop_schedule(&instance("i-batch")).is_some());
    assert_eq!(automation.start_schedule(&instance("i-batch")), None);
}

#[test]
fn invalid_entry_fails_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[[automation]]\ninstance_id = \"i-1\"\nregion = \"us-east-1\"\nmode = \"run_between\"\nstop_at = \"2099-01-01T18:00:00Z\"\n",
    )
    .unwrap();

    assert!(AutopilotConfig::from_file(&path).is_err());
}
