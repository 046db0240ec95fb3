//! Instance plans end to end: planning, replacing and firing.

use crate::helpers::{CommandLog, eventually, fast_scheduler, instance};
use autopilot::{AutomationService, Schedule, ServiceManager, TaskKey};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn sooner_stop_replaces_later_stop() {
    let automation = AutomationService::new(fast_scheduler(), Arc::new(CommandLog::default()));
    let r = instance("i-abc");

    automation
        .stop_on(&r, Schedule::after(ChronoDuration::minutes(10)))
        .unwrap();
    let sooner = Schedule::after(ChronoDuration::minutes(5));
    automation.stop_on(&r, sooner).unwrap();

    let plans = automation.plans_for_instance("i-abc");
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].key, TaskKey::stop(r.clone()));
    assert_eq!(plans[0].schedule, sooner);
}

#[test]
fn repeated_run_between_leaves_one_start_and_one_stop() {
    let automation = AutomationService::new(fast_scheduler(), Arc::new(CommandLog::default()));
    let r = instance("i-abc");
    let start_at = Schedule::after(ChronoDuration::hours(1));
    let stop_at = Schedule::after(ChronoDuration::hours(9));

    automation.run_between(&r, start_at, stop_at).unwrap();
    automation.run_between(&r, start_at, stop_at).unwrap();

    assert_eq!(automation.start_schedule(&r), Some(start_at));
    assert_eq!(automation.stop_schedule(&r), Some(stop_at));
    assert_eq!(automation.plans_for_instance("i-abc").len(), 2);
}

#[tokio::test]
async fn start_till_fires_both_commands_through_services() {
    let scheduler = fast_scheduler();
    let log = CommandLog::default();
    let automation = AutomationService::new(scheduler.clone(), Arc::new(log.clone()));

    let mut services = ServiceManager::new();
    services.add(Arc::new(scheduler.clone()));
    services.add(Arc::new(automation.clone()));
    services.start().await.unwrap();

    let r = instance("i-42");
    automation
        .start_till(&r, Schedule::after(ChronoDuration::seconds(-1)))
        .unwrap();

    assert!(eventually(Duration::from_secs(2), || log.commands().len() == 2).await);
    let mut commands = log.commands();
    commands.sort();
    assert_eq!(commands, vec!["start i-42@us-east-1", "stop i-42@us-east-1"]);
    assert!(!automation.has_plan(&r));

    services.stop().await.unwrap();
}

#[tokio::test]
async fn cancelled_plan_never_reaches_the_controller() {
    let scheduler = fast_scheduler();
    let log = CommandLog::default();
    let automation = AutomationService::new(scheduler.clone(), Arc::new(log.clone()));
    let r = instance("i-7");

    automation
        .stop_on(&r, Schedule::after(ChronoDuration::seconds(-1)))
        .unwrap();
    assert_eq!(automation.cancel_plans(&r), 1);
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(log.commands().is_empty());
    scheduler.stop().await.unwrap();
}
