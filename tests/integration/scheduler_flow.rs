//! Planned tasks fire once, re-plans replace, and shutdown drops the rest.

use crate::helpers::{eventually, fast_scheduler};
use autopilot::{FnTask, Schedule, Task, TaskKey};
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn counting(key: TaskKey, runs: &Arc<AtomicUsize>) -> Arc<dyn Task> {
    let runs = Arc::clone(runs);
    Arc::new(FnTask::with_key(key, move || {
        let runs = Arc::clone(&runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }))
}

#[tokio::test]
async fn past_due_task_fires_once_on_next_poll() {
    let scheduler = fast_scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    let key = TaskKey::unique();
    scheduler
        .plan(counting(key.clone(), &runs), Schedule::after(ChronoDuration::seconds(-5)))
        .unwrap();
    scheduler.start().unwrap();

    assert!(eventually(Duration::from_secs(2), || runs.load(Ordering::SeqCst) == 1).await);
    assert_eq!(scheduler.find(&key), None);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn replanned_task_fires_only_at_its_new_time() {
    let scheduler = fast_scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    let key = TaskKey::unique();
    scheduler
        .plan(counting(key.clone(), &runs), Schedule::after(ChronoDuration::seconds(-1)))
        .unwrap();
    scheduler
        .plan(counting(key.clone(), &runs), Schedule::after(ChronoDuration::hours(1)))
        .unwrap();
    scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.len(), 1);
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn task_planned_while_running_fires_too() {
    let scheduler = fast_scheduler();
    scheduler.start().unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    scheduler
        .plan(counting(TaskKey::unique(), &runs), Schedule::now())
        .unwrap();
    assert!(eventually(Duration::from_secs(2), || runs.load(Ordering::SeqCst) == 1).await);
    assert!(scheduler.is_empty());
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn task_can_replan_itself_while_running() {
    let scheduler = fast_scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    let key = TaskKey::unique();

    let handle = scheduler.clone();
    let counter = Arc::clone(&runs);
    let own_key = key.clone();
    let task: Arc<dyn Task> = Arc::new(FnTask::with_key(key.clone(), move || {
        let handle = handle.clone();
        let counter = Arc::clone(&counter);
        let own_key = own_key.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let follow_up: Arc<dyn Task> = Arc::new(FnTask::with_key(own_key, || async { Ok(()) }));
            handle.plan(follow_up, Schedule::after(ChronoDuration::hours(1)))?;
            Ok(())
        }
    }));
    scheduler
        .plan(task, Schedule::after(ChronoDuration::seconds(-1)))
        .unwrap();
    scheduler.start().unwrap();

    assert!(eventually(Duration::from_secs(2), || scheduler.find(&key).is_some()
        && runs.load(Ordering::SeqCst) == 1)
    .await);
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn stop_drops_future_plans() {
    let scheduler = fast_scheduler();
    let runs = Arc::new(AtomicUsize::new(0));
    scheduler
        .plan(counting(TaskKey::unique(), &runs), Schedule::after(ChronoDuration::hours(1)))
        .unwrap();
    scheduler.start().unwrap();
    scheduler.stop().await.unwrap();

    assert!(scheduler.is_empty());
    assert!(scheduler.planned().is_empty());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}
