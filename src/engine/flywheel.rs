//! The orchestrator.
//!
//! Owns the workflows by task name. `fire` runs one workflow with
//! per-task single-flight, applies any cadence change the outcome carries,
//! then rearms the task whatever happened, all inside one spawned task.
//! `tick` fires every due task in order. Nothing here returns an error:
//! the control loop must never stop.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::Workflow;
use crate::scheduler::{Scheduler, TaskName};
use crate::types::WorkflowOutcome;

pub struct Flywheel {
    scheduler: Arc<Scheduler>,
    workflows: BTreeMap<TaskName, Arc<dyn Workflow>>,
    running: Arc<Mutex<HashSet<TaskName>>>,
}

/// Removes the task from the running set when dropped.
struct RunningGuard {
    running: Arc<Mutex<HashSet<TaskName>>>,
    task: TaskName,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.task);
    }
}

impl Flywheel {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            workflows: BTreeMap::new(),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn Workflow>) -> Self {
        self.workflows.insert(workflow.task(), workflow);
        self
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn has_task(&self, task: TaskName) -> bool {
        self.workflows.contains_key(&task)
    }

    pub fn is_running(&self, task: TaskName) -> bool {
        self.running.lock().contains(&task)
    }

    fn try_start(&self, task: TaskName) -> Option<RunningGuard> {
        if !self.running.lock().insert(task) {
            return None;
        }
        Some(RunningGuard {
            running: self.running.clone(),
            task,
        })
    }

    /// Run `task` now.
    ///
    /// The run, its cadence changes and the rearm happen in one spawned
    /// task that owns the running guard. Dropping the returned future
    /// detaches from that task without cutting it short.
    pub async fn fire(&self, task: TaskName) -> WorkflowOutcome {
        let Some(workflow) = self.workflows.get(&task).cloned() else {
            warn!(task = %task, "No workflow registered for task");
            return WorkflowOutcome::failed(format!("no workflow registered for {task}"));
        };
        let Some(running) = self.try_start(task) else {
            info!(task = %task, "Previous run still in progress, skipping");
            return WorkflowOutcome::skipped("already_running");
        };

        info!(task = %task, "Firing workflow");
        let scheduler = self.scheduler.clone();
        let handle = tokio::spawn(async move {
            let outcome = run_isolated(task, workflow).await;
            settle_timers(&scheduler, task, &outcome);
            drop(running);
            outcome
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task = %task, error = %e, "Workflow task aborted");
                WorkflowOutcome::failed(format!("workflow task aborted: {e}"))
            }
        }
    }

    /// Fire every task that is due at `now`, in tick order.
    pub async fn tick(&self, now: chrono::DateTime<Utc>) -> Vec<(TaskName, WorkflowOutcome)> {
        let mut outcomes = Vec::new();
        for task in self.scheduler.due(now) {
            if !self.has_task(task) {
                continue;
            }
            let outcome = self.fire(task).await;
            outcomes.push((task, outcome));
        }
        outcomes
    }
}

/// Run the workflow on its own task so a panic surfaces as a failed outcome.
async fn run_isolated(task: TaskName, workflow: Arc<dyn Workflow>) -> WorkflowOutcome {
    match tokio::spawn(async move { workflow.run().await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(task = %task, error = %e, "Workflow panicked");
            WorkflowOutcome::failed(format!("workflow panicked: {e}"))
        }
    }
}

/// Apply the outcome's cadence changes, then rearm `task` from now.
fn settle_timers(scheduler: &Scheduler, task: TaskName, outcome: &WorkflowOutcome) {
    let now = Utc::now();
    for change in &outcome.cadence {
        scheduler.set_interval(change.task, change.interval, now);
    }
    scheduler.rearm(task, now);

    if outcome.success {
        info!(task = %task, %outcome, "Workflow finished");
    } else {
        warn!(task = %task, %outcome, "Workflow finished with failure");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Cadence;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Workflow returning a fixed outcome, optionally waiting on a gate.
    struct Scripted {
        task: TaskName,
        outcome: WorkflowOutcome,
        runs: AtomicUsize,
        gate: Option<Arc<tokio::sync::Notify>>,
        panics: bool,
    }

    impl Scripted {
        fn new(task: TaskName, outcome: WorkflowOutcome) -> Self {
            Self {
                task,
                outcome,
                runs: AtomicUsize::new(0),
                gate: None,
                panics: false,
            }
        }
    }

    #[async_trait]
    impl Workflow for Scripted {
        fn task(&self) -> TaskName {
            self.task
        }

        async fn run(&self) -> WorkflowOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.panics {
                panic!("boom");
            }
            self.outcome.clone()
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        let scheduler = Arc::new(Scheduler::new());
        let now = Utc::now();
        scheduler.register(TaskName::FeeCollection, Duration::from_secs(300), Cadence::Adaptive, now);
        scheduler.register(TaskName::Redeploy, Duration::from_secs(900), Cadence::Adaptive, now);
        scheduler.register(TaskName::Buyback, Duration::from_secs(300), Cadence::Fixed, now);
        scheduler
    }

    #[tokio::test]
    async fn test_fire_rearms_after_failure() {
        let scheduler = scheduler();
        let flywheel = Flywheel::new(scheduler.clone()).with_workflow(Arc::new(Scripted::new(
            TaskName::FeeCollection,
            WorkflowOutcome::failed("rpc down"),
        )));

        let outcome = flywheel.fire(TaskName::FeeCollection).await;
        assert!(!outcome.success);

        let remaining = scheduler.time_remaining(TaskName::FeeCollection).unwrap();
        assert!(remaining > chrono::Duration::seconds(290));
        assert!(!flywheel.is_running(TaskName::FeeCollection));
    }

    #[tokio::test]
    async fn test_cadence_changes_applied_before_rearm() {
        let scheduler = scheduler();
        let outcome = WorkflowOutcome::skipped("no_gold")
            .with_cadence(TaskName::FeeCollection, Duration::from_secs(900))
            .with_cadence(TaskName::Redeploy, Duration::from_secs(10_800));
        let flywheel = Flywheel::new(scheduler.clone())
            .with_workflow(Arc::new(Scripted::new(TaskName::Redeploy, outcome)));

        flywheel.fire(TaskName::Redeploy).await;

        assert_eq!(scheduler.interval(TaskName::FeeCollection), Some(Duration::from_secs(900)));
        assert_eq!(scheduler.interval(TaskName::Redeploy), Some(Duration::from_secs(10_800)));
        let remaining = scheduler.time_remaining(TaskName::Redeploy).unwrap();
        assert!(remaining > chrono::Duration::seconds(10_790));
    }

    #[tokio::test]
    async fn test_tick_fires_only_due_tasks() {
        let scheduler = scheduler();
        let fee = Arc::new(Scripted::new(TaskName::FeeCollection, WorkflowOutcome::completed()));
        let redeploy = Arc::new(Scripted::new(TaskName::Redeploy, WorkflowOutcome::completed()));
        let flywheel = Flywheel::new(scheduler.clone())
            .with_workflow(fee.clone())
            .with_workflow(redeploy.clone());

        let outcomes = flywheel.tick(Utc::now()).await;
        assert!(outcomes.is_empty());

        let at = Utc::now() + chrono::Duration::seconds(301);
        let outcomes = flywheel.tick(at).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, TaskName::FeeCollection);
        assert_eq!(fee.runs.load(Ordering::SeqCst), 1);
        assert_eq!(redeploy.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_busy_task_is_not_reentered() {
        let scheduler = scheduler();
        let gate = Arc::new(tokio::sync::Notify::new());
        let mut slow = Scripted::new(TaskName::FeeCollection, WorkflowOutcome::completed());
        slow.gate = Some(gate.clone());
        let slow = Arc::new(slow);
        let flywheel = Arc::new(Flywheel::new(scheduler).with_workflow(slow.clone()));

        let first = {
            let flywheel = flywheel.clone();
            tokio::spawn(async move { flywheel.fire(TaskName::FeeCollection).await })
        };
        while !flywheel.is_running(TaskName::FeeCollection) {
            tokio::task::yield_now().await;
        }

        let second = flywheel.fire(TaskName::FeeCollection).await;
        assert!(second.skipped);
        assert_eq!(second.reason.as_deref(), Some("already_running"));

        gate.notify_one();
        let first = first.await.unwrap();
        assert!(first.success && !first.skipped);
        assert_eq!(slow.runs.load(Ordering::SeqCst), 1);
        assert!(!flywheel.is_running(TaskName::FeeCollection));
    }

    #[tokio::test]
    async fn test_dropped_fire_keeps_single_flight_and_cadence() {
        let scheduler = scheduler();
        let gate = Arc::new(tokio::sync::Notify::new());
        let outcome = WorkflowOutcome::skipped("no_gold")
            .with_cadence(TaskName::FeeCollection, Duration::from_secs(900))
            .with_cadence(TaskName::Redeploy, Duration::from_secs(10_800));
        let mut slow = Scripted::new(TaskName::Redeploy, outcome);
        slow.gate = Some(gate.clone());
        let slow = Arc::new(slow);
        let flywheel = Flywheel::new(scheduler.clone()).with_workflow(slow.clone());

        // Caller gives up while the workflow is still running.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), flywheel.fire(TaskName::Redeploy)).await;
        assert!(abandoned.is_err());
        assert!(flywheel.is_running(TaskName::Redeploy));

        let second = flywheel.fire(TaskName::Redeploy).await;
        assert_eq!(second.reason.as_deref(), Some("already_running"));

        gate.notify_one();
        for _ in 0..200 {
            if !flywheel.is_running(TaskName::Redeploy) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!flywheel.is_running(TaskName::Redeploy));
        assert_eq!(slow.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.interval(TaskName::FeeCollection), Some(Duration::from_secs(900)));
        assert_eq!(scheduler.interval(TaskName::Redeploy), Some(Duration::from_secs(10_800)));
        let remaining = scheduler.time_remaining(TaskName::Redeploy).unwrap();
        assert!(remaining > chrono::Duration::seconds(10_790));
    }

    #[tokio::test]
    async fn test_panicking_workflow_becomes_failure() {
        let scheduler = scheduler();
        let mut bad = Scripted::new(TaskName::Buyback, WorkflowOutcome::completed());
        bad.panics = true;
        let flywheel = Flywheel::new(scheduler.clone()).with_workflow(Arc::new(bad));

        let outcome = flywheel.fire(TaskName::Buyback).await;
        assert!(!outcome.success);
        assert!(scheduler.time_remaining(TaskName::Buyback).unwrap() > chrono::Duration::seconds(290));
        assert!(!flywheel.is_running(TaskName::Buyback));
    }

    #[tokio::test]
    async fn test_unregistered_workflow() {
        let flywheel = Flywheel::new(scheduler());
        assert!(!flywheel.has_task(TaskName::Snapshot));
        assert!(!flywheel.fire(TaskName::Snapshot).await.success);
    }
}
