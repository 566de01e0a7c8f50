//! Named-task scheduler.
//!
//! Owns one countdown timer per task. Adaptive tasks (fee collection,
//! redeploy) can have their interval switched by workflow outcomes; fixed
//! tasks (buyback, snapshot) keep their configured cadence. State lives in
//! process memory only, so a restart resets every timer to its default.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Task names
// ---------------------------------------------------------------------------

/// A schedulable workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    FeeCollection,
    Redeploy,
    Buyback,
    Snapshot,
}

impl TaskName {
    /// Tick order: due tasks fire in this sequence.
    pub const ALL: &'static [TaskName] = &[
        TaskName::FeeCollection,
        TaskName::Redeploy,
        TaskName::Buyback,
        TaskName::Snapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::FeeCollection => "fee_collection",
            TaskName::Redeploy => "redeploy",
            TaskName::Buyback => "buyback",
            TaskName::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts both `fee_collection` and `fee-collection`.
impl std::str::FromStr for TaskName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fee_collection" | "fees" => Ok(TaskName::FeeCollection),
            "redeploy" => Ok(TaskName::Redeploy),
            "buyback" | "finish_redeploy" => Ok(TaskName::Buyback),
            "snapshot" => Ok(TaskName::Snapshot),
            _ => Err(anyhow::anyhow!("Unknown task: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Timer state
// ---------------------------------------------------------------------------

/// How a task's interval behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Interval never changes after registration.
    Fixed,
    /// Interval may be switched by workflow outcomes.
    Adaptive,
}

#[derive(Debug, Clone)]
struct TimerEntry {
    cadence: Cadence,
    default_interval: Duration,
    interval: Duration,
    next_fire: DateTime<Utc>,
}

/// Read-only view of one timer, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TimerView {
    pub task: TaskName,
    pub cadence: Cadence,
    pub interval_secs: u64,
    pub next_fire: DateTime<Utc>,
    pub remaining_secs: i64,
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns the named timers. Shared behind an `Arc` between the control loop,
/// the workflows' cadence commands and the status surface.
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: Mutex<BTreeMap<TaskName, TimerEntry>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a task. Its first fire is one interval
    /// from `now`.
    pub fn register(&self, task: TaskName, interval: Duration, cadence: Cadence, now: DateTime<Utc>) {
        let entry = TimerEntry {
            cadence,
            default_interval: interval,
            interval,
            next_fire: now + to_chrono(interval),
        };
        self.timers.lock().insert(task, entry);
        debug!(task = %task, interval_secs = interval.as_secs(), ?cadence, "Timer registered");
    }

    pub fn is_registered(&self, task: TaskName) -> bool {
        self.timers.lock().contains_key(&task)
    }

    /// Time until `task` fires, measured from `now`. Negative when overdue;
    /// `None` for unregistered tasks.
    pub fn time_remaining_at(&self, task: TaskName, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.timers.lock().get(&task).map(|t| t.next_fire - now)
    }

    pub fn time_remaining(&self, task: TaskName) -> Option<chrono::Duration> {
        self.time_remaining_at(task, Utc::now())
    }

    /// Tasks whose remaining time is zero or below, in tick order.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<TaskName> {
        let timers = self.timers.lock();
        TaskName::ALL
            .iter()
            .copied()
            .filter(|t| timers.get(t).is_some_and(|e| e.next_fire <= now))
            .collect()
    }

    /// Arm the next fire one current interval after `now`.
    pub fn rearm(&self, task: TaskName, now: DateTime<Utc>) {
        if let Some(entry) = self.timers.lock().get_mut(&task) {
            entry.next_fire = now + to_chrono(entry.interval);
            debug!(task = %task, next_fire = %entry.next_fire, "Timer rearmed");
        }
    }

    /// Switch an adaptive task to a new interval and rearm it from `now`.
    /// Returns false (and leaves the timer untouched) for fixed or
    /// unregistered tasks.
    pub fn set_interval(&self, task: TaskName, interval: Duration, now: DateTime<Utc>) -> bool {
        let mut timers = self.timers.lock();
        let Some(entry) = timers.get_mut(&task) else {
            warn!(task = %task, "Cadence change for unregistered task ignored");
            return false;
        };
        if entry.cadence == Cadence::Fixed {
            warn!(task = %task, "Cadence change for fixed task ignored");
            return false;
        }
        if entry.interval != interval {
            info!(
                task = %task,
                from_secs = entry.interval.as_secs(),
                to_secs = interval.as_secs(),
                "Switching cadence"
            );
        }
        entry.interval = interval;
        entry.next_fire = now + to_chrono(interval);
        true
    }

    pub fn interval(&self, task: TaskName) -> Option<Duration> {
        self.timers.lock().get(&task).map(|t| t.interval)
    }

    pub fn next_fire(&self, task: TaskName) -> Option<DateTime<Utc>> {
        self.timers.lock().get(&task).map(|t| t.next_fire)
    }

    /// Restore every task to its registered default interval.
    pub fn reset_to_defaults(&self, now: DateTime<Utc>) {
        for entry in self.timers.lock().values_mut() {
            entry.interval = entry.default_interval;
            entry.next_fire = now + to_chrono(entry.interval);
        }
    }

    /// All timers in tick order.
    pub fn timers(&self, now: DateTime<Utc>) -> Vec<TimerView> {
        let timers = self.timers.lock();
        TaskName::ALL
            .iter()
            .filter_map(|task| {
                timers.get(task).map(|e| TimerView {
                    task: *task,
                    cadence: e.cadence,
                    interval_secs: e.interval.as_secs(),
                    next_fire: e.next_fire,
                    remaining_secs: (e.next_fire - now).num_seconds(),
                })
            })
            .collect()
    }
}

/// Render a remaining duration as `"4m 59s"` (`"-0m 10s"` when overdue).
pub fn format_remaining(remaining: chrono::Duration) -> String {
    let secs = remaining.num_seconds();
    let sign = if secs < 0 { "-" } else { "" };
    let abs = secs.unsigned_abs();
    format!("{sign}{}m {}s", abs / 60, abs % 60)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
