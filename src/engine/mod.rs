//! Core engine: the workflows the scheduler fires, and the orchestrator
//! that runs them.
//!
//! - `collector`: fee claim, sweep and conversion into the reserve asset
//! - `redeployer`: sells a fraction of reserve holdings back to native
//! - `buyback`: swaps settled native into the primary token
//! - `accountant`: PnL and point-in-time snapshots
//! - `reconciler`: startup resolution of stale pending events
//! - `flywheel`: single-flight firing and cadence application

pub mod accountant;
pub mod buyback;
pub mod collector;
pub mod flywheel;
pub mod reconciler;
pub mod redeployer;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::FlywheelError;
use crate::scheduler::TaskName;
use crate::storage::{LedgerStore, PendingDetails};
use crate::types::{Event, EventStatus, NewEvent, WorkflowOutcome};

/// A unit of work the scheduler can fire.
///
/// `run` never fails: implementations convert every error into a
/// `WorkflowOutcome` at their own boundary.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn task(&self) -> TaskName;

    async fn run(&self) -> WorkflowOutcome;
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Ledger writer for workflows. Write failures are logged and swallowed,
/// except when opening a pending event: an irreversible action never runs
/// without one.
#[derive(Clone)]
pub struct Journal {
    ledger: Arc<dyn LedgerStore>,
}

impl Journal {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Append an event, logging (not returning) any failure.
    pub async fn record(&self, event: NewEvent) -> Option<Event> {
        let event_type = event.event_type;
        match self.ledger.append(event).await {
            Ok(event) => Some(event),
            Err(e) => {
                error!(%event_type, error = %format!("{e:#}"), "Ledger write failed");
                None
            }
        }
    }

    /// Append a pending event ahead of an irreversible action.
    pub async fn open(&self, event: NewEvent) -> Result<Event, FlywheelError> {
        let event = NewEvent {
            status: EventStatus::Pending,
            ..event
        };
        self.ledger
            .append(event)
            .await
            .map_err(|e| FlywheelError::Persistence(format!("{e:#}")))
    }

    /// Attach what is known so far to a pending event. Failures are logged;
    /// the event still closes normally.
    pub async fn annotate(&self, id: i64, details: PendingDetails) -> Option<Event> {
        match self.ledger.annotate(id, details).await {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(id, error = %format!("{e:#}"), "Could not annotate pending event");
                None
            }
        }
    }

    /// Move a pending event to its terminal status.
    pub async fn close(
        &self,
        id: i64,
        status: EventStatus,
        tx_ref: Option<String>,
        error_message: Option<String>,
    ) -> Option<Event> {
        match self.ledger.update_status(id, status, tx_ref, error_message).await {
            Ok(event) => Some(event),
            Err(e) => {
                error!(id, %status, error = %format!("{e:#}"), "Ledger status update failed");
                None
            }
        }
    }

    /// Record a benign skip.
    pub async fn notice(&self, reason: &str, extra: serde_json::Value) -> Option<Event> {
        self.record(NewEvent::notice(reason).with_metadata(extra)).await
    }

    pub async fn system_error(&self, context: &str, message: impl Into<String>) -> Option<Event> {
        self.record(NewEvent::system_error(context, message)).await
    }
}

/// Workflow boundary: turn an inner result into an outcome. Configuration
/// errors degrade quietly; everything else is recorded as a `system_error`
/// under `context`.
pub async fn settle(
    journal: &Journal,
    context: &str,
    result: Result<WorkflowOutcome, FlywheelError>,
) -> WorkflowOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(FlywheelError::Configuration(what)) => {
            warn!(context, missing = %what, "Workflow not configured, skipping");
            WorkflowOutcome::skipped("not_configured")
        }
        Err(e) => {
            error!(context, error = %e, "Workflow failed");
            journal.system_error(context, e.to_string()).await;
            WorkflowOutcome::failed(e.to_string())
        }
    }
}
