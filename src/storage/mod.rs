//! Persistence layer.
//!
//! The ledger is the system of record: an append-only event log whose rows
//! only ever move from `pending` to a terminal status, plus immutable
//! accounting snapshots. `LedgerStore` is the seam the engine writes through;
//! `sqlite` is the sqlx-backed implementation.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::{Event, EventStatus, EventType, LedgerTotals, NewEvent, Snapshot, SnapshotFields};

pub use sqlite::SqliteLedger;

/// Facts learned about a pending event while its action is in flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingDetails {
    pub amount_out: Option<Decimal>,
    pub token_out: Option<String>,
    pub tx_ref: Option<String>,
    /// Object merged key by key into the stored metadata.
    pub metadata: serde_json::Value,
}

impl PendingDetails {
    pub fn with_out(mut self, amount: Decimal, token: impl Into<String>) -> Self {
        self.amount_out = Some(amount);
        self.token_out = Some(token.into());
        self
    }

    pub fn with_tx(mut self, tx_ref: impl Into<String>) -> Self {
        self.tx_ref = Some(tx_ref.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new event and return it with its id and timestamp.
    async fn append(&self, event: NewEvent) -> Result<Event>;

    /// Move a pending event to `status`. `tx_ref` and `error` overwrite the
    /// stored values only when given. Fails if the event is not pending.
    async fn update_status(
        &self,
        id: i64,
        status: EventStatus,
        tx_ref: Option<String>,
        error: Option<String>,
    ) -> Result<Event>;

    /// Fill in details on a pending event without changing its status.
    /// Given fields overwrite, metadata keys merge. Fails if the event is
    /// not pending.
    async fn annotate(&self, id: i64, details: PendingDetails) -> Result<Event>;

    /// Most recent events first, optionally filtered to one type.
    async fn list_recent(&self, event_type: Option<EventType>, limit: i64) -> Result<Vec<Event>>;

    /// Per-type sums over successful events.
    async fn aggregate_totals(&self) -> Result<LedgerTotals>;

    async fn latest_snapshot(&self) -> Result<Option<Snapshot>>;

    async fn save_snapshot(&self, fields: SnapshotFields) -> Result<Snapshot>;

    /// Pending events created before `older_than`, oldest first.
    async fn list_stale_pending(&self, older_than: DateTime<Utc>) -> Result<Vec<Event>>;
}
