//! Shared types for the FLYWHEEL agent.
//!
//! These types form the data model used across all modules: ledger events,
//! accounting snapshots, lifetime totals and workflow outcomes. Engine,
//! storage and dashboard modules depend on them without depending on
//! each other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::scheduler::TaskName;

// ---------------------------------------------------------------------------
// Event enums
// ---------------------------------------------------------------------------

/// Kind of ledger event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FeeClaim,
    FeeSweep,
    FeeCollection,
    GoldPurchase,
    GoldSale,
    RedeployFinish,
    SystemNotice,
    SystemError,
    BotStart,
}

impl EventType {
    pub const ALL: &'static [EventType] = &[
        EventType::FeeClaim,
        EventType::FeeSweep,
        EventType::FeeCollection,
        EventType::GoldPurchase,
        EventType::GoldSale,
        EventType::RedeployFinish,
        EventType::SystemNotice,
        EventType::SystemError,
        EventType::BotStart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FeeClaim => "fee_claim",
            EventType::FeeSweep => "fee_sweep",
            EventType::FeeCollection => "fee_collection",
            EventType::GoldPurchase => "gold_purchase",
            EventType::GoldSale => "gold_sale",
            EventType::RedeployFinish => "redeploy_finish",
            EventType::SystemNotice => "system_notice",
            EventType::SystemError => "system_error",
            EventType::BotStart => "bot_start",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown event type: {s}"))
    }
}

/// Lifecycle status of a ledger event.
///
/// `Pending` is the only non-terminal state. `Unknown` is assigned by the
/// startup reconciler to pending events whose outcome cannot be verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Success,
    Failed,
    Skipped,
    Unknown,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Success => "success",
            EventStatus::Failed => "failed",
            EventStatus::Skipped => "skipped",
            EventStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "success" => Ok(EventStatus::Success),
            "failed" => Ok(EventStatus::Failed),
            "skipped" => Ok(EventStatus::Skipped),
            "unknown" => Ok(EventStatus::Unknown),
            _ => Err(anyhow::anyhow!("Unknown event status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A persisted ledger event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub event_type: EventType,
    pub amount_in: Option<Decimal>,
    pub amount_out: Option<Decimal>,
    pub token_in: Option<String>,
    pub token_out: Option<String>,
    pub tx_ref: Option<String>,
    pub status: EventStatus,
    pub error_message: Option<String>,
    /// Opaque key/value context (reason, exchange id, error context…).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Read a string field out of the metadata object.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} [{}]", self.id, self.event_type, self.status)?;
        if let Some(amount) = self.amount_in {
            write!(f, " in={amount} {}", self.token_in.as_deref().unwrap_or(""))?;
        }
        if let Some(amount) = self.amount_out {
            write!(f, " out={amount} {}", self.token_out.as_deref().unwrap_or(""))?;
        }
        if let Some(ref tx) = self.tx_ref {
            write!(f, " tx={tx}")?;
        }
        Ok(())
    }
}

/// Fields for appending a new event. Built with the chained setters.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub amount_in: Option<Decimal>,
    pub amount_out: Option<Decimal>,
    pub token_in: Option<String>,
    pub token_out: Option<String>,
    pub tx_ref: Option<String>,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: EventType, status: EventStatus) -> Self {
        Self {
            event_type,
            amount_in: None,
            amount_out: None,
            token_in: None,
            token_out: None,
            tx_ref: None,
            status,
            error_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// A `system_notice` event, status skipped, with `reason` in metadata.
    pub fn notice(reason: &str) -> Self {
        Self::new(EventType::SystemNotice, EventStatus::Skipped)
            .with_metadata(serde_json::json!({ "reason": reason }))
    }

    /// A `system_error` event, status failed, with `context` in metadata.
    pub fn system_error(context: &str, message: impl Into<String>) -> Self {
        Self::new(EventType::SystemError, EventStatus::Failed)
            .with_error(message)
            .with_metadata(serde_json::json!({ "context": context }))
    }

    pub fn with_in(mut self, amount: Decimal, token: impl Into<String>) -> Self {
        self.amount_in = Some(amount);
        self.token_in = Some(token.into());
        self
    }

    pub fn with_out(mut self, amount: Decimal, token: impl Into<String>) -> Self {
        self.amount_out = Some(amount);
        self.token_out = Some(token.into());
        self
    }

    pub fn with_tx(mut self, tx_ref: impl Into<String>) -> Self {
        self.tx_ref = Some(tx_ref.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Merge `metadata` into the existing metadata object.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        match (&mut self.metadata, metadata) {
            (serde_json::Value::Object(existing), serde_json::Value::Object(extra)) => {
                existing.extend(extra);
            }
            (slot, value) => *slot = value,
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Lifetime totals
// ---------------------------------------------------------------------------

/// Summed amounts for one event type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeTotals {
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub count: u64,
}

/// Per-type sums over successful events only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub by_type: BTreeMap<EventType, TypeTotals>,
}

impl LedgerTotals {
    /// Fold one event into the totals. Non-success events are ignored.
    pub fn add(
        &mut self,
        event_type: EventType,
        status: EventStatus,
        amount_in: Option<Decimal>,
        amount_out: Option<Decimal>,
    ) {
        if status != EventStatus::Success {
            return;
        }
        let entry = self.by_type.entry(event_type).or_default();
        entry.amount_in += amount_in.unwrap_or(Decimal::ZERO);
        entry.amount_out += amount_out.unwrap_or(Decimal::ZERO);
        entry.count += 1;
    }

    pub fn get(&self, event_type: EventType) -> TypeTotals {
        self.by_type.get(&event_type).copied().unwrap_or_default()
    }

    /// Native amount sent into fee conversion.
    pub fn fees_collected(&self) -> Decimal {
        self.get(EventType::FeeCollection).amount_in
    }

    /// Reserve asset expected from purchases.
    pub fn reserve_bought(&self) -> Decimal {
        self.get(EventType::GoldPurchase).amount_out
    }

    /// Reserve asset sent out by redeploys.
    pub fn reserve_sold(&self) -> Decimal {
        self.get(EventType::GoldSale).amount_in
    }

    /// Primary tokens acquired by buybacks.
    pub fn tokens_bought(&self) -> Decimal {
        self.get(EventType::RedeployFinish).amount_out
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Fields of a snapshot before insertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotFields {
    pub fee_vault_balance: Decimal,
    pub reserve_vault_balance: Decimal,
    pub treasury_balance: Decimal,
    pub reference_price: Option<Decimal>,
    pub cost_basis: Decimal,
    pub current_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub total_fees_collected: Decimal,
    pub total_reserve_bought: Decimal,
    pub total_reserve_sold: Decimal,
    pub total_tokens_bought: Decimal,
    pub next_fee_collection: Option<DateTime<Utc>>,
    pub next_redeploy: Option<DateTime<Utc>>,
    pub estimated_redeploy_value: Decimal,
    pub estimated_redeploy_units: Decimal,
    pub metadata: serde_json::Value,
}

/// An immutable accounting snapshot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    #[serde(flatten)]
    pub fields: SnapshotFields,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.fields;
        write!(
            f,
            "snapshot #{} | fee_vault={} reserve={} treasury={} | value=${:.2} pnl=${:.2}",
            self.id,
            s.fee_vault_balance,
            s.reserve_vault_balance,
            s.treasury_balance,
            s.current_value,
            s.total_pnl,
        )
    }
}

// ---------------------------------------------------------------------------
// Workflow outcome
// ---------------------------------------------------------------------------

/// A cadence change requested by a workflow as a side effect of its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceChange {
    pub task: TaskName,
    pub interval: std::time::Duration,
}

/// Structured result of one workflow run. Never an error: every failure is
/// converted into `success: false` at the workflow boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip)]
    pub cadence: Vec<CadenceChange>,
}

impl WorkflowOutcome {
    pub fn completed() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn skipped(reason: &str) -> Self {
        Self {
            success: true,
            skipped: true,
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_tx(mut self, tx_ref: impl Into<String>) -> Self {
        self.tx_ref = Some(tx_ref.into());
        self
    }

    pub fn with_exchange(mut self, exchange_id: impl Into<String>) -> Self {
        self.exchange_id = Some(exchange_id.into());
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_cadence(mut self, task: TaskName, interval: std::time::Duration) -> Self {
        self.cadence.retain(|c| c.task != task);
        self.cadence.push(CadenceChange { task, interval });
        self
    }
}

impl fmt::Display for WorkflowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.success, self.skipped) {
            (true, true) => write!(f, "skipped ({})", self.reason.as_deref().unwrap_or("-")),
            (true, false) => write!(f, "completed"),
            (false, _) => write!(f, "failed: {}", self.error.as_deref().unwrap_or("unknown")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
