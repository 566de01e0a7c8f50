//! Startup reconciliation of pending events.
//!
//! A crash between opening a pending event and closing it leaves the row
//! pending forever. On startup every pending event written by an earlier
//! process is resolved on its owning chain: from the transaction status
//! when a reference was persisted, else from the exchange deposit address
//! recorded before the transfer. Anything unverifiable moves to `unknown`.
//! Nothing is ever retried.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::Journal;
use crate::chains::ChainClient;
use crate::types::{Event, EventStatus, EventType};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unknown: usize,
}

pub struct Reconciler {
    primary_chain: Arc<dyn ChainClient>,
    reserve_chain: Arc<dyn ChainClient>,
    journal: Journal,
}

impl Reconciler {
    pub fn new(primary_chain: Arc<dyn ChainClient>, reserve_chain: Arc<dyn ChainClient>, journal: Journal) -> Self {
        Self {
            primary_chain,
            reserve_chain,
            journal,
        }
    }

    /// The chain that broadcasts the transfer behind `event_type`.
    fn chain_for(&self, event_type: EventType) -> &Arc<dyn ChainClient> {
        match event_type {
            EventType::GoldSale => &self.reserve_chain,
            _ => &self.primary_chain,
        }
    }

    async fn resolve(&self, event: &Event) -> (EventStatus, Option<String>) {
        match event.tx_ref.as_deref() {
            Some(tx_ref) => self.resolve_reference(event, tx_ref).await,
            None => match event.meta_str("deposit_address") {
                Some(deposit) => self.resolve_deposit(event, deposit).await,
                None => (
                    EventStatus::Unknown,
                    Some("interrupted before the transfer was prepared".into()),
                ),
            },
        }
    }

    async fn resolve_reference(&self, event: &Event, tx_ref: &str) -> (EventStatus, Option<String>) {
        let chain = self.chain_for(event.event_type);
        match chain.transaction_status(tx_ref).await {
            Ok(status) if status.landed() => (EventStatus::Success, None),
            Ok(status) => match status.error {
                Some(err) => (EventStatus::Failed, Some(err)),
                None => (
                    EventStatus::Unknown,
                    Some(format!("transaction {tx_ref} not confirmed on {}", chain.name())),
                ),
            },
            Err(e) => (
                EventStatus::Unknown,
                Some(format!("status lookup failed on {}: {e:#}", chain.name())),
            ),
        }
    }

    /// No reference was persisted, so look for the funds at the exchange
    /// deposit address instead.
    async fn resolve_deposit(&self, event: &Event, deposit: &str) -> (EventStatus, Option<String>) {
        let chain = self.chain_for(event.event_type);
        let balance = match event.meta_str("token_id") {
            Some(token_id) => chain.token_balance(deposit, token_id).await,
            None => chain.native_balance(deposit).await,
        };
        let expected = event.amount_in.unwrap_or(Decimal::ZERO);

        match balance {
            Ok(balance) if balance > Decimal::ZERO && balance >= expected => {
                info!(id = event.id, %deposit, %balance, "Deposit observed for interrupted transfer");
                (EventStatus::Success, None)
            }
            Ok(balance) => (
                EventStatus::Unknown,
                Some(format!(
                    "no transaction reference; {balance} at deposit {deposit} on {}",
                    chain.name()
                )),
            ),
            Err(e) => (
                EventStatus::Unknown,
                Some(format!("deposit lookup failed on {}: {e:#}", chain.name())),
            ),
        }
    }

    /// Resolve every pending event created before `older_than`.
    pub async fn reconcile(&self, older_than: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let stale = match self.journal.ledger().list_stale_pending(older_than).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Could not list pending events, skipping reconciliation");
                return report;
            }
        };

        for event in &stale {
            report.checked += 1;
            let (status, note) = self.resolve(event).await;
            match status {
                EventStatus::Success => report.succeeded += 1,
                EventStatus::Failed => report.failed += 1,
                _ => report.unknown += 1,
            }
            warn!(id = event.id, event_type = %event.event_type, %status, "Reconciled stale pending event");
            self.journal.close(event.id, status, None, note).await;
        }

        if report.checked > 0 {
            self.journal
                .notice("reconciled_pending", serde_json::to_value(report).unwrap_or_default())
                .await;
            info!(?report, "Pending events reconciled");
        }
        report
    }
}
