//! SQLite ledger via sqlx.
//!
//! Amounts are stored as decimal TEXT so no precision is lost to REAL, and
//! metadata as JSON TEXT. Timestamps are fixed-width RFC 3339 strings, which
//! keeps lexical order equal to chronological order.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{LedgerStore, PendingDetails};
use crate::types::{Event, EventStatus, EventType, LedgerTotals, NewEvent, Snapshot, SnapshotFields};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        amount_in TEXT,
        amount_out TEXT,
        token_in TEXT,
        token_out TEXT,
        tx_ref TEXT,
        status TEXT NOT NULL,
        error_message TEXT,
        metadata TEXT NOT NULL DEFAULT 'null',
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_type ON events (event_type)",
    "CREATE INDEX IF NOT EXISTS idx_events_status ON events (status, created_at)",
    "CREATE TABLE IF NOT EXISTS snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fee_vault_balance TEXT NOT NULL,
        reserve_vault_balance TEXT NOT NULL,
        treasury_balance TEXT NOT NULL,
        reference_price TEXT,
        cost_basis TEXT NOT NULL,
        current_value TEXT NOT NULL,
        unrealized_pnl TEXT NOT NULL,
        realized_pnl TEXT NOT NULL,
        total_pnl TEXT NOT NULL,
        total_fees_collected TEXT NOT NULL,
        total_reserve_bought TEXT NOT NULL,
        total_reserve_sold TEXT NOT NULL,
        total_tokens_bought TEXT NOT NULL,
        next_fee_collection TEXT,
        next_redeploy TEXT,
        estimated_redeploy_value TEXT NOT NULL,
        estimated_redeploy_units TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT 'null',
        created_at TEXT NOT NULL
    )",
];

// ---------------------------------------------------------------------------
// Column encoding
// ---------------------------------------------------------------------------

fn encode_ts(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Bad timestamp in ledger: {raw}"))?
        .with_timezone(&Utc))
}

fn decode_dec(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Bad decimal in ledger: {raw}"))
}

fn decode_opt_dec(raw: Option<&str>) -> Result<Option<Decimal>> {
    raw.map(decode_dec).transpose()
}

fn decode_json(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).context("Bad metadata JSON in ledger")
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    event_type: String,
    amount_in: Option<String>,
    amount_out: Option<String>,
    token_in: Option<String>,
    token_out: Option<String>,
    tx_ref: Option<String>,
    status: String,
    error_message: Option<String>,
    metadata: String,
    created_at: String,
}

impl TryFrom<EventRow> for Event {
    type Error = anyhow::Error;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Event {
            id: row.id,
            event_type: row.event_type.parse()?,
            amount_in: decode_opt_dec(row.amount_in.as_deref())?,
            amount_out: decode_opt_dec(row.amount_out.as_deref())?,
            token_in: row.token_in,
            token_out: row.token_out,
            tx_ref: row.tx_ref,
            status: row.status.parse()?,
            error_message: row.error_message,
            metadata: decode_json(&row.metadata)?,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    fee_vault_balance: String,
    reserve_vault_balance: String,
    treasury_balance: String,
    reference_price: Option<String>,
    cost_basis: String,
    current_value: String,
    unrealized_pnl: String,
    realized_pnl: String,
    total_pnl: String,
    total_fees_collected: String,
    total_reserve_bought: String,
    total_reserve_sold: String,
    total_tokens_bought: String,
    next_fee_collection: Option<String>,
    next_redeploy: Option<String>,
    estimated_redeploy_value: String,
    estimated_redeploy_units: String,
    metadata: String,
    created_at: String,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = anyhow::Error;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        Ok(Snapshot {
            id: row.id,
            fields: SnapshotFields {
                fee_vault_balance: decode_dec(&row.fee_vault_balance)?,
                reserve_vault_balance: decode_dec(&row.reserve_vault_balance)?,
                treasury_balance: decode_dec(&row.treasury_balance)?,
                reference_price: decode_opt_dec(row.reference_price.as_deref())?,
                cost_basis: decode_dec(&row.cost_basis)?,
                current_value: decode_dec(&row.current_value)?,
                unrealized_pnl: decode_dec(&row.unrealized_pnl)?,
                realized_pnl: decode_dec(&row.realized_pnl)?,
                total_pnl: decode_dec(&row.total_pnl)?,
                total_fees_collected: decode_dec(&row.total_fees_collected)?,
                total_reserve_bought: decode_dec(&row.total_reserve_bought)?,
                total_reserve_sold: decode_dec(&row.total_reserve_sold)?,
                total_tokens_bought: decode_dec(&row.total_tokens_bought)?,
                next_fee_collection: row.next_fee_collection.as_deref().map(decode_ts).transpose()?,
                next_redeploy: row.next_redeploy.as_deref().map(decode_ts).transpose()?,
                estimated_redeploy_value: decode_dec(&row.estimated_redeploy_value)?,
                estimated_redeploy_units: decode_dec(&row.estimated_redeploy_units)?,
                metadata: decode_json(&row.metadata)?,
            },
            created_at: decode_ts(&row.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// SqliteLedger
// ---------------------------------------------------------------------------

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open ledger at {url}"))?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        info!(%url, "Ledger opened");
        Ok(ledger)
    }

    /// Private in-memory database. One connection that never recycles, since
    /// each sqlite memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory ledger")?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Delete every event and snapshot and restart id numbering.
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to start ledger reset")?;
        for statement in [
            "DELETE FROM events",
            "DELETE FROM snapshots",
            "DELETE FROM sqlite_sequence WHERE name IN ('events', 'snapshots')",
        ] {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .context("Failed to reset ledger")?;
        }
        tx.commit().await.context("Failed to commit ledger reset")?;
        warn!("Ledger reset: all events and snapshots deleted");
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply ledger schema")?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn append(&self, event: NewEvent) -> Result<Event> {
        let row: EventRow = sqlx::query_as(
            "INSERT INTO events
                (event_type, amount_in, amount_out, token_in, token_out, tx_ref, status, error_message, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             RETURNING *",
        )
        .bind(event.event_type.as_str())
        .bind(event.amount_in.map(|d| d.to_string()))
        .bind(event.amount_out.map(|d| d.to_string()))
        .bind(event.token_in)
        .bind(event.token_out)
        .bind(event.tx_ref)
        .bind(event.status.as_str())
        .bind(event.error_message)
        .bind(event.metadata.to_string())
        .bind(encode_ts(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .context("Failed to append event")?;

        let event = Event::try_from(row)?;
        debug!(id = event.id, event_type = %event.event_type, status = %event.status, "Event appended");
        Ok(event)
    }

    async fn update_status(
        &self,
        id: i64,
        status: EventStatus,
        tx_ref: Option<String>,
        error: Option<String>,
    ) -> Result<Event> {
        let row: Option<EventRow> = sqlx::query_as(
            "UPDATE events
             SET status = ?1,
                 tx_ref = COALESCE(?2, tx_ref),
                 error_message = COALESCE(?3, error_message)
             WHERE id = ?4 AND status = 'pending'
             RETURNING *",
        )
        .bind(status.as_str())
        .bind(tx_ref)
        .bind(error)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to update event {id}"))?;

        match row {
            Some(row) => {
                let event = Event::try_from(row)?;
                debug!(id, status = %event.status, "Event status updated");
                Ok(event)
            }
            None => bail!("Event {id} does not exist or is no longer pending"),
        }
    }

    async fn annotate(&self, id: i64, details: PendingDetails) -> Result<Event> {
        let patch = details
            .metadata
            .is_object()
            .then(|| details.metadata.to_string());
        let row: Option<EventRow> = sqlx::query_as(
            "UPDATE events
             SET amount_out = COALESCE(?1, amount_out),
                 token_out = COALESCE(?2, token_out),
                 tx_ref = COALESCE(?3, tx_ref),
                 metadata = CASE
                     WHEN ?4 IS NULL THEN metadata
                     WHEN json_type(metadata) = 'object' THEN json_patch(metadata, ?4)
                     ELSE json(?4)
                 END
             WHERE id = ?5 AND status = 'pending'
             RETURNING *",
        )
        .bind(details.amount_out.map(|d| d.to_string()))
        .bind(details.token_out)
        .bind(details.tx_ref)
        .bind(patch)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to annotate event {id}"))?;

        match row {
            Some(row) => Event::try_from(row),
            None => bail!("Event {id} does not exist or is no longer pending"),
        }
    }

    async fn list_recent(&self, event_type: Option<EventType>, limit: i64) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM events
             WHERE (?1 IS NULL OR event_type = ?1)
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(event_type.map(|t| t.as_str()))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list events")?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn aggregate_totals(&self) -> Result<LedgerTotals> {
        let rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT event_type, amount_in, amount_out FROM events WHERE status = 'success'",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate ledger totals")?;

        let mut totals = LedgerTotals::default();
        for (event_type, amount_in, amount_out) in rows {
            totals.add(
                event_type.parse()?,
                EventStatus::Success,
                decode_opt_dec(amount_in.as_deref())?,
                decode_opt_dec(amount_out.as_deref())?,
            );
        }
        Ok(totals)
    }

    async fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        let row: Option<SnapshotRow> =
            sqlx::query_as("SELECT * FROM snapshots ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to load latest snapshot")?;

        row.map(Snapshot::try_from).transpose()
    }

    async fn save_snapshot(&self, fields: SnapshotFields) -> Result<Snapshot> {
        let row: SnapshotRow = sqlx::query_as(
            "INSERT INTO snapshots
                (fee_vault_balance, reserve_vault_balance, treasury_balance, reference_price,
                 cost_basis, current_value, unrealized_pnl, realized_pnl, total_pnl,
                 total_fees_collected, total_reserve_bought, total_reserve_sold, total_tokens_bought,
                 next_fee_collection, next_redeploy, estimated_redeploy_value, estimated_redeploy_units,
                 metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             RETURNING *",
        )
        .bind(fields.fee_vault_balance.to_string())
        .bind(fields.reserve_vault_balance.to_string())
        .bind(fields.treasury_balance.to_string())
        .bind(fields.reference_price.map(|d| d.to_string()))
        .bind(fields.cost_basis.to_string())
        .bind(fields.current_value.to_string())
        .bind(fields.unrealized_pnl.to_string())
        .bind(fields.realized_pnl.to_string())
        .bind(fields.total_pnl.to_string())
        .bind(fields.total_fees_collected.to_string())
        .bind(fields.total_reserve_bought.to_string())
        .bind(fields.total_reserve_sold.to_string())
        .bind(fields.total_tokens_bought.to_string())
        .bind(fields.next_fee_collection.map(encode_ts))
        .bind(fields.next_redeploy.map(encode_ts))
        .bind(fields.estimated_redeploy_value.to_string())
        .bind(fields.estimated_redeploy_units.to_string())
        .bind(fields.metadata.to_string())
        .bind(encode_ts(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .context("Failed to save snapshot")?;

        let snapshot = Snapshot::try_from(row)?;
        debug!(id = snapshot.id, "Snapshot saved");
        Ok(snapshot)
    }

    async fn list_stale_pending(&self, older_than: DateTime<Utc>) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM events
             WHERE status = 'pending' AND created_at < ?1
             ORDER BY id ASC",
        )
        .bind(encode_ts(older_than))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending events")?;

        rows.into_iter().map(Event::try_from).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;
    use rust_decimal_macros::dec;

    async fn ledger() -> SqliteLedger {
        SqliteLedger::in_memory().await.unwrap()
    }

    #[test]
    fn test_timestamp_encoding_is_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let b = a + chrono::Duration::microseconds(1500);
        assert_eq!(encode_ts(a), "2026-01-01T00:00:00.000000Z");
        assert_eq!(encode_ts(b).len(), encode_ts(a).len());
        assert!(encode_ts(a) < encode_ts(b));
        assert_eq!(decode_ts(&encode_ts(b)).unwrap(), b);
    }

    #[tokio::test]
    async fn test_append_assigns_id_and_preserves_fields() {
        let ledger = ledger().await;
        let event = ledger
            .append(
                NewEvent::new(EventType::GoldPurchase, EventStatus::Success)
                    .with_in(dec!(1.25), "SOL")
                    .with_out(dec!(0.0123456789), "XAUT")
                    .with_metadata(serde_json::json!({ "exchange_id": "ex-1" })),
            )
            .await
            .unwrap();

        assert!(event.id > 0);
        assert_eq!(event.amount_in, Some(dec!(1.25)));
        assert_eq!(event.amount_out, Some(dec!(0.0123456789)));
        assert_eq!(event.token_out.as_deref(), Some("XAUT"));
        assert_eq!(event.meta_str("exchange_id"), Some("ex-1"));
    }

    #[tokio::test]
    async fn test_update_status_keeps_ref_when_absent() {
        let ledger = ledger().await;
        let pending = ledger
            .append(NewEvent::new(EventType::FeeCollection, EventStatus::Pending).with_tx("sig-1"))
            .await
            .unwrap();

        let failed = ledger
            .update_status(pending.id, EventStatus::Failed, None, Some("rpc down".into()))
            .await
            .unwrap();
        assert_eq!(failed.status, EventStatus::Failed);
        assert_eq!(failed.tx_ref.as_deref(), Some("sig-1"));
        assert_eq!(failed.error_message.as_deref(), Some("rpc down"));
    }

    #[tokio::test]
    async fn test_terminal_events_cannot_transition() {
        let ledger = ledger().await;
        let pending = ledger
            .append(NewEvent::new(EventType::GoldSale, EventStatus::Pending))
            .await
            .unwrap();
        ledger
            .update_status(pending.id, EventStatus::Success, Some("0xabc".into()), None)
            .await
            .unwrap();

        assert!(ledger
            .update_status(pending.id, EventStatus::Failed, None, None)
            .await
            .is_err());
        assert_err!(ledger.update_status(9999, EventStatus::Success, None, None).await);
    }

    #[tokio::test]
    async fn test_annotate_fills_pending_and_merges_metadata() {
        let ledger = ledger().await;
        let pending = ledger
            .append(
                NewEvent::new(EventType::GoldSale, EventStatus::Pending)
                    .with_in(dec!(0.2), "XAUT")
                    .with_metadata(serde_json::json!({ "holdings": "2" })),
            )
            .await
            .unwrap();

        let annotated = ledger
            .annotate(
                pending.id,
                PendingDetails::default()
                    .with_out(dec!(4), "SOL")
                    .with_metadata(serde_json::json!({ "exchange_id": "ex-9", "deposit_address": "0xDep" })),
            )
            .await
            .unwrap();
        assert_eq!(annotated.status, EventStatus::Pending);
        assert_eq!(annotated.amount_out, Some(dec!(4)));
        assert_eq!(annotated.token_out.as_deref(), Some("SOL"));
        assert_eq!(annotated.meta_str("holdings"), Some("2"));
        assert_eq!(annotated.meta_str("exchange_id"), Some("ex-9"));

        let with_tx = ledger
            .annotate(pending.id, PendingDetails::default().with_tx("0xabc"))
            .await
            .unwrap();
        assert_eq!(with_tx.tx_ref.as_deref(), Some("0xabc"));
        assert_eq!(with_tx.amount_out, Some(dec!(4)));
        assert_eq!(with_tx.meta_str("deposit_address"), Some("0xDep"));

        ledger
            .update_status(pending.id, EventStatus::Success, None, None)
            .await
            .unwrap();
        assert_err!(ledger.annotate(pending.id, PendingDetails::default().with_tx("late")).await);
    }

    #[tokio::test]
    async fn test_annotate_replaces_null_metadata() {
        let ledger = ledger().await;
        let pending = ledger
            .append(NewEvent::new(EventType::FeeCollection, EventStatus::Pending))
            .await
            .unwrap();

        let annotated = ledger
            .annotate(
                pending.id,
                PendingDetails::default().with_metadata(serde_json::json!({ "exchange_id": "ex-1" })),
            )
            .await
            .unwrap();
        assert_eq!(annotated.meta_str("exchange_id"), Some("ex-1"));
    }

    #[tokio::test]
    async fn test_reset_clears_events_and_snapshots() {
        let ledger = ledger().await;
        ledger.append(NewEvent::notice("before")).await.unwrap();
        ledger.append(NewEvent::notice("before")).await.unwrap();
        ledger.save_snapshot(SnapshotFields::default()).await.unwrap();

        ledger.reset().await.unwrap();
        assert!(ledger.list_recent(None, 10).await.unwrap().is_empty());
        assert!(ledger.latest_snapshot().await.unwrap().is_none());

        let event = ledger.append(NewEvent::notice("after")).await.unwrap();
        assert_eq!(event.id, 1);
    }

    #[tokio::test]
    async fn test_list_recent_newest_first_with_filter() {
        let ledger = ledger().await;
        ledger.append(NewEvent::notice("insufficient_fees")).await.unwrap();
        ledger
            .append(NewEvent::new(EventType::FeeClaim, EventStatus::Success))
            .await
            .unwrap();
        ledger.append(NewEvent::notice("no_gold_to_sell")).await.unwrap();

        let all = ledger.list_recent(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].meta_str("reason"), Some("no_gold_to_sell"));

        let notices = ledger.list_recent(Some(EventType::SystemNotice), 10).await.unwrap();
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|e| e.event_type == EventType::SystemNotice));

        assert_eq!(ledger.list_recent(None, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_totals_change_only_on_success() {
        let ledger = ledger().await;
        let statuses = [
            EventStatus::Success,
            EventStatus::Failed,
            EventStatus::Skipped,
            EventStatus::Pending,
            EventStatus::Unknown,
            EventStatus::Success,
        ];

        for event_type in EventType::ALL {
            for status in statuses {
                let before = ledger.aggregate_totals().await.unwrap().get(*event_type);
                ledger
                    .append(
                        NewEvent::new(*event_type, status)
                            .with_in(dec!(0.5), "A")
                            .with_out(dec!(2), "B"),
                    )
                    .await
                    .unwrap();
                let after = ledger.aggregate_totals().await.unwrap().get(*event_type);

                if status == EventStatus::Success {
                    assert_eq!(after.amount_in, before.amount_in + dec!(0.5));
                    assert_eq!(after.amount_out, before.amount_out + dec!(2));
                    assert_eq!(after.count, before.count + 1);
                } else {
                    assert_eq!(after, before);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_pending_resolution_updates_totals() {
        let ledger = ledger().await;
        let pending = ledger
            .append(NewEvent::new(EventType::FeeCollection, EventStatus::Pending).with_in(dec!(0.3), "SOL"))
            .await
            .unwrap();
        assert_eq!(ledger.aggregate_totals().await.unwrap().fees_collected(), Decimal::ZERO);

        ledger
            .update_status(pending.id, EventStatus::Success, Some("sig".into()), None)
            .await
            .unwrap();
        assert_eq!(ledger.aggregate_totals().await.unwrap().fees_collected(), dec!(0.3));
    }

    #[tokio::test]
    async fn test_snapshots_latest_wins() {
        let ledger = ledger().await;
        assert!(ledger.latest_snapshot().await.unwrap().is_none());

        let first = SnapshotFields {
            cost_basis: dec!(100),
            realized_pnl: dec!(5),
            ..Default::default()
        };
        ledger.save_snapshot(first).await.unwrap();

        let next_fee = Utc::now();
        let second = SnapshotFields {
            cost_basis: dec!(120),
            reference_price: Some(dec!(2650.5)),
            next_fee_collection: Some(next_fee),
            metadata: serde_json::json!({ "pnl_percentage": "0" }),
            ..Default::default()
        };
        let saved = ledger.save_snapshot(second).await.unwrap();

        let latest = ledger.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.id, saved.id);
        assert_eq!(latest.fields.cost_basis, dec!(120));
        assert_eq!(latest.fields.reference_price, Some(dec!(2650.5)));
        assert_eq!(latest.fields.next_redeploy, None);
        assert_eq!(
            latest.fields.next_fee_collection.map(encode_ts),
            Some(encode_ts(next_fee))
        );
        assert_eq!(latest.fields.metadata["pnl_percentage"], "0");
    }

    #[tokio::test]
    async fn test_stale_pending_respects_cutoff() {
        let ledger = ledger().await;
        let pending = ledger
            .append(NewEvent::new(EventType::GoldSale, EventStatus::Pending))
            .await
            .unwrap();
        ledger.append(NewEvent::notice("x")).await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(ledger.list_stale_pending(past).await.unwrap().is_empty());

        let future = Utc::now() + chrono::Duration::seconds(5);
        let stale = ledger.list_stale_pending(future).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, pending.id);
    }

    #[tokio::test]
    async fn test_connect_file_database() {
        let path = std::env::temp_dir().join(format!("flywheel_test_{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());
        {
            let ledger = SqliteLedger::connect(&url).await.unwrap();
            ledger.append(NewEvent::notice("persisted")).await.unwrap();
        }
        let reopened = SqliteLedger::connect(&url).await.unwrap();
        let events = reopened.list_recent(None, 5).await.unwrap();
        assert_eq!(events.len(), 1);
        let _ = std::fs::remove_file(path);
    }
}
