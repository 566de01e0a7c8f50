//! Accountant: PnL and point-in-time snapshots.
//!
//! Each accounting cycle reads live balances, the cached reference price,
//! lifetime totals from the ledger and the scheduler's next fire times,
//! then writes one immutable snapshot row.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::{settle, Journal, Workflow};
use crate::chains::ChainClient;
use crate::config::{AssetsConfig, WalletsConfig};
use crate::error::{FlywheelError, Result};
use crate::providers::price_feed::PriceFeed;
use crate::scheduler::{Scheduler, TaskName};
use crate::types::{Snapshot, SnapshotFields, WorkflowOutcome};

const CONTEXT: &str = "snapshot_update";

// ---------------------------------------------------------------------------
// PnL
// ---------------------------------------------------------------------------

/// Profit and loss of the reserve position at one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PnlReport {
    pub cost_basis: Decimal,
    pub current_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub pnl_percentage: Decimal,
}

/// Value `balance` reserve units at `price`.
///
/// Cost basis and realized PnL carry forward unchanged from the latest
/// snapshot (zero when there is none).
pub fn compute_pnl(balance: Decimal, price: Decimal, latest: Option<&Snapshot>) -> PnlReport {
    let cost_basis = latest.map(|s| s.fields.cost_basis).unwrap_or(Decimal::ZERO);
    let realized_pnl = latest.map(|s| s.fields.realized_pnl).unwrap_or(Decimal::ZERO);

    let current_value = balance * price;
    let unrealized_pnl = current_value - cost_basis;
    let pnl_percentage = if cost_basis > Decimal::ZERO {
        (unrealized_pnl / cost_basis * dec!(100)).round_dp(4).normalize()
    } else {
        Decimal::ZERO
    };

    PnlReport {
        cost_basis,
        current_value,
        unrealized_pnl,
        realized_pnl,
        total_pnl: unrealized_pnl + realized_pnl,
        pnl_percentage,
    }
}

// ---------------------------------------------------------------------------
// Snapshot engine
// ---------------------------------------------------------------------------

pub struct SnapshotEngine {
    primary_chain: Arc<dyn ChainClient>,
    reserve_chain: Arc<dyn ChainClient>,
    feed: Arc<PriceFeed>,
    scheduler: Arc<Scheduler>,
    journal: Journal,
    wallets: WalletsConfig,
    assets: AssetsConfig,
    redeploy_fraction: Decimal,
}

impl SnapshotEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        primary_chain: Arc<dyn ChainClient>,
        reserve_chain: Arc<dyn ChainClient>,
        feed: Arc<PriceFeed>,
        scheduler: Arc<Scheduler>,
        journal: Journal,
        wallets: WalletsConfig,
        assets: AssetsConfig,
        redeploy_fraction: Decimal,
    ) -> Self {
        Self {
            primary_chain,
            reserve_chain,
            feed,
            scheduler,
            journal,
            wallets,
            assets,
            redeploy_fraction,
        }
    }

    pub async fn build_snapshot(&self) -> Result<Snapshot> {
        let ledger = self.journal.ledger();
        let persistence = |e: anyhow::Error| FlywheelError::Persistence(format!("{e:#}"));

        let (fee_vault, reserve_vault, treasury) = futures::future::join3(
            self.primary_chain.native_balance(&self.wallets.fee_vault),
            self.reserve_chain
                .token_balance(&self.wallets.reserve_vault, &self.assets.reserve_token_id),
            self.primary_chain
                .token_balance(self.wallets.treasury(), &self.assets.primary_token),
        )
        .await;

        let fee_vault_balance = fee_vault.map_err(|e| FlywheelError::chain(self.primary_chain.name(), e))?;
        let reserve_vault_balance =
            reserve_vault.map_err(|e| FlywheelError::chain(self.reserve_chain.name(), e))?;
        let treasury_balance = match treasury {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Treasury balance unavailable, recording 0");
                Decimal::ZERO
            }
        };

        let price = self.feed.reference_price().await;
        let totals = ledger.aggregate_totals().await.map_err(persistence)?;
        let latest = ledger.latest_snapshot().await.map_err(persistence)?;
        let pnl = compute_pnl(reserve_vault_balance, price, latest.as_ref());

        let fields = SnapshotFields {
            fee_vault_balance,
            reserve_vault_balance,
            treasury_balance,
            reference_price: Some(price),
            cost_basis: pnl.cost_basis,
            current_value: pnl.current_value,
            unrealized_pnl: pnl.unrealized_pnl,
            realized_pnl: pnl.realized_pnl,
            total_pnl: pnl.total_pnl,
            total_fees_collected: totals.fees_collected(),
            total_reserve_bought: totals.reserve_bought(),
            total_reserve_sold: totals.reserve_sold(),
            total_tokens_bought: totals.tokens_bought(),
            next_fee_collection: self.scheduler.next_fire(TaskName::FeeCollection),
            next_redeploy: self.scheduler.next_fire(TaskName::Redeploy),
            estimated_redeploy_value: pnl.current_value * self.redeploy_fraction,
            estimated_redeploy_units: reserve_vault_balance * self.redeploy_fraction,
            metadata: serde_json::json!({
                "reference_price": price.to_string(),
                "pnl_percentage": pnl.pnl_percentage.to_string(),
            }),
        };

        let snapshot = ledger.save_snapshot(fields).await.map_err(persistence)?;
        info!(
            id = snapshot.id,
            fee_vault = %snapshot.fields.fee_vault_balance,
            reserve = %snapshot.fields.reserve_vault_balance,
            value = format!("${:.2}", snapshot.fields.current_value),
            pnl = format!("${:.2}", snapshot.fields.total_pnl),
            "Snapshot recorded"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl Workflow for SnapshotEngine {
    fn task(&self) -> TaskName {
        TaskName::Snapshot
    }

    async fn run(&self) -> WorkflowOutcome {
        let result = self
            .build_snapshot()
            .await
            .map(|s| WorkflowOutcome::completed().with_amount(s.fields.current_value));
        settle(&self.journal, CONTEXT, result).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
