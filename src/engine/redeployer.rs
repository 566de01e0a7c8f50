//! Redeploy: sell a fraction of reserve holdings back into the primary
//! chain's native currency.
//!
//! Mirrors fee collection in the reverse direction. Whatever the result,
//! the outcome switches both adaptive timers to the long-term cadence.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{settle, Journal, Workflow};
use crate::chains::ChainClient;
use crate::config::{AssetsConfig, FlywheelConfig, WalletsConfig};
use crate::error::{FlywheelError, Result};
use crate::keys::{Keyring, SignerLocks};
use crate::providers::{ExchangeRequest, SwapProvider};
use crate::storage::PendingDetails;
use crate::scheduler::TaskName;
use crate::types::{EventStatus, EventType, NewEvent, WorkflowOutcome};

const CONTEXT: &str = "redeploy_gold";

/// Intervals applied to both adaptive timers after any redeploy attempt.
#[derive(Debug, Clone, Copy)]
pub struct LongTermCadence {
    pub fee_collection: Duration,
    pub redeploy: Duration,
}

pub struct Redeployer {
    reserve_chain: Arc<dyn ChainClient>,
    swap: Arc<dyn SwapProvider>,
    keys: Arc<Keyring>,
    locks: Arc<SignerLocks>,
    journal: Journal,
    wallets: WalletsConfig,
    assets: AssetsConfig,
    params: FlywheelConfig,
    cadence: LongTermCadence,
}

impl Redeployer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reserve_chain: Arc<dyn ChainClient>,
        swap: Arc<dyn SwapProvider>,
        keys: Arc<Keyring>,
        locks: Arc<SignerLocks>,
        journal: Journal,
        wallets: WalletsConfig,
        assets: AssetsConfig,
        params: FlywheelConfig,
        cadence: LongTermCadence,
    ) -> Self {
        Self {
            reserve_chain,
            swap,
            keys,
            locks,
            journal,
            wallets,
            assets,
            params,
            cadence,
        }
    }

    async fn execute(&self) -> Result<WorkflowOutcome> {
        let signer = self
            .keys
            .reserve
            .clone()
            .ok_or_else(|| FlywheelError::Configuration("reserve signing key".into()))?;
        let chain = self.reserve_chain.name().to_string();

        let _guard = self.locks.acquire(&signer.id).await;
        let gas = self
            .reserve_chain
            .native_balance(&self.wallets.reserve_vault)
            .await
            .map_err(|e| FlywheelError::chain(&chain, e))?;
        if gas < self.params.reserve_gas_minimum {
            return Err(FlywheelError::Precondition(format!(
                "insufficient {chain} for gas: have {gas}, need {}",
                self.params.reserve_gas_minimum
            )));
        }

        let holdings = self
            .reserve_chain
            .token_balance(&self.wallets.reserve_vault, &self.assets.reserve_token_id)
            .await
            .map_err(|e| FlywheelError::chain(&chain, e))?;
        if holdings <= Decimal::ZERO {
            info!("No reserve holdings to redeploy");
            self.journal
                .notice("no_gold_to_sell", serde_json::json!({ "holdings": holdings.to_string() }))
                .await;
            return Ok(WorkflowOutcome::skipped("no_gold"));
        }

        let amount = holdings * self.params.redeploy_fraction;
        let minimum = self
            .params
            .min_sell
            .max(self.swap.minimum_amount(&self.assets.reserve_asset));
        if amount < minimum {
            info!(%amount, %minimum, "Redeploy amount below exchange minimum");
            self.journal
                .notice(
                    "amount_below_minimum",
                    serde_json::json!({
                        "amount": amount.to_string(),
                        "minimum": minimum.to_string(),
                    }),
                )
                .await;
            return Ok(WorkflowOutcome::skipped("small_amount"));
        }

        let reserve = self.assets.reserve_symbol();
        let pending = self
            .journal
            .open(
                NewEvent::new(EventType::GoldSale, EventStatus::Pending)
                    .with_in(amount, reserve.clone())
                    .with_metadata(serde_json::json!({
                        "holdings": holdings.to_string(),
                        "fraction": self.params.redeploy_fraction.to_string(),
                    })),
            )
            .await?;

        let request = ExchangeRequest {
            from_asset: self.assets.reserve_asset.clone(),
            to_asset: self.assets.native_asset.clone(),
            from_chain: self.assets.reserve_chain.clone(),
            to_chain: self.assets.primary_chain.clone(),
            amount,
            destination_address: self.wallets.fee_vault.clone(),
            refund_address: self.wallets.reserve_vault.clone(),
        };
        let exchange = match self.swap.create_exchange(&request).await {
            Ok(exchange) => exchange,
            Err(e) => {
                let e = FlywheelError::provider(self.swap.name(), e);
                self.journal
                    .close(pending.id, EventStatus::Failed, None, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };
        info!(
            exchange_id = %exchange.exchange_id,
            %amount,
            expected = %exchange.expected_output,
            "Sell-side exchange created"
        );
        self.journal
            .annotate(
                pending.id,
                PendingDetails::default()
                    .with_out(exchange.expected_output, self.assets.native_symbol())
                    .with_metadata(serde_json::json!({
                        "exchange_id": exchange.exchange_id,
                        "deposit_address": exchange.deposit_address,
                        "destination": self.wallets.fee_vault,
                        "token_id": self.assets.reserve_token_id,
                    })),
            )
            .await;

        let transfer = self
            .reserve_chain
            .transfer_token(
                amount,
                &self.assets.reserve_token_id,
                &exchange.deposit_address,
                &signer,
            )
            .await;
        let tx_ref = match transfer {
            Ok(tx_ref) => tx_ref,
            Err(e) => {
                let e = FlywheelError::chain(&chain, e);
                self.journal
                    .close(pending.id, EventStatus::Failed, None, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        self.journal
            .annotate(pending.id, PendingDetails::default().with_tx(tx_ref.clone()))
            .await;
        self.journal
            .close(pending.id, EventStatus::Success, Some(tx_ref.clone()), None)
            .await;
        info!(%amount, %reserve, tx = %tx_ref, "Reserve redeployed");

        Ok(WorkflowOutcome::completed()
            .with_tx(tx_ref)
            .with_exchange(exchange.exchange_id)
            .with_amount(amount))
    }
}

#[async_trait]
impl Workflow for Redeployer {
    fn task(&self) -> TaskName {
        TaskName::Redeploy
    }

    async fn run(&self) -> WorkflowOutcome {
        let result = self.execute().await;
        settle(&self.journal, CONTEXT, result)
            .await
            .with_cadence(TaskName::FeeCollection, self.cadence.fee_collection)
            .with_cadence(TaskName::Redeploy, self.cadence.redeploy)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
