//! Fee collection.
//!
//! Claim creator fees, sweep the creator wallet into the fee vault, then
//! convert everything above the gas reserve into the reserve asset through
//! a cross-chain exchange. Claim and sweep failures never block the
//! conversion of balance that is already resting in the vault.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{settle, Journal, Workflow};
use crate::chains::ChainClient;
use crate::config::{AssetsConfig, FlywheelConfig, WalletsConfig};
use crate::error::{FlywheelError, Result};
use crate::keys::{Keyring, SignerLocks, SigningKey};
use crate::storage::PendingDetails;
use crate::providers::{ClaimOutcome, ExchangeRequest, FeeRelayer, SwapProvider};
use crate::scheduler::TaskName;
use crate::types::{EventStatus, EventType, NewEvent, WorkflowOutcome};

const CONTEXT: &str = "fee_collection";
const CLAIM_CONTEXT: &str = "pumpportal_claim";
const SWEEP_CONTEXT: &str = "fee_sweep";

pub struct FeeCollector {
    chain: Arc<dyn ChainClient>,
    swap: Arc<dyn SwapProvider>,
    relayer: Option<Arc<dyn FeeRelayer>>,
    keys: Arc<Keyring>,
    locks: Arc<SignerLocks>,
    journal: Journal,
    wallets: WalletsConfig,
    assets: AssetsConfig,
    params: FlywheelConfig,
}

impl FeeCollector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        swap: Arc<dyn SwapProvider>,
        relayer: Option<Arc<dyn FeeRelayer>>,
        keys: Arc<Keyring>,
        locks: Arc<SignerLocks>,
        journal: Journal,
        wallets: WalletsConfig,
        assets: AssetsConfig,
        params: FlywheelConfig,
    ) -> Self {
        Self {
            chain,
            swap,
            relayer,
            keys,
            locks,
            journal,
            wallets,
            assets,
            params,
        }
    }

    // -- Step 1: claim ----------------------------------------------------

    async fn claim(&self) {
        let Some(relayer) = &self.relayer else {
            debug!("No fee relayer configured, skipping claim");
            return;
        };

        match relayer
            .claim_creator_fees(&self.assets.pool, &self.assets.primary_token)
            .await
        {
            Ok(ClaimOutcome::Claimed { tx_ref }) => {
                info!(tx = %tx_ref, relayer = relayer.name(), "Creator fees claimed");
                self.journal
                    .record(NewEvent::new(EventType::FeeClaim, EventStatus::Success).with_tx(tx_ref))
                    .await;
            }
            Ok(ClaimOutcome::NoFeesAvailable) => {
                debug!("No creator fees to claim");
            }
            Err(e) => {
                let e = FlywheelError::provider(relayer.name(), e);
                warn!(error = %e, "Fee claim failed, continuing with resting balance");
                self.journal.system_error(CLAIM_CONTEXT, e.to_string()).await;
            }
        }
    }

    // -- Step 2: sweep ----------------------------------------------------

    async fn sweep(&self, primary: &SigningKey) {
        let Some(secondary) = self.keys.distinct_secondary() else {
            return;
        };

        let balance = match self.chain.native_balance(&secondary.address).await {
            Ok(b) => b,
            Err(e) => {
                let e = FlywheelError::chain(self.chain.name(), e);
                warn!(error = %e, "Could not read secondary wallet balance, skipping sweep");
                self.journal.system_error(SWEEP_CONTEXT, e.to_string()).await;
                return;
            }
        };
        if balance <= self.params.sweep_threshold {
            debug!(%balance, "Secondary wallet below sweep threshold");
            return;
        }

        let amount = balance - self.params.sweep_retain;
        let Some(pending) = self
            .journal
            .record(
                NewEvent::new(EventType::FeeSweep, EventStatus::Pending)
                    .with_in(amount, self.assets.native_symbol())
                    .with_metadata(serde_json::json!({
                        "from": secondary.address,
                        "to": primary.address,
                    })),
            )
            .await
        else {
            warn!("Sweep skipped: ledger unavailable");
            return;
        };

        let result = {
            let _guard = self.locks.acquire(&secondary.id).await;
            self.chain
                .transfer_native(amount, &primary.address, &secondary)
                .await
        };
        match result {
            Ok(tx_ref) => {
                info!(%amount, tx = %tx_ref, "Swept secondary wallet into fee vault");
                self.journal
                    .annotate(pending.id, PendingDetails::default().with_tx(tx_ref.clone()))
                    .await;
                self.journal
                    .close(pending.id, EventStatus::Success, Some(tx_ref), None)
                    .await;
            }
            Err(e) => {
                let e = FlywheelError::chain(self.chain.name(), e);
                warn!(%amount, error = %e, "Sweep transfer failed");
                self.journal
                    .close(pending.id, EventStatus::Failed, None, Some(e.to_string()))
                    .await;
            }
        }
    }

    // -- Steps 3-6: threshold, exchange, transfer -------------------------

    async fn execute(&self) -> Result<WorkflowOutcome> {
        let primary = self
            .keys
            .primary
            .clone()
            .ok_or_else(|| FlywheelError::Configuration("primary signing key".into()))?;
        if self.wallets.reserve_vault.is_empty() {
            return Err(FlywheelError::Configuration("wallets.reserve_vault".into()));
        }

        self.claim().await;
        self.sweep(&primary).await;

        // Held from the balance read through the transfer so a concurrent
        // run on the same key sizes its transfer from the settled balance.
        let _guard = self.locks.acquire(&primary.id).await;
        let balance = self
            .chain
            .native_balance(&self.wallets.fee_vault)
            .await
            .map_err(|e| FlywheelError::chain(self.chain.name(), e))?;
        let amount = balance - self.params.gas_reserve;

        if amount <= self.params.min_swap {
            info!(
                %balance,
                gas_reserve = %self.params.gas_reserve,
                min_swap = %self.params.min_swap,
                "Insufficient fees to convert"
            );
            self.journal
                .notice(
                    "insufficient_fees",
                    serde_json::json!({ "balance": balance.to_string() }),
                )
                .await;
            return Ok(WorkflowOutcome::skipped("insufficient_fees"));
        }

        let native = self.assets.native_symbol();
        let pending = self
            .journal
            .open(NewEvent::new(EventType::FeeCollection, EventStatus::Pending).with_in(amount, native.clone()))
            .await?;

        let request = ExchangeRequest {
            from_asset: self.assets.native_asset.clone(),
            to_asset: self.assets.reserve_asset.clone(),
            from_chain: self.assets.primary_chain.clone(),
            to_chain: self.assets.reserve_chain.clone(),
            amount,
            destination_address: self.wallets.reserve_vault.clone(),
            refund_address: self.wallets.fee_vault.clone(),
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
            "Exchange created"
        );
        let exchange_meta = serde_json::json!({
            "exchange_id": exchange.exchange_id,
            "deposit_address": exchange.deposit_address,
            "destination": self.wallets.reserve_vault,
        });
        self.journal
            .annotate(
                pending.id,
                PendingDetails::default()
                    .with_out(exchange.expected_output, self.assets.reserve_symbol())
                    .with_metadata(exchange_meta.clone()),
            )
            .await;

        let transfer = self
            .chain
            .transfer_native(amount, &exchange.deposit_address, &primary)
            .await;
        let tx_ref = match transfer {
            Ok(tx_ref) => tx_ref,
            Err(e) => {
                let e = FlywheelError::chain(self.chain.name(), e);
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
        self.journal
            .record(
                NewEvent::new(EventType::GoldPurchase, EventStatus::Success)
                    .with_in(amount, native)
                    .with_out(exchange.expected_output, self.assets.reserve_symbol())
                    .with_tx(tx_ref.clone())
                    .with_metadata(exchange_meta),
            )
            .await;

        info!(%amount, tx = %tx_ref, "Fees sent for conversion into reserve asset");
        Ok(WorkflowOutcome::completed()
            .with_tx(tx_ref)
            .with_exchange(exchange.exchange_id)
            .with_amount(amount))
    }
}

#[async_trait]
impl Workflow for FeeCollector {
    fn task(&self) -> TaskName {
        TaskName::FeeCollection
    }

    async fn run(&self) -> WorkflowOutcome {
        let result = self.execute().await;
        settle(&self.journal, CONTEXT, result).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
