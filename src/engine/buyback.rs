//! Buyback completion.
//!
//! Runs on its own fixed cadence because cross-chain settlement of a
//! redeploy can take arbitrarily long. Once native has landed in the fee
//! vault, everything above a small gas retainer is swapped into the
//! primary token.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{settle, Journal, Workflow};
use crate::chains::ChainClient;
use crate::config::{AssetsConfig, FlywheelConfig, WalletsConfig};
use crate::error::{FlywheelError, Result};
use crate::keys::{Keyring, SignerLocks};
use crate::providers::DexAggregator;
use crate::scheduler::TaskName;
use crate::types::{EventStatus, EventType, NewEvent, WorkflowOutcome};

const CONTEXT: &str = "finish_redeploy";

pub struct Buyback {
    chain: Arc<dyn ChainClient>,
    dex: Arc<dyn DexAggregator>,
    keys: Arc<Keyring>,
    locks: Arc<SignerLocks>,
    journal: Journal,
    wallets: WalletsConfig,
    assets: AssetsConfig,
    params: FlywheelConfig,
}

impl Buyback {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        dex: Arc<dyn DexAggregator>,
        keys: Arc<Keyring>,
        locks: Arc<SignerLocks>,
        journal: Journal,
        wallets: WalletsConfig,
        assets: AssetsConfig,
        params: FlywheelConfig,
    ) -> Self {
        Self {
            chain,
            dex,
            keys,
            locks,
            journal,
            wallets,
            assets,
            params,
        }
    }

    async fn execute(&self) -> Result<WorkflowOutcome> {
        let signer = self
            .keys
            .primary
            .clone()
            .ok_or_else(|| FlywheelError::Configuration("primary signing key".into()))?;
        if self.assets.primary_token.is_empty() {
            return Err(FlywheelError::Configuration("assets.primary_token".into()));
        }

        // Held from the balance read through the swap; fee collection
        // draws on the same vault.
        let _guard = self.locks.acquire(&signer.id).await;
        let balance = self
            .chain
            .native_balance(&self.wallets.fee_vault)
            .await
            .map_err(|e| FlywheelError::chain(self.chain.name(), e))?;
        if balance <= self.params.buyback_threshold {
            debug!(%balance, threshold = %self.params.buyback_threshold, "Nothing settled to buy back");
            return Ok(WorkflowOutcome::skipped("below_threshold"));
        }

        let amount = balance - self.params.buyback_retain;
        let native = self.assets.native_symbol();
        let swap = self
            .dex
            .quote_and_swap(amount, &self.assets.primary_token)
            .await;

        // The output amount is only known once the swap settles, so the
        // event is written after the fact.
        match swap {
            Ok(receipt) => {
                self.journal
                    .record(
                        NewEvent::new(EventType::RedeployFinish, EventStatus::Success)
                            .with_in(amount, native)
                            .with_out(receipt.amount_out, self.assets.primary_token.clone())
                            .with_tx(receipt.tx_ref.clone()),
                    )
                    .await;
                info!(%amount, tokens = %receipt.amount_out, tx = %receipt.tx_ref, "Buyback complete");
                Ok(WorkflowOutcome::completed()
                    .with_tx(receipt.tx_ref)
                    .with_amount(receipt.amount_out))
            }
            Err(e) => {
                let e = FlywheelError::provider(self.dex.name(), e);
                self.journal
                    .record(
                        NewEvent::new(EventType::RedeployFinish, EventStatus::Failed)
                            .with_in(amount, native)
                            .with_error(e.to_string()),
                    )
                    .await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Workflow for Buyback {
    fn task(&self) -> TaskName {
        TaskName::Buyback
    }

    async fn run(&self) -> WorkflowOutcome {
        let result = self.execute().await;
        settle(&self.journal, CONTEXT, result).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::paper::PaperChain;
    use crate::keys::SigningKey;
    use crate::providers::paper::PaperDex;
    use crate::storage::{LedgerStore, SqliteLedger};
    use rust_decimal_macros::dec;

    struct Rig {
        chain: Arc<PaperChain>,
        dex: Arc<PaperDex>,
        ledger: Arc<SqliteLedger>,
    }

    async fn rig() -> Rig {
        let chain = Arc::new(PaperChain::new("sol"));
        Rig {
            dex: Arc::new(PaperDex::new(chain.clone(), "Fee1", dec!(1000))),
            chain,
            ledger: Arc::new(SqliteLedger::in_memory().await.unwrap()),
        }
    }

    fn buyback(rig: &Rig) -> Buyback {
        Buyback::new(
            rig.chain.clone(),
            rig.dex.clone(),
            Arc::new(Keyring {
                primary: Some(Arc::new(SigningKey::paper("primary", "Fee1"))),
                secondary: None,
                reserve: None,
            }),
            Arc::new(SignerLocks::new()),
            Journal::new(rig.ledger.clone()),
            WalletsConfig {
                fee_vault: "Fee1".into(),
                reserve_vault: "0xVault".into(),
                treasury: None,
                secondary: None,
            },
            AssetsConfig {
                primary_token: "Mint111".into(),
                ..Default::default()
            },
            FlywheelConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_below_threshold_is_a_quiet_noop() {
        let rig = rig().await;
        rig.chain.set_native("Fee1", dec!(0.05));

        let outcome = buyback(&rig).run().await;
        assert!(outcome.success && outcome.skipped);
        assert!(rig.ledger.list_recent(None, 10).await.unwrap().is_empty());
        assert_eq!(rig.chain.native("Fee1"), dec!(0.05));
    }

    #[tokio::test]
    async fn test_swaps_balance_minus_retainer() {
        let rig = rig().await;
        rig.chain.set_native("Fee1", dec!(0.51));

        let outcome = buyback(&rig).run().await;
        assert!(outcome.success && !outcome.skipped);
        assert_eq!(outcome.amount, Some(dec!(500)));
        assert_eq!(rig.chain.native("Fee1"), dec!(0.01));

        let finishes = rig.ledger.list_recent(Some(EventType::RedeployFinish), 10).await.unwrap();
        assert_eq!(finishes.len(), 1);
        assert_eq!(finishes[0].status, EventStatus::Success);
        assert_eq!(finishes[0].amount_in, Some(dec!(0.5)));
        assert_eq!(finishes[0].amount_out, Some(dec!(500)));

        let totals = rig.ledger.aggregate_totals().await.unwrap();
        assert_eq!(totals.tokens_bought(), dec!(500));
    }

    #[tokio::test]
    async fn test_swap_failure_logs_failed_finish_and_error() {
        let rig = rig().await;
        rig.chain.set_native("Fee1", dec!(0.51));
        rig.dex.set_error("no route");

        let outcome = buyback(&rig).run().await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("no route"));

        let finishes = rig.ledger.list_recent(Some(EventType::RedeployFinish), 10).await.unwrap();
        assert_eq!(finishes[0].status, EventStatus::Failed);
        let errors = rig.ledger.list_recent(Some(EventType::SystemError), 10).await.unwrap();
        assert_eq!(errors[0].meta_str("context"), Some("finish_redeploy"));
        assert_eq!(rig.ledger.aggregate_totals().await.unwrap().tokens_bought(), rust_decimal::Decimal::ZERO);
    }
}
