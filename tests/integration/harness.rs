//! Paper rig for end-to-end flywheel tests.
//!
//! Wires every workflow against in-memory chains, paper providers and an
//! in-memory SQLite ledger, the same way the binary does in dry-run mode.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use flywheel::chains::paper::PaperChain;
use flywheel::config::AppConfig;
use flywheel::engine::accountant::SnapshotEngine;
use flywheel::engine::buyback::Buyback;
use flywheel::engine::collector::FeeCollector;
use flywheel::engine::flywheel::Flywheel;
use flywheel::engine::reconciler::Reconciler;
use flywheel::engine::redeployer::{LongTermCadence, Redeployer};
use flywheel::engine::Journal;
use flywheel::keys::SignerLocks;
use flywheel::providers::paper::{FixedPriceSource, PaperDex, PaperFeeRelayer, PaperSwapProvider};
use flywheel::providers::price_feed::PriceFeed;
use flywheel::providers::FeeRelayer;
use flywheel::scheduler::{Cadence, Scheduler, TaskName};
use flywheel::storage::SqliteLedger;

pub const FEE_VAULT: &str = "FeeVault111";
pub const RESERVE_VAULT: &str = "0xReserveVault";
pub const XAUT: &str = "0x68749665FF8D2d112Fa859AA293F07A622782F38";
pub const MINT: &str = "Mint111pump";

pub struct Rig {
    pub cfg: AppConfig,
    pub sol: Arc<PaperChain>,
    pub eth: Arc<PaperChain>,
    pub swap: Arc<PaperSwapProvider>,
    pub relayer: Arc<PaperFeeRelayer>,
    pub dex: Arc<PaperDex>,
    pub ledger: Arc<SqliteLedger>,
    pub scheduler: Arc<Scheduler>,
    pub flywheel: Arc<Flywheel>,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::parse(&format!(
        r#"
        [agent]
        dry_run = true

        [wallets]
        fee_vault = "{FEE_VAULT}"
        reserve_vault = "{RESERVE_VAULT}"

        [assets]
        primary_token = "{MINT}"

        [price]
        live = false
        "#
    ))
    .unwrap();
    cfg.paper.tokens_per_native = dec!(1000);
    cfg
}

impl Rig {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let sol = Arc::new(PaperChain::new("sol"));
        let eth = Arc::new(PaperChain::new("eth"));
        let swap = Arc::new(
            PaperSwapProvider::new()
                .with_rate("sol", "xaut", cfg.paper.native_to_reserve_rate)
                .with_rate("xaut", "sol", cfg.paper.reserve_to_native_rate),
        );
        let relayer = Arc::new(PaperFeeRelayer::new(sol.clone(), FEE_VAULT));
        let dex = Arc::new(PaperDex::new(sol.clone(), FEE_VAULT, cfg.paper.tokens_per_native));
        let ledger = Arc::new(SqliteLedger::in_memory().await.unwrap());
        let journal = Journal::new(ledger.clone());
        let feed = Arc::new(PriceFeed::new(
            Arc::new(FixedPriceSource::new(cfg.price.fallback_price)),
            &cfg.price.asset_id,
            Duration::from_secs(cfg.price.freshness_secs),
            cfg.price.fallback_price,
        ));

        let now = chrono::Utc::now();
        let scheduler = Arc::new(Scheduler::new());
        scheduler.register(TaskName::FeeCollection, cfg.schedule.fee_collection(), Cadence::Adaptive, now);
        scheduler.register(TaskName::Redeploy, cfg.schedule.redeploy(), Cadence::Adaptive, now);
        scheduler.register(TaskName::Buyback, cfg.schedule.buyback(), Cadence::Fixed, now);
        scheduler.register(TaskName::Snapshot, cfg.schedule.snapshot(), Cadence::Fixed, now);

        let keys = Arc::new(cfg.keyring());
        let locks = Arc::new(SignerLocks::new());

        let flywheel = Flywheel::new(scheduler.clone())
            .with_workflow(Arc::new(FeeCollector::new(
                sol.clone(),
                swap.clone(),
                Some(relayer.clone() as Arc<dyn FeeRelayer>),
                keys.clone(),
                locks.clone(),
                journal.clone(),
                cfg.wallets.clone(),
                cfg.assets.clone(),
                cfg.flywheel.clone(),
            )))
            .with_workflow(Arc::new(Redeployer::new(
                eth.clone(),
                swap.clone(),
                keys.clone(),
                locks.clone(),
                journal.clone(),
                cfg.wallets.clone(),
                cfg.assets.clone(),
                cfg.flywheel.clone(),
                LongTermCadence {
                    fee_collection: cfg.schedule.long_term_fee_collection(),
                    redeploy: cfg.schedule.long_term_redeploy(),
                },
            )))
            .with_workflow(Arc::new(Buyback::new(
                sol.clone(),
                dex.clone(),
                keys,
                locks,
                journal.clone(),
                cfg.wallets.clone(),
                cfg.assets.clone(),
                cfg.flywheel.clone(),
            )))
            .with_workflow(Arc::new(SnapshotEngine::new(
                sol.clone(),
                eth.clone(),
                feed,
                scheduler.clone(),
                journal,
                cfg.wallets.clone(),
                cfg.assets.clone(),
                cfg.flywheel.redeploy_fraction,
            )));

        Self {
            cfg,
            sol,
            eth,
            swap,
            relayer,
            dex,
            ledger,
            scheduler,
            flywheel: Arc::new(flywheel),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.sol.clone(), self.eth.clone(), Journal::new(self.ledger.clone()))
    }

    pub fn fund_fee_vault(&self, amount: Decimal) {
        self.sol.set_native(FEE_VAULT, amount);
    }

    pub fn fund_reserve(&self, holdings: Decimal, gas: Decimal) {
        self.eth.set_token(RESERVE_VAULT, XAUT, holdings);
        self.eth.set_native(RESERVE_VAULT, gas);
    }
}
