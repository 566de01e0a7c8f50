//! FLYWHEEL: fee-to-reserve-to-buyback treasury agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the collaborators, reconciles leftover pending events and runs
//! the scheduler tick loop with graceful shutdown. `--reset-ledger` wipes
//! the ledger instead.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use flywheel::chains::paper::PaperChain;
use flywheel::chains::ChainClient;
use flywheel::config::{self, AppConfig};
use flywheel::dashboard::{self, StatusState};
use flywheel::engine::accountant::SnapshotEngine;
use flywheel::engine::buyback::Buyback;
use flywheel::engine::collector::FeeCollector;
use flywheel::engine::flywheel::Flywheel;
use flywheel::engine::reconciler::Reconciler;
use flywheel::engine::redeployer::{LongTermCadence, Redeployer};
use flywheel::engine::Journal;
use flywheel::keys::SignerLocks;
use flywheel::providers::coingecko::CoinGeckoSource;
use flywheel::providers::paper::{FixedPriceSource, PaperDex, PaperFeeRelayer, PaperSwapProvider};
use flywheel::providers::price_feed::PriceFeed;
use flywheel::providers::{FeeRelayer, PriceSource};
use flywheel::scheduler::{format_remaining, Cadence, Scheduler, TaskName};
use flywheel::storage::{LedgerStore, SqliteLedger};
use flywheel::types::{EventStatus, EventType, NewEvent};

const BANNER: &str = r#"
 _____ _ __   ____        ___   _ _____ _____ _
|  ___| |\ \ / /\ \      / / | | | ____| ____| |
| |_  | | \ V /  \ \ /\ / /| |_| |  _| |  _| | |
|  _| | |__| |    \ V  V / |  _  | |___| |___| |___
|_|   |_____|_|     \_/\_/  |_| |_|_____|_____|_____|

  Fees -> Reserve -> Buyback
  v0.1.0
"#;

/// Grace period before `--reset-ledger` deletes anything.
const RESET_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Everything pending in the ledger before this instant belongs to a
    // previous process.
    let started_at = Utc::now();

    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("FLYWHEEL_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    if std::env::args().skip(1).any(|arg| arg == "--reset-ledger") {
        return reset_ledger(&cfg.agent.database_url).await;
    }

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        tick_secs = cfg.agent.tick_secs,
        dry_run = cfg.agent.dry_run,
        fee_vault = %cfg.wallets.fee_vault,
        reserve_vault = %cfg.wallets.reserve_vault,
        "FLYWHEEL starting up"
    );

    for missing in cfg.validate() {
        warn!(setting = %missing, "Configuration incomplete, dependent workflows will skip");
    }
    if !cfg.agent.dry_run {
        bail!("Live chain and provider clients are not bundled; set agent.dry_run = true");
    }

    // -- Collaborators ---------------------------------------------------

    let primary_chain = Arc::new(PaperChain::new(&cfg.assets.primary_chain));
    let reserve_chain = Arc::new(PaperChain::new(&cfg.assets.reserve_chain));
    seed_paper_balances(&cfg, &primary_chain, &reserve_chain);

    let swap = Arc::new(
        PaperSwapProvider::new()
            .with_rate(
                &cfg.assets.native_asset,
                &cfg.assets.reserve_asset,
                cfg.paper.native_to_reserve_rate,
            )
            .with_rate(
                &cfg.assets.reserve_asset,
                &cfg.assets.native_asset,
                cfg.paper.reserve_to_native_rate,
            ),
    );

    let relayer: Option<Arc<dyn FeeRelayer>> = if cfg.relayer.enabled {
        let payee = cfg.wallets.secondary.as_deref().unwrap_or(&cfg.wallets.fee_vault);
        let relayer = PaperFeeRelayer::new(primary_chain.clone(), payee);
        relayer.accrue(cfg.paper.accrued_fees);
        Some(Arc::new(relayer) as Arc<dyn FeeRelayer>)
    } else {
        info!("Fee relayer disabled, claims are skipped");
        None
    };

    let dex = Arc::new(PaperDex::new(
        primary_chain.clone(),
        &cfg.wallets.fee_vault,
        cfg.paper.tokens_per_native,
    ));

    let source: Arc<dyn PriceSource> = if cfg.price.live {
        match &cfg.price.base_url {
            Some(url) => Arc::new(CoinGeckoSource::with_base_url(url)?),
            None => Arc::new(CoinGeckoSource::new()?),
        }
    } else {
        Arc::new(FixedPriceSource::new(cfg.price.fallback_price))
    };
    let feed = Arc::new(PriceFeed::new(
        source,
        &cfg.price.asset_id,
        Duration::from_secs(cfg.price.freshness_secs),
        cfg.price.fallback_price,
    ));

    // -- Ledger, scheduler, keys -----------------------------------------

    let ledger: Arc<dyn LedgerStore> = Arc::new(
        SqliteLedger::connect(&cfg.agent.database_url)
            .await
            .with_context(|| format!("Failed to open ledger at {}", cfg.agent.database_url))?,
    );
    let journal = Journal::new(ledger.clone());

    let now = Utc::now();
    let scheduler = Arc::new(Scheduler::new());
    scheduler.register(TaskName::FeeCollection, cfg.schedule.fee_collection(), Cadence::Adaptive, now);
    scheduler.register(TaskName::Redeploy, cfg.schedule.redeploy(), Cadence::Adaptive, now);
    scheduler.register(TaskName::Buyback, cfg.schedule.buyback(), Cadence::Fixed, now);
    scheduler.register(TaskName::Snapshot, cfg.schedule.snapshot(), Cadence::Fixed, now);

    let keys = Arc::new(cfg.keyring());
    let locks = Arc::new(SignerLocks::new());

    // -- Workflows -------------------------------------------------------

    let primary: Arc<dyn ChainClient> = primary_chain;
    let reserve: Arc<dyn ChainClient> = reserve_chain;

    let collector = FeeCollector::new(
        primary.clone(),
        swap.clone(),
        relayer,
        keys.clone(),
        locks.clone(),
        journal.clone(),
        cfg.wallets.clone(),
        cfg.assets.clone(),
        cfg.flywheel.clone(),
    );
    let redeployer = Redeployer::new(
        reserve.clone(),
        swap,
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
    );
    let buyback = Buyback::new(
        primary.clone(),
        dex,
        keys,
        locks,
        journal.clone(),
        cfg.wallets.clone(),
        cfg.assets.clone(),
        cfg.flywheel.clone(),
    );
    let snapshots = SnapshotEngine::new(
        primary.clone(),
        reserve.clone(),
        feed,
        scheduler.clone(),
        journal.clone(),
        cfg.wallets.clone(),
        cfg.assets.clone(),
        cfg.flywheel.redeploy_fraction,
    );

    let flywheel = Arc::new(
        Flywheel::new(scheduler.clone())
            .with_workflow(Arc::new(collector))
            .with_workflow(Arc::new(redeployer))
            .with_workflow(Arc::new(buyback))
            .with_workflow(Arc::new(snapshots)),
    );

    // -- Startup ---------------------------------------------------------

    let report = Reconciler::new(primary, reserve, journal.clone())
        .reconcile(started_at)
        .await;
    if report.checked > 0 {
        warn!(?report, "Resolved pending events left by a previous run");
    }

    journal
        .record(
            NewEvent::new(EventType::BotStart, EventStatus::Success).with_metadata(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "dry_run": cfg.agent.dry_run,
            })),
        )
        .await;
    flywheel.fire(TaskName::Snapshot).await;

    if cfg.status.enabled {
        dashboard::spawn_dashboard(
            Arc::new(StatusState {
                ledger,
                flywheel: flywheel.clone(),
                fee_vault: cfg.wallets.fee_vault.clone(),
                primary_token: cfg.assets.primary_token.clone(),
            }),
            cfg.status.port,
        );
    }

    for timer in scheduler.timers(Utc::now()) {
        info!(
            task = %timer.task,
            interval_secs = timer.interval_secs,
            next_in = %format_remaining(timer.next_fire - Utc::now()),
            "Timer armed"
        );
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.tick_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(tick_secs = cfg.agent.tick_secs, "Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for (task, outcome) in flywheel.tick(Utc::now()).await {
                    if let Some(next) = scheduler.time_remaining(task) {
                        info!(task = %task, %outcome, next_in = %format_remaining(next), "Tick fired");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    info!("FLYWHEEL shut down cleanly.");
    Ok(())
}

/// Operator tool: wipe every event and snapshot after a short warning.
async fn reset_ledger(database_url: &str) -> Result<()> {
    let ledger = SqliteLedger::connect(database_url)
        .await
        .with_context(|| format!("Failed to open ledger at {database_url}"))?;

    warn!(
        database_url,
        grace_secs = RESET_GRACE.as_secs(),
        "About to delete ALL events and snapshots. Press Ctrl+C to abort."
    );
    tokio::select! {
        _ = tokio::time::sleep(RESET_GRACE) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Ledger reset aborted");
            return Ok(());
        }
    }

    ledger.reset().await?;
    info!(database_url, "Ledger reset complete");
    Ok(())
}

/// Seed the paper chains from the `[paper]` section.
fn seed_paper_balances(cfg: &AppConfig, primary: &PaperChain, reserve: &PaperChain) {
    primary.set_native(&cfg.wallets.fee_vault, cfg.paper.fee_vault_balance);
    if let Some(secondary) = &cfg.wallets.secondary {
        primary.set_native(secondary, cfg.paper.secondary_balance);
    }
    reserve.set_native(&cfg.wallets.reserve_vault, cfg.paper.reserve_gas);
    reserve.set_token(
        &cfg.wallets.reserve_vault,
        &cfg.assets.reserve_token_id,
        cfg.paper.reserve_holdings,
    );
    info!(
        fee_vault = %cfg.paper.fee_vault_balance,
        reserve_holdings = %cfg.paper.reserve_holdings,
        reserve_gas = %cfg.paper.reserve_gas,
        "[PAPER] Balances seeded"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flywheel=info"));

    if std::env::var("FLYWHEEL_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
