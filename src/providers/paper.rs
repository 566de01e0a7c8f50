//! Paper providers.
//!
//! Deterministic in-memory swap provider, fee relayer and DEX aggregator.
//! They settle against a `PaperChain` where it matters (claims credit the
//! claiming wallet, buybacks debit native and credit tokens) and support
//! forced errors like the paper chain does.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{
    ClaimOutcome, DexAggregator, Exchange, ExchangeRequest, FeeRelayer, PriceSource, SwapProvider, SwapReceipt,
};
use crate::chains::paper::PaperChain;

fn forced(slot: &Mutex<Option<String>>) -> Result<()> {
    match slot.lock().clone() {
        Some(msg) => Err(anyhow!(msg)),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Swap provider
// ---------------------------------------------------------------------------

/// Accepts every order and quotes `amount × rate` for the asset pair.
pub struct PaperSwapProvider {
    rates: HashMap<(String, String), Decimal>,
    minimums: HashMap<String, Decimal>,
    orders: Mutex<Vec<(ExchangeRequest, Exchange)>>,
    force_error: Mutex<Option<String>>,
}

impl PaperSwapProvider {
    pub fn new() -> Self {
        Self {
            rates: HashMap::new(),
            minimums: HashMap::new(),
            orders: Mutex::new(Vec::new()),
            force_error: Mutex::new(None),
        }
    }

    pub fn with_rate(mut self, from_asset: &str, to_asset: &str, rate: Decimal) -> Self {
        self.rates
            .insert((from_asset.to_string(), to_asset.to_string()), rate);
        self
    }

    pub fn with_minimum(mut self, asset: &str, minimum: Decimal) -> Self {
        self.minimums.insert(asset.to_string(), minimum);
        self
    }

    pub fn orders(&self) -> Vec<(ExchangeRequest, Exchange)> {
        self.orders.lock().clone()
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock() = None;
    }
}

impl Default for PaperSwapProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapProvider for PaperSwapProvider {
    async fn create_exchange(&self, request: &ExchangeRequest) -> Result<Exchange> {
        forced(&self.force_error)?;
        let rate = self
            .rates
            .get(&(request.from_asset.clone(), request.to_asset.clone()))
            .copied()
            .unwrap_or(Decimal::ONE);

        let exchange = Exchange {
            exchange_id: format!("paper-ex-{}", uuid::Uuid::new_v4()),
            deposit_address: format!("paper-deposit-{}", uuid::Uuid::new_v4()),
            expected_output: (request.amount * rate).round_dp(9),
        };
        info!(
            from = %request.from_asset,
            to = %request.to_asset,
            amount = %request.amount,
            expected = %exchange.expected_output,
            "[PAPER] Exchange created"
        );
        self.orders.lock().push((request.clone(), exchange.clone()));
        Ok(exchange)
    }

    fn minimum_amount(&self, asset: &str) -> Decimal {
        self.minimums.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    fn name(&self) -> &'static str {
        "paper-swap"
    }
}

// ---------------------------------------------------------------------------
// Fee relayer
// ---------------------------------------------------------------------------

/// Pays out accrued fees to `payee` on the paper chain when claimed.
pub struct PaperFeeRelayer {
    chain: Arc<PaperChain>,
    payee: String,
    accrued: Mutex<Decimal>,
    claims: Mutex<u32>,
    force_error: Mutex<Option<String>>,
}

impl PaperFeeRelayer {
    pub fn new(chain: Arc<PaperChain>, payee: &str) -> Self {
        Self {
            chain,
            payee: payee.to_string(),
            accrued: Mutex::new(Decimal::ZERO),
            claims: Mutex::new(0),
            force_error: Mutex::new(None),
        }
    }

    pub fn accrue(&self, amount: Decimal) {
        *self.accrued.lock() += amount;
    }

    pub fn claims(&self) -> u32 {
        *self.claims.lock()
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock() = None;
    }
}

#[async_trait]
impl FeeRelayer for PaperFeeRelayer {
    async fn claim_creator_fees(&self, pool: &str, token_id: &str) -> Result<ClaimOutcome> {
        forced(&self.force_error)?;
        *self.claims.lock() += 1;

        let amount = std::mem::take(&mut *self.accrued.lock());
        if amount <= Decimal::ZERO {
            return Ok(ClaimOutcome::NoFeesAvailable);
        }

        let balance = self.chain.native(&self.payee);
        self.chain.set_native(&self.payee, balance + amount);
        let tx_ref = format!("paper-claim-{}", uuid::Uuid::new_v4());
        info!(%pool, %token_id, %amount, tx = %tx_ref, "[PAPER] Creator fees claimed");
        Ok(ClaimOutcome::Claimed { tx_ref })
    }

    fn name(&self) -> &'static str {
        "paper-relayer"
    }
}

// ---------------------------------------------------------------------------
// DEX aggregator
// ---------------------------------------------------------------------------

/// Swaps `payer`'s native balance into tokens at a fixed rate.
pub struct PaperDex {
    chain: Arc<PaperChain>,
    payer: String,
    tokens_per_native: Decimal,
    force_error: Mutex<Option<String>>,
}

impl PaperDex {
    pub fn new(chain: Arc<PaperChain>, payer: &str, tokens_per_native: Decimal) -> Self {
        Self {
            chain,
            payer: payer.to_string(),
            tokens_per_native,
            force_error: Mutex::new(None),
        }
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock() = Some(msg.to_string());
    }
}

#[async_trait]
impl DexAggregator for PaperDex {
    async fn quote_and_swap(&self, native_amount: Decimal, target_token: &str) -> Result<SwapReceipt> {
        forced(&self.force_error)?;
        let balance = self.chain.native(&self.payer);
        if native_amount <= Decimal::ZERO || native_amount > balance {
            bail!("cannot swap {native_amount}: payer balance is {balance}");
        }

        let amount_out = (native_amount * self.tokens_per_native).round_dp(6);
        self.chain.set_native(&self.payer, balance - native_amount);
        let held = self.chain.token(&self.payer, target_token);
        self.chain.set_token(&self.payer, target_token, held + amount_out);

        let tx_ref = format!("paper-swap-{}", uuid::Uuid::new_v4());
        info!(%native_amount, %target_token, %amount_out, tx = %tx_ref, "[PAPER] Buyback swap");
        Ok(SwapReceipt { tx_ref, amount_out })
    }

    fn name(&self) -> &'static str {
        "paper-dex"
    }
}

/// Quotes one fixed price for every asset. Used when live pricing is off.
pub struct FixedPriceSource {
    price: Decimal,
}

impl FixedPriceSource {
    pub fn new(price: Decimal) -> Self {
        Self { price }
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn fetch_price(&self, _asset_id: &str) -> Result<Decimal> {
        Ok(self.price)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}
