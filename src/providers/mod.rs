//! External provider integrations.
//!
//! Defines the traits for the HTTP-backed collaborators the workflows call:
//! - `SwapProvider`: cross-chain exchange orders
//! - `FeeRelayer`: creator-fee claims
//! - `DexAggregator`: same-chain buyback swaps
//! - `PriceSource`: raw reference-price fetch (wrapped by `PriceFeed`)
//!
//! Implementations:
//! - `coingecko`: live `PriceSource`
//! - `paper`: in-memory swap/relayer/DEX for dry runs and tests
//! - `price_feed`: caching, stale-tolerant wrapper around a `PriceSource`

pub mod coingecko;
pub mod paper;
pub mod price_feed;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Cross-chain swap provider
// ---------------------------------------------------------------------------

/// Parameters of a cross-chain exchange order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRequest {
    pub from_asset: String,
    pub to_asset: String,
    pub from_chain: String,
    pub to_chain: String,
    pub amount: Decimal,
    pub destination_address: String,
    pub refund_address: String,
}

/// A created exchange awaiting its deposit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub exchange_id: String,
    pub deposit_address: String,
    pub expected_output: Decimal,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapProvider: Send + Sync {
    async fn create_exchange(&self, request: &ExchangeRequest) -> Result<Exchange>;

    /// Minimum input amount the provider accepts for `asset`.
    fn minimum_amount(&self, asset: &str) -> Decimal;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Fee relayer
// ---------------------------------------------------------------------------

/// Result of a creator-fee claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { tx_ref: String },
    NoFeesAvailable,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeeRelayer: Send + Sync {
    async fn claim_creator_fees(&self, pool: &str, token_id: &str) -> Result<ClaimOutcome>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// DEX aggregator
// ---------------------------------------------------------------------------

/// A settled same-chain swap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapReceipt {
    pub tx_ref: String,
    pub amount_out: Decimal,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DexAggregator: Send + Sync {
    /// Quote and execute a swap of `native_amount` into `target_token`.
    async fn quote_and_swap(&self, native_amount: Decimal, target_token: &str) -> Result<SwapReceipt>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Price source
// ---------------------------------------------------------------------------

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD price of `asset_id`. No caching at this layer.
    async fn fetch_price(&self, asset_id: &str) -> Result<Decimal>;

    fn name(&self) -> &'static str;
}
