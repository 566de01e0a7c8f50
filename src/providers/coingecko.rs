//! CoinGecko reference-price source.
//!
//! API docs: https://docs.coingecko.com/reference/simple-price
//! Endpoint: GET /api/v3/simple/price?ids={asset}&vs_currencies=usd
//! Auth: none on the public tier (rate limited ~30 req/min), which the
//! `PriceFeed` cache keeps us well under.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use super::PriceSource;

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// `{ "<asset>": { "usd": 2650.12 } }`
type SimplePriceResponse = HashMap<String, HashMap<String, Decimal>>;

pub struct CoinGeckoSource {
    http: Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new() -> Result<Self> {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("FLYWHEEL/0.1.0 (treasury-agent)")
            .build()
            .context("Failed to build HTTP client for CoinGecko")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Pull the USD quote for `asset_id` out of a simple-price response.
    fn extract_usd(body: &SimplePriceResponse, asset_id: &str) -> Result<Decimal> {
        let price = body
            .get(asset_id)
            .and_then(|quotes| quotes.get("usd"))
            .copied()
            .with_context(|| format!("Invalid price data format: no usd quote for {asset_id}"))?;

        if price <= Decimal::ZERO {
            anyhow::bail!("Non-positive price {price} for {asset_id}");
        }
        Ok(price)
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch_price(&self, asset_id: &str) -> Result<Decimal> {
        let url = format!("{}/simple/price", self.base_url);
        debug!(%url, asset_id, "Fetching reference price");

        let resp = self
            .http
            .get(&url)
            .query(&[("ids", asset_id), ("vs_currencies", "usd")])
            .send()
            .await
            .context("CoinGecko request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("CoinGecko API error {status}: {body}");
        }

        let body: SimplePriceResponse = resp
            .json()
            .await
            .context("Failed to parse CoinGecko simple/price response")?;

        Self::extract_usd(&body, asset_id)
    }

    fn name(&self) -> &'static str {
        "coingecko"
    }
}
