//! Cached reference price.
//!
//! Wraps a `PriceSource` with a freshness window. A fetch failure returns
//! the last known price unchanged; the feed never errors.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::PriceSource;

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: Decimal,
    fetched_at: Option<DateTime<Utc>>,
}

pub struct PriceFeed {
    source: Arc<dyn PriceSource>,
    asset_id: String,
    freshness: chrono::Duration,
    cache: Mutex<CachedPrice>,
}

impl PriceFeed {
    /// `fallback` is served until the first successful fetch.
    pub fn new(source: Arc<dyn PriceSource>, asset_id: &str, freshness: Duration, fallback: Decimal) -> Self {
        Self {
            source,
            asset_id: asset_id.to_string(),
            freshness: chrono::Duration::from_std(freshness).unwrap_or_else(|_| chrono::Duration::seconds(60)),
            cache: Mutex::new(CachedPrice {
                price: fallback,
                fetched_at: None,
            }),
        }
    }

    pub async fn reference_price(&self) -> Decimal {
        self.reference_price_at(Utc::now()).await
    }

    pub async fn reference_price_at(&self, now: DateTime<Utc>) -> Decimal {
        let cached = *self.cache.lock();
        if let Some(at) = cached.fetched_at {
            if now - at < self.freshness {
                return cached.price;
            }
        }

        match self.source.fetch_price(&self.asset_id).await {
            Ok(price) => {
                debug!(asset = %self.asset_id, %price, source = self.source.name(), "Reference price refreshed");
                *self.cache.lock() = CachedPrice {
                    price,
                    fetched_at: Some(now),
                };
                price
            }
            Err(e) => {
                warn!(
                    asset = %self.asset_id,
                    error = %e,
                    cached = %cached.price,
                    "Price fetch failed, using cached price"
                );
                cached.price
            }
        }
    }

    /// Last known price without touching the source.
    pub fn last_price(&self) -> Decimal {
        self.cache.lock().price
    }
}
