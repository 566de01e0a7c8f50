//! Chain integrations.
//!
//! Defines the `ChainClient` trait the workflows use for balances and
//! transfers on one chain. The flywheel holds two: the primary chain (fees,
//! buybacks) and the reserve chain (reserve asset custody).
//! - `paper`: in-memory ledger of balances for dry runs and tests

pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::keys::SigningKey;

/// Confirmation state of a broadcast transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxStatus {
    pub confirmed: bool,
    pub finalized: bool,
    pub error: Option<String>,
}

impl TxStatus {
    pub fn landed(&self) -> bool {
        self.confirmed && self.error.is_none()
    }
}

/// Abstraction over one chain's RPC.
///
/// Transfer methods return only once the transaction is confirmed; an `Err`
/// means the caller must assume nothing landed. Custody and signing are the
/// implementor's concern.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Native balance of `address`, in whole units.
    async fn native_balance(&self, address: &str) -> Result<Decimal>;

    /// Balance of `token_id` held by `address`, in whole units.
    async fn token_balance(&self, address: &str, token_id: &str) -> Result<Decimal>;

    /// Transfer native currency from the signer's wallet.
    async fn transfer_native(&self, amount: Decimal, to: &str, signer: &SigningKey) -> Result<String>;

    /// Transfer a token from the signer's wallet.
    async fn transfer_token(
        &self,
        amount: Decimal,
        token_id: &str,
        to: &str,
        signer: &SigningKey,
    ) -> Result<String>;

    /// Submit an already-signed serialized transaction.
    async fn broadcast_signed(&self, tx: &[u8]) -> Result<String>;

    /// Look up a previously broadcast transaction.
    async fn transaction_status(&self, tx_ref: &str) -> Result<TxStatus>;

    /// Chain identifier for logging and event tokens (`"sol"`, `"eth"`).
    fn name(&self) -> &str;
}
