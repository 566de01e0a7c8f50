//! Paper chain.
//!
//! In-memory balances keyed by (address, asset). Transfers move funds and
//! mint unique references; every operation can be forced to fail. Used by
//! the binary in dry-run mode and by tests.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;

use super::{ChainClient, TxStatus};
use crate::keys::SigningKey;

/// Asset key used for the chain's native currency.
const NATIVE: &str = "native";

#[derive(Debug, Clone, PartialEq)]
pub struct PaperTransfer {
    pub tx_ref: String,
    pub from: String,
    pub to: String,
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Default)]
struct Ledger {
    balances: HashMap<(String, String), Decimal>,
    transfers: Vec<PaperTransfer>,
    statuses: HashMap<String, TxStatus>,
}

/// In-memory chain.
pub struct PaperChain {
    name: String,
    state: Mutex<Ledger>,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<String>>,
    /// If set, only transfers fail (reads keep working).
    force_transfer_error: Mutex<Option<String>>,
}

impl PaperChain {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(Ledger::default()),
            force_error: Mutex::new(None),
            force_transfer_error: Mutex::new(None),
        }
    }

    pub fn set_native(&self, address: &str, amount: Decimal) {
        self.state
            .lock()
            .balances
            .insert((address.to_string(), NATIVE.to_string()), amount);
    }

    pub fn set_token(&self, address: &str, token_id: &str, amount: Decimal) {
        self.state
            .lock()
            .balances
            .insert((address.to_string(), token_id.to_string()), amount);
    }

    pub fn native(&self, address: &str) -> Decimal {
        self.balance_of(address, NATIVE)
    }

    pub fn token(&self, address: &str, token_id: &str) -> Decimal {
        self.balance_of(address, token_id)
    }

    /// Record an externally known transaction status (for reconciliation).
    pub fn set_status(&self, tx_ref: &str, status: TxStatus) {
        self.state.lock().statuses.insert(tx_ref.to_string(), status);
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock() = Some(msg.to_string());
    }

    pub fn set_transfer_error(&self, msg: &str) {
        *self.force_transfer_error.lock() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock() = None;
        *self.force_transfer_error.lock() = None;
    }

    pub fn transfers(&self) -> Vec<PaperTransfer> {
        self.state.lock().transfers.clone()
    }

    fn balance_of(&self, address: &str, asset: &str) -> Decimal {
        self.state
            .lock()
            .balances
            .get(&(address.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().clone() {
            Some(msg) => Err(anyhow!(msg)),
            None => Ok(()),
        }
    }

    fn move_funds(&self, from: &str, to: &str, asset: &str, amount: Decimal) -> Result<String> {
        self.check_error()?;
        if let Some(msg) = self.force_transfer_error.lock().clone() {
            bail!(msg);
        }
        if amount <= Decimal::ZERO {
            bail!("transfer amount must be positive, got {amount}");
        }

        let mut state = self.state.lock();
        let from_key = (from.to_string(), asset.to_string());
        let available = state.balances.get(&from_key).copied().unwrap_or(Decimal::ZERO);
        if available < amount {
            bail!("insufficient {asset} balance on {}: have {available}, need {amount}", self.name);
        }

        state.balances.insert(from_key, available - amount);
        *state
            .balances
            .entry((to.to_string(), asset.to_string()))
            .or_insert(Decimal::ZERO) += amount;

        let tx_ref = format!("paper-{}-{}", self.name, uuid::Uuid::new_v4());
        state.transfers.push(PaperTransfer {
            tx_ref: tx_ref.clone(),
            from: from.to_string(),
            to: to.to_string(),
            asset: asset.to_string(),
            amount,
        });
        state.statuses.insert(
            tx_ref.clone(),
            TxStatus {
                confirmed: true,
                finalized: true,
                error: None,
            },
        );

        info!(chain = %self.name, %from, %to, %asset, %amount, tx = %tx_ref, "[PAPER] Transfer");
        Ok(tx_ref)
    }
}

#[async_trait]
impl ChainClient for PaperChain {
    async fn native_balance(&self, address: &str) -> Result<Decimal> {
        self.check_error()?;
        Ok(self.native(address))
    }

    async fn token_balance(&self, address: &str, token_id: &str) -> Result<Decimal> {
        self.check_error()?;
        Ok(self.token(address, token_id))
    }

    async fn transfer_native(&self, amount: Decimal, to: &str, signer: &SigningKey) -> Result<String> {
        self.move_funds(&signer.address, to, NATIVE, amount)
    }

    async fn transfer_token(
        &self,
        amount: Decimal,
        token_id: &str,
        to: &str,
        signer: &SigningKey,
    ) -> Result<String> {
        self.move_funds(&signer.address, to, token_id, amount)
    }

    async fn broadcast_signed(&self, tx: &[u8]) -> Result<String> {
        self.check_error()?;
        if tx.is_empty() {
            bail!("empty transaction");
        }
        let tx_ref = format!("paper-{}-{}", self.name, uuid::Uuid::new_v4());
        self.set_status(
            &tx_ref,
            TxStatus {
                confirmed: true,
                finalized: false,
                error: None,
            },
        );
        Ok(tx_ref)
    }

    async fn transaction_status(&self, tx_ref: &str) -> Result<TxStatus> {
        self.check_error()?;
        Ok(self
            .state
            .lock()
            .statuses
            .get(tx_ref)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
