//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! numeric knob has a serde default, so a minimal file only needs wallet
//! addresses and the primary token. Secrets (signing keys, relayer API key)
//! are referenced by env-var name and resolved at runtime into
//! `secrecy::SecretString`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::keys::{Keyring, SigningKey};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub wallets: WalletsConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub flywheel: FlywheelConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Coarse polling tick of the control loop.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Run against paper collaborators. Live chain clients are not bundled.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            tick_secs: default_tick_secs(),
            dry_run: true,
            database_url: default_database_url(),
        }
    }
}

/// Timer intervals, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_fee_secs")]
    pub fee_collection_secs: u64,
    #[serde(default = "default_redeploy_secs")]
    pub redeploy_secs: u64,
    /// Fee-collection interval after any redeploy attempt.
    #[serde(default = "default_long_fee_secs")]
    pub long_term_fee_collection_secs: u64,
    /// Redeploy interval after any redeploy attempt.
    #[serde(default = "default_long_redeploy_secs")]
    pub long_term_redeploy_secs: u64,
    #[serde(default = "default_buyback_secs")]
    pub buyback_secs: u64,
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,
}

impl ScheduleConfig {
    pub fn fee_collection(&self) -> Duration {
        Duration::from_secs(self.fee_collection_secs)
    }

    pub fn redeploy(&self) -> Duration {
        Duration::from_secs(self.redeploy_secs)
    }

    pub fn long_term_fee_collection(&self) -> Duration {
        Duration::from_secs(self.long_term_fee_collection_secs)
    }

    pub fn long_term_redeploy(&self) -> Duration {
        Duration::from_secs(self.long_term_redeploy_secs)
    }

    pub fn buyback(&self) -> Duration {
        Duration::from_secs(self.buyback_secs)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_secs(self.snapshot_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fee_collection_secs: default_fee_secs(),
            redeploy_secs: default_redeploy_secs(),
            long_term_fee_collection_secs: default_long_fee_secs(),
            long_term_redeploy_secs: default_long_redeploy_secs(),
            buyback_secs: default_buyback_secs(),
            snapshot_secs: default_snapshot_secs(),
        }
    }
}

/// Wallet addresses. The fee vault lives on the primary chain, the reserve
/// vault on the reserve chain.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WalletsConfig {
    #[serde(default)]
    pub fee_vault: String,
    #[serde(default)]
    pub reserve_vault: String,
    /// Holder of bought-back primary tokens. Defaults to the fee vault.
    #[serde(default)]
    pub treasury: Option<String>,
    /// Creator wallet swept into the fee vault when it is a distinct key.
    #[serde(default)]
    pub secondary: Option<String>,
}

impl WalletsConfig {
    pub fn treasury(&self) -> &str {
        self.treasury.as_deref().unwrap_or(&self.fee_vault)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    #[serde(default = "default_primary_chain")]
    pub primary_chain: String,
    #[serde(default = "default_reserve_chain")]
    pub reserve_chain: String,
    /// Swap-provider ticker of the primary chain's native currency.
    #[serde(default = "default_native_asset")]
    pub native_asset: String,
    /// Swap-provider ticker of the reserve asset.
    #[serde(default = "default_reserve_asset")]
    pub reserve_asset: String,
    /// Reserve asset contract on the reserve chain.
    #[serde(default = "default_reserve_token_id")]
    pub reserve_token_id: String,
    /// Primary token mint bought back by the buyback workflow.
    #[serde(default)]
    pub primary_token: String,
    /// Fee-relayer pool identifier.
    #[serde(default = "default_pool")]
    pub pool: String,
}

impl AssetsConfig {
    /// Ticker used on ledger events (`SOL`, `XAUT`).
    pub fn native_symbol(&self) -> String {
        self.native_asset.to_uppercase()
    }

    pub fn reserve_symbol(&self) -> String {
        self.reserve_asset.to_uppercase()
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            primary_chain: default_primary_chain(),
            reserve_chain: default_reserve_chain(),
            native_asset: default_native_asset(),
            reserve_asset: default_reserve_asset(),
            reserve_token_id: default_reserve_token_id(),
            primary_token: String::new(),
            pool: default_pool(),
        }
    }
}

/// Workflow thresholds, in whole units of the relevant asset.
#[derive(Debug, Deserialize, Clone)]
pub struct FlywheelConfig {
    /// Native kept in the fee vault for gas.
    #[serde(default = "default_gas_reserve")]
    pub gas_reserve: Decimal,
    /// Fee-vault remainder must be strictly above this to convert.
    #[serde(default = "default_min_swap")]
    pub min_swap: Decimal,
    #[serde(default = "default_sweep_threshold")]
    pub sweep_threshold: Decimal,
    /// Dust left behind in the secondary wallet after a sweep.
    #[serde(default = "default_sweep_retain")]
    pub sweep_retain: Decimal,
    /// Reserve-chain native needed before a redeploy can pay gas.
    #[serde(default = "default_reserve_gas_minimum")]
    pub reserve_gas_minimum: Decimal,
    #[serde(default = "default_min_sell")]
    pub min_sell: Decimal,
    /// Fraction of reserve holdings sold per redeploy.
    #[serde(default = "default_redeploy_fraction")]
    pub redeploy_fraction: Decimal,
    #[serde(default = "default_buyback_threshold")]
    pub buyback_threshold: Decimal,
    #[serde(default = "default_buyback_retain")]
    pub buyback_retain: Decimal,
}

impl Default for FlywheelConfig {
    fn default() -> Self {
        Self {
            gas_reserve: default_gas_reserve(),
            min_swap: default_min_swap(),
            sweep_threshold: default_sweep_threshold(),
            sweep_retain: default_sweep_retain(),
            reserve_gas_minimum: default_reserve_gas_minimum(),
            min_sell: default_min_sell(),
            redeploy_fraction: default_redeploy_fraction(),
            buyback_threshold: default_buyback_threshold(),
            buyback_retain: default_buyback_retain(),
        }
    }
}

/// Env-var names holding signing-key material.
#[derive(Debug, Deserialize, Clone)]
pub struct KeysConfig {
    #[serde(default = "default_primary_env")]
    pub primary_env: String,
    #[serde(default = "default_secondary_env")]
    pub secondary_env: String,
    #[serde(default = "default_reserve_env")]
    pub reserve_env: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            primary_env: default_primary_env(),
            secondary_env: default_secondary_env(),
            reserve_env: default_reserve_env(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_relayer_key_env")]
    pub api_key_env: String,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: default_relayer_key_env(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceConfig {
    /// Fetch from CoinGecko. When false the fallback price is served.
    #[serde(default = "default_true")]
    pub live: bool,
    #[serde(default = "default_price_asset_id")]
    pub asset_id: String,
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
    #[serde(default = "default_fallback_price")]
    pub fallback_price: Decimal,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            live: true,
            asset_id: default_price_asset_id(),
            freshness_secs: default_freshness_secs(),
            fallback_price: default_fallback_price(),
            base_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
        }
    }
}

/// Starting balances and rates for the paper collaborators.
#[derive(Debug, Deserialize, Clone)]
pub struct PaperConfig {
    #[serde(default)]
    pub fee_vault_balance: Decimal,
    #[serde(default)]
    pub secondary_balance: Decimal,
    #[serde(default)]
    pub accrued_fees: Decimal,
    #[serde(default)]
    pub reserve_holdings: Decimal,
    #[serde(default)]
    pub reserve_gas: Decimal,
    /// Reserve units quoted per native unit.
    #[serde(default = "default_native_to_reserve")]
    pub native_to_reserve_rate: Decimal,
    /// Native units quoted per reserve unit.
    #[serde(default = "default_reserve_to_native")]
    pub reserve_to_native_rate: Decimal,
    #[serde(default = "default_tokens_per_native")]
    pub tokens_per_native: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fee_vault_balance: Decimal::ZERO,
            secondary_balance: Decimal::ZERO,
            accrued_fees: Decimal::ZERO,
            reserve_holdings: Decimal::ZERO,
            reserve_gas: Decimal::ZERO,
            native_to_reserve_rate: default_native_to_reserve(),
            reserve_to_native_rate: default_reserve_to_native(),
            tokens_per_native: default_tokens_per_native(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}
fn default_name() -> String {
    "FLYWHEEL-001".into()
}
fn default_tick_secs() -> u64 {
    10
}
fn default_database_url() -> String {
    "sqlite://flywheel.db".into()
}
fn default_fee_secs() -> u64 {
    5 * 60
}
fn default_redeploy_secs() -> u64 {
    15 * 60
}
fn default_long_fee_secs() -> u64 {
    15 * 60
}
fn default_long_redeploy_secs() -> u64 {
    3 * 60 * 60
}
fn default_buyback_secs() -> u64 {
    5 * 60
}
fn default_snapshot_secs() -> u64 {
    15
}
fn default_primary_chain() -> String {
    "sol".into()
}
fn default_reserve_chain() -> String {
    "eth".into()
}
fn default_native_asset() -> String {
    "sol".into()
}
fn default_reserve_asset() -> String {
    "xaut".into()
}
fn default_reserve_token_id() -> String {
    "0x68749665FF8D2d112Fa859AA293F07A622782F38".into()
}
fn default_pool() -> String {
    "pump".into()
}
fn default_gas_reserve() -> Decimal {
    dec!(0.005)
}
fn default_min_swap() -> Decimal {
    dec!(0.01)
}
fn default_sweep_threshold() -> Decimal {
    dec!(0.005)
}
fn default_sweep_retain() -> Decimal {
    dec!(0.002)
}
fn default_reserve_gas_minimum() -> Decimal {
    dec!(0.005)
}
fn default_min_sell() -> Decimal {
    dec!(0.01)
}
fn default_redeploy_fraction() -> Decimal {
    dec!(0.10)
}
fn default_buyback_threshold() -> Decimal {
    dec!(0.05)
}
fn default_buyback_retain() -> Decimal {
    dec!(0.01)
}
fn default_primary_env() -> String {
    "FEE_VAULT_PRIVATE_KEY".into()
}
fn default_secondary_env() -> String {
    "CREATOR_WALLET_PRIVATE_KEY".into()
}
fn default_reserve_env() -> String {
    "RESERVE_VAULT_PRIVATE_KEY".into()
}
fn default_relayer_key_env() -> String {
    "FEE_RELAYER_API_KEY".into()
}
fn default_price_asset_id() -> String {
    "tether-gold".into()
}
fn default_freshness_secs() -> u64 {
    60
}
fn default_fallback_price() -> Decimal {
    dec!(2650)
}
fn default_port() -> u16 {
    3000
}
fn default_native_to_reserve() -> Decimal {
    dec!(0.05)
}
fn default_reserve_to_native() -> Decimal {
    dec!(20)
}
fn default_tokens_per_native() -> Decimal {
    dec!(1000000)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Settings that are missing or unusable. Each one degrades a feature;
    /// none stops the agent.
    pub fn validate(&self) -> Vec<String> {
        let mut missing = Vec::new();

        if self.wallets.fee_vault.is_empty() {
            missing.push("wallets.fee_vault".to_string());
        }
        if self.wallets.reserve_vault.is_empty() {
            missing.push("wallets.reserve_vault".to_string());
        }
        if self.assets.primary_token.is_empty() {
            missing.push("assets.primary_token".to_string());
        }
        if self.flywheel.redeploy_fraction <= Decimal::ZERO || self.flywheel.redeploy_fraction > Decimal::ONE {
            missing.push("flywheel.redeploy_fraction (must be in (0, 1])".to_string());
        }
        if self.agent.tick_secs == 0 {
            missing.push("agent.tick_secs (must be positive)".to_string());
        }

        if !self.agent.dry_run {
            for env in [&self.keys.primary_env, &self.keys.reserve_env] {
                if std::env::var(env).map(|v| v.is_empty()).unwrap_or(true) {
                    missing.push(format!("env {env}"));
                }
            }
            if self.relayer.enabled && std::env::var(&self.relayer.api_key_env).is_err() {
                missing.push(format!("env {}", self.relayer.api_key_env));
            }
        }

        missing
    }

    /// Build the keyring. Paper mode derives keys from the wallet addresses;
    /// live mode reads key material from the configured env vars. A missing
    /// address or secret leaves that slot empty.
    pub fn keyring(&self) -> Keyring {
        let key = |id: &str, address: Option<&str>, env: &str| -> Option<Arc<SigningKey>> {
            let address = address.filter(|a| !a.is_empty())?;
            if self.agent.dry_run {
                return Some(Arc::new(SigningKey::paper(id, address)));
            }
            match std::env::var(env) {
                Ok(secret) if !secret.is_empty() => {
                    Some(Arc::new(SigningKey::new(id, address, SecretString::new(secret))))
                }
                _ => {
                    warn!(key = id, env, "Signing key not set, dependent workflows are disabled");
                    None
                }
            }
        };

        Keyring {
            primary: key("primary", Some(&self.wallets.fee_vault), &self.keys.primary_env),
            secondary: key(
                "secondary",
                self.wallets.secondary.as_deref(),
                &self.keys.secondary_env,
            ),
            reserve: key("reserve", Some(&self.wallets.reserve_vault), &self.keys.reserve_env),
        }
    }
}
