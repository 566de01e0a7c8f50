//! Workflow error taxonomy.
//!
//! Collaborators return `anyhow::Result`; workflows classify failures into
//! `FlywheelError` so the boundary knows whether to skip quietly or record
//! a `system_error` and fail the run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlywheelError {
    /// Missing secret or address. The affected feature is degraded.
    #[error("not configured: {0}")]
    Configuration(String),

    /// A balance or amount precondition the workflow cannot proceed without.
    #[error("{0}")]
    Precondition(String),

    /// Swap provider, fee relayer or DEX aggregator failure.
    #[error("{provider} error: {message}")]
    Provider { provider: &'static str, message: String },

    /// Balance read, broadcast or confirmation failure on a chain.
    #[error("{chain} chain error: {message}")]
    Chain { chain: String, message: String },

    /// Ledger read or write failure.
    #[error("ledger error: {0}")]
    Persistence(String),
}

impl FlywheelError {
    pub fn provider(provider: &'static str, err: impl std::fmt::Display) -> Self {
        FlywheelError::Provider {
            provider,
            message: format!("{err:#}"),
        }
    }

    pub fn chain(chain: &str, err: impl std::fmt::Display) -> Self {
        FlywheelError::Chain {
            chain: chain.to_string(),
            message: format!("{err:#}"),
        }
    }

    /// Configuration errors degrade silently; everything else is recorded.
    pub fn is_alarming(&self) -> bool {
        !matches!(self, FlywheelError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, FlywheelError>;
