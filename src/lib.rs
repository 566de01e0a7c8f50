//! FLYWHEEL: fee-to-reserve-to-buyback treasury agent
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod chains;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod keys;
pub mod providers;
pub mod scheduler;
pub mod storage;
pub mod types;
