//! solexit - position exit engine for Solana SPL tokens
//!
//! Watches open token positions, values them through an aggregator quote
//! and runs a staged sell pipeline (urgent signals, quote shocks, fast
//! exits, dynamic stops, profit locks and fallback rules) whose decisions
//! are executed through a tiered swap path with retry and backoff.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod pipeline;
pub mod position;
pub mod resilience;

#[cfg(test)]
mod testkit;

// Re-export commonly used types
pub use config::Config;
pub use engine::SellEngine;
pub use error::{Error, Result};
