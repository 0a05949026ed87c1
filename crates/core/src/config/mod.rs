//! Pool configuration.
//!
//! This module provides:
//! - Scale constants per pool version
//! - Asset configuration (decimals, risk ratios, rate curve)
//! - Pool configuration loading from TOML

mod asset_config;
mod constants;
mod pool;

pub use asset_config::{AssetConfig, MAX_DECIMALS};
pub use constants::MasterConstants;
pub use pool::{PoolAsset, PoolConfig};

#[cfg(test)]
pub(crate) use asset_config::tests::sample_config;
