//! Lending pool risk core.
//!
//! This crate provides the pure, synchronous side of the lending pool:
//! - Fixed-point arithmetic at the pool's scale constants
//! - Pool and asset configuration loading from TOML
//! - Asset identifiers, principals and accrual state
//! - Interest accrual and present-value conversion
//! - Health parameters, liquidation sizing and health-factor prediction
//!
//! Nothing here performs I/O; price collection lives in `lendwatch-oracle`.

pub mod asset;
pub mod config;
mod error;
pub mod interest;
mod liquidation;
pub mod math;

pub use asset::{
    AssetData, AssetDataMap, AssetId, Balance, BalanceKind, PriceMap, Principals,
};
pub use config::{AssetConfig, MasterConstants, PoolAsset, PoolConfig, MAX_DECIMALS};
pub use error::RiskError;
pub use interest::{
    accrue_all, asset_apy, asset_interest, present_value, unix_now, utilization, AssetApy,
    AssetInterest,
};
pub use liquidation::{
    health_factor, is_bad_debt, BalanceChange, HealthOperation, HealthParams, LiquidationResult,
    RiskEngine,
};
