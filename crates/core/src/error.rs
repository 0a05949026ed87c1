//! Error types for the risk engine.

use thiserror::Error;

use crate::asset::AssetId;

/// Failures of a risk computation.
///
/// A held asset with missing configuration, accrual state or price is always
/// fatal: skipping it would understate the account's risk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("asset {0} is not part of the pool configuration")]
    UnknownAsset(AssetId),
    #[error("no accrual state for asset {0}")]
    MissingAssetData(AssetId),
    #[error("no price for asset {0}")]
    MissingPrice(AssetId),
    #[error("zero price for held asset {0}")]
    ZeroPrice(AssetId),
    #[error("position is liquidable but holds no collateral to seize")]
    NoCollateral,
    #[error("amount exceeds the signed balance range")]
    Overflow,
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
