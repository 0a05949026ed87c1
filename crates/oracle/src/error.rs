//! Error types for price collection and bundle packing.

use lendwatch_api::SourceError;
use lendwatch_core::{AssetId, RiskError};
use thiserror::Error;

use crate::cell::CellError;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("asset {asset} does not belong to pool {pool}")]
    ForeignAsset { asset: AssetId, pool: String },

    #[error("insufficient oracles: {available} available, {required} required")]
    InsufficientOracles { available: usize, required: usize },

    #[error("price records span {spread}s, wider than the {ttl}s window")]
    WindowExceeded { spread: u64, ttl: u64 },

    #[error("price published at {publish_time}, ahead of local time {now}")]
    FutureDated { publish_time: u64, now: u64 },

    #[error("no price for assets {0:?}")]
    MissingPrices(Vec<AssetId>),

    #[error("collateral-to-debt conversion needs at least two distinct assets")]
    SingleAssetConversion,

    #[error("invalid signature from oracle {oracle_id}")]
    InvalidSignature { oracle_id: u32 },

    #[error("invalid price bundle: {0}")]
    InvalidBundle(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Cell(#[from] CellError),

    #[error("invalid collector configuration: {0}")]
    Config(String),
}
