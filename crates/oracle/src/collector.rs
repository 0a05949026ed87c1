//! Collector capability shared by the classic and Pyth collectors.

use alloy::primitives::U256;
use async_trait::async_trait;
use lendwatch_api::SignedPriceRecord;
use lendwatch_core::{AssetId, PoolConfig, PriceMap, Principals};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::cell::Cell;
use crate::OracleError;

/// Default validity window of a price set, in seconds.
pub const DEFAULT_TTL_SECS: u64 = 180;

/// Where a price set came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Provenance {
    /// `(oracle_id, timestamp)` of every classic node whose record was used
    Oracles(Vec<(u32, u64)>),
    /// Pyth feed ids the prices were derived from
    Feeds(Vec<U256>),
}

/// Aggregated prices plus the bundle that proves them on chain.
#[derive(Debug, Clone)]
pub struct PriceSet {
    pub prices: PriceMap,
    pub min_publish_time: u64,
    pub max_publish_time: u64,
    pub provenance: Provenance,
    pub bundle: Arc<Cell>,
}

impl PriceSet {
    pub fn price(&self, asset: &AssetId) -> Option<U256> {
        self.prices.get(asset).copied()
    }

    /// Wire form of the bundle.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bundle.to_bytes()
    }
}

/// Price collection for one pool.
#[async_trait]
pub trait Collector: Send + Sync + Debug {
    /// Pool whose assets this collector prices.
    fn pool(&self) -> &PoolConfig;

    /// Prices for `assets`.
    async fn get_prices(&self, assets: &[AssetId]) -> Result<PriceSet, OracleError>;

    /// Prices for every asset the account holds.
    async fn get_prices_for_liquidate(
        &self,
        principals: &Principals,
    ) -> Result<PriceSet, OracleError> {
        let assets = liquidation_assets(self.pool(), principals)?;
        self.get_prices(&assets).await
    }

    /// Prices for a supply or withdraw, including the assets involved even
    /// when the account does not hold them yet.
    async fn get_prices_for_supply_withdraw(
        &self,
        principals: &Principals,
        supply_asset: Option<AssetId>,
        withdraw_asset: Option<AssetId>,
        collateral_to_debt: bool,
    ) -> Result<PriceSet, OracleError> {
        let assets = supply_withdraw_assets(
            self.pool(),
            principals,
            supply_asset,
            withdraw_asset,
            collateral_to_debt,
        )?;
        self.get_prices(&assets).await
    }
}

pub(crate) fn ensure_listed(pool: &PoolConfig, asset: &AssetId) -> Result<(), OracleError> {
    if pool.contains(asset) {
        Ok(())
    } else {
        Err(OracleError::ForeignAsset {
            asset: *asset,
            pool: pool.name.clone(),
        })
    }
}

/// Assets with a non-zero principal, all of which must be listed in `pool`.
pub fn liquidation_assets(
    pool: &PoolConfig,
    principals: &Principals,
) -> Result<Vec<AssetId>, OracleError> {
    let mut assets = Vec::new();
    for (asset, principal) in principals {
        if principal.is_zero() {
            continue;
        }
        ensure_listed(pool, asset)?;
        assets.push(*asset);
    }
    Ok(assets)
}

/// Held assets plus the supply and withdraw assets.
///
/// A collateral-to-debt conversion needs at least two distinct assets and is
/// rejected before any price is fetched.
pub fn supply_withdraw_assets(
    pool: &PoolConfig,
    principals: &Principals,
    supply_asset: Option<AssetId>,
    withdraw_asset: Option<AssetId>,
    collateral_to_debt: bool,
) -> Result<Vec<AssetId>, OracleError> {
    let mut assets: BTreeSet<AssetId> = liquidation_assets(pool, principals)?.into_iter().collect();
    for asset in [supply_asset, withdraw_asset].into_iter().flatten() {
        ensure_listed(pool, &asset)?;
        assets.insert(asset);
    }
    if collateral_to_debt && assets.len() < 2 {
        return Err(OracleError::SingleAssetConversion);
    }
    Ok(assets.into_iter().collect())
}

/// Reject record sets whose timestamps do not fit one `ttl` window.
pub fn check_window<'a>(
    records: impl IntoIterator<Item = &'a SignedPriceRecord>,
    ttl: u64,
) -> Result<(u64, u64), OracleError> {
    let mut bounds: Option<(u64, u64)> = None;
    for record in records {
        bounds = Some(match bounds {
            None => (record.timestamp, record.timestamp),
            Some((lo, hi)) => (lo.min(record.timestamp), hi.max(record.timestamp)),
        });
    }
    let (min, max) = bounds.unwrap_or((0, 0));
    let spread = max - min;
    if spread > ttl {
        return Err(OracleError::WindowExceeded { spread, ttl });
    }
    Ok((min, max))
}
