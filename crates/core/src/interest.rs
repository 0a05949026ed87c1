//! Interest accrual and present-value conversion.
//!
//! Mirrors the pool contract: principals are converted to live balances via
//! the supply/borrow accrual indices, and indices are advanced with a
//! piecewise-linear borrow rate driven by utilization.

use alloy::primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::asset::{AssetData, AssetDataMap, Balance};
use crate::config::{AssetConfig, MasterConstants, PoolConfig};
use crate::error::RiskError;
use crate::math::{mul_div, scaled_mul, to_f64};

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

/// Present value of a signed principal.
///
/// Positive principals are supply balances scaled by `s_rate`, negative
/// principals are borrow balances scaled by `b_rate`. A zero principal is
/// always `{0, None}` whatever the indices.
pub fn present_value(
    s_rate: U256,
    b_rate: U256,
    principal: I256,
    constants: &MasterConstants,
) -> Balance {
    if principal.is_zero() {
        return Balance::ZERO;
    }
    let factor = constants.factor();
    if principal.is_negative() {
        Balance::borrow(scaled_mul(principal.unsigned_abs(), b_rate, factor))
    } else {
        Balance::supply(scaled_mul(principal.unsigned_abs(), s_rate, factor))
    }
}

/// Per-second interest rates of an asset (factor scale).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInterest {
    pub supply_interest: U256,
    pub borrow_interest: U256,
}

/// Borrowed present value over supplied present value (factor scale).
pub fn utilization(data: &AssetData, constants: &MasterConstants) -> U256 {
    let factor = constants.factor();
    let total_supply = scaled_mul(data.total_supply, data.s_rate, factor);
    if total_supply.is_zero() {
        return U256::ZERO;
    }
    let total_borrow = scaled_mul(data.total_borrow, data.b_rate, factor);
    mul_div(total_borrow, factor, total_supply)
}

/// Current supply and borrow rates implied by the rate curve.
pub fn asset_interest(
    config: &AssetConfig,
    data: &AssetData,
    constants: &MasterConstants,
) -> AssetInterest {
    let factor = constants.factor();
    let utilization = utilization(data, constants);
    let target = config.target_utilization();

    let borrow_interest = if utilization < target {
        config.base_borrow_rate() + scaled_mul(config.borrow_rate_slope_low(), utilization, factor)
    } else {
        config.base_borrow_rate()
            + scaled_mul(config.borrow_rate_slope_low(), target, factor)
            + scaled_mul(config.borrow_rate_slope_high(), utilization - target, factor)
    };

    // Reserve factor removes the protocol's cut from what suppliers earn.
    let coefficient = constants.coefficient();
    let supply_interest = mul_div(
        scaled_mul(borrow_interest, utilization, factor),
        coefficient - config.reserve_factor(),
        coefficient,
    );

    AssetInterest {
        supply_interest,
        borrow_interest,
    }
}

impl AssetData {
    /// Advance both accrual indices to `now`.
    ///
    /// Returns `false` without touching the state when no time has elapsed,
    /// so calling twice with the same timestamp is a no-op.
    pub fn advance(&mut self, config: &AssetConfig, constants: &MasterConstants, now: u64) -> bool {
        if now <= self.last_accrual {
            return false;
        }
        let elapsed = U256::from(now - self.last_accrual);
        let factor = constants.factor();
        let interest = asset_interest(config, self, constants);

        self.s_rate += mul_div(self.s_rate, interest.supply_interest * elapsed, factor);
        self.b_rate += mul_div(self.b_rate, interest.borrow_interest * elapsed, factor);
        self.last_accrual = now;

        trace!(
            s_rate = %self.s_rate,
            b_rate = %self.b_rate,
            elapsed = %elapsed,
            "Advanced accrual indices"
        );
        true
    }

    /// Copy of this state advanced to `now`.
    pub fn accrued(&self, config: &AssetConfig, constants: &MasterConstants, now: u64) -> Self {
        let mut data = self.clone();
        data.advance(config, constants, now);
        data
    }

    /// `(s_rate, b_rate)` as they would be at `now`, without mutating.
    pub fn current_rates(
        &self,
        config: &AssetConfig,
        constants: &MasterConstants,
        now: u64,
    ) -> (U256, U256) {
        let data = self.accrued(config, constants, now);
        (data.s_rate, data.b_rate)
    }

    /// Advance to the current wall-clock time.
    pub fn advance_to_now(&mut self, config: &AssetConfig, constants: &MasterConstants) -> bool {
        self.advance(config, constants, unix_now())
    }

    /// Present value of `principal` under this state's indices.
    pub fn present_value(&self, principal: I256, constants: &MasterConstants) -> Balance {
        present_value(self.s_rate, self.b_rate, principal, constants)
    }
}

/// Advance every listed asset of a pool to `now`.
///
/// Fails if any listed asset has no accrual state; a default rate is never
/// substituted.
pub fn accrue_all(
    pool: &PoolConfig,
    data: &mut AssetDataMap,
    now: u64,
) -> Result<usize, RiskError> {
    let mut advanced = 0;
    for asset in &pool.assets {
        let id = asset.id();
        let state = data.get_mut(&id).ok_or(RiskError::MissingAssetData(id))?;
        if state.advance(&asset.config, &pool.constants, now) {
            advanced += 1;
        }
    }
    debug!(pool = %pool.name, advanced, now, "Accrued pool indices");
    Ok(advanced)
}

/// Annualised rates, for display only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetApy {
    pub supply_apy: f64,
    pub borrow_apy: f64,
}

/// Compound the current per-second rates over a year.
pub fn asset_apy(config: &AssetConfig, data: &AssetData, constants: &MasterConstants) -> AssetApy {
    let interest = asset_interest(config, data, constants);
    let factor = constants.factor();
    let compound = |rate: U256| (1.0 + to_f64(rate, factor)).powf(SECONDS_PER_YEAR) - 1.0;
    AssetApy {
        supply_apy: compound(interest.supply_interest),
        borrow_apy: compound(interest.borrow_interest),
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
