//! Pool scale constants.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// Fixed-point scale constants of one pool version.
///
/// Each arithmetic domain has its own divisor. Mixing them (for example
/// scaling a liquidation threshold by the factor scale) produces values the
/// contract would never compute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConstants {
    /// Interest-rate factor and accrual index scale
    #[serde(default = "default_factor_scale")]
    pub factor_scale: u64,

    /// Scale of collateral factor, liquidation threshold, liquidation bonus,
    /// reserve factor and liquidation reserve factor
    #[serde(default = "default_coefficient_scale")]
    pub coefficient_scale: u64,

    /// Price precision
    #[serde(default = "default_price_scale")]
    pub price_scale: u64,

    /// Origination fee precision
    #[serde(default = "default_origination_fee_scale")]
    pub origination_fee_scale: u64,

    /// Collateral worth below which a liquidation may take the whole
    /// dominant collateral instead of half of it (price-scaled worth)
    #[serde(default = "default_collateral_worth_threshold")]
    pub collateral_worth_threshold: u64,

    /// Raw units subtracted from a computed liquidation amount
    #[serde(default = "default_liquidation_amount_margin")]
    pub liquidation_amount_margin: u64,

    /// Percentage of the computed minimum collateral a liquidator asks for
    #[serde(default = "default_min_collateral_haircut_pct")]
    pub min_collateral_haircut_pct: u64,
}

fn default_factor_scale() -> u64 {
    1_000_000_000_000
}
fn default_coefficient_scale() -> u64 {
    10_000
}
fn default_price_scale() -> u64 {
    1_000_000_000
}
fn default_origination_fee_scale() -> u64 {
    1_000_000_000
}
fn default_collateral_worth_threshold() -> u64 {
    100_000_000
}
fn default_liquidation_amount_margin() -> u64 {
    5
}
fn default_min_collateral_haircut_pct() -> u64 {
    97
}

impl Default for MasterConstants {
    fn default() -> Self {
        Self {
            factor_scale: default_factor_scale(),
            coefficient_scale: default_coefficient_scale(),
            price_scale: default_price_scale(),
            origination_fee_scale: default_origination_fee_scale(),
            collateral_worth_threshold: default_collateral_worth_threshold(),
            liquidation_amount_margin: default_liquidation_amount_margin(),
            min_collateral_haircut_pct: default_min_collateral_haircut_pct(),
        }
    }
}

impl MasterConstants {
    #[inline]
    pub fn factor(&self) -> U256 {
        U256::from(self.factor_scale)
    }

    #[inline]
    pub fn coefficient(&self) -> U256 {
        U256::from(self.coefficient_scale)
    }

    #[inline]
    pub fn price(&self) -> U256 {
        U256::from(self.price_scale)
    }

    #[inline]
    pub fn origination_fee(&self) -> U256 {
        U256::from(self.origination_fee_scale)
    }

    #[inline]
    pub fn worth_threshold(&self) -> U256 {
        U256::from(self.collateral_worth_threshold)
    }

    #[inline]
    pub fn amount_margin(&self) -> U256 {
        U256::from(self.liquidation_amount_margin)
    }

    #[inline]
    pub fn haircut_pct(&self) -> U256 {
        U256::from(self.min_collateral_haircut_pct)
    }

    /// Check the constants can be used as divisors.
    pub fn validate(&self) -> Result<(), String> {
        if self.factor_scale == 0
            || self.coefficient_scale == 0
            || self.price_scale == 0
            || self.origination_fee_scale == 0
        {
            return Err("scale constants must be non-zero".to_string());
        }
        if self.min_collateral_haircut_pct > 100 {
            return Err(format!(
                "min_collateral_haircut_pct {} exceeds 100",
                self.min_collateral_haircut_pct
            ));
        }
        Ok(())
    }
}
