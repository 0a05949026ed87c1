//! Per-asset risk and rate-curve parameters.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use super::MasterConstants;

/// Largest decimals whose unit `10^decimals` fits in a U256.
pub const MAX_DECIMALS: u8 = 77;

/// Individual asset configuration (TOML-loadable).
///
/// Ratios are expressed in [`MasterConstants::coefficient_scale`] units
/// (8000 = 80%); rates and utilization in [`MasterConstants::factor_scale`]
/// units per second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Token decimals
    pub decimals: u8,
    /// Share of supplied worth usable as borrow limit
    pub collateral_factor: u16,
    /// Share of supplied worth counted against debt for liquidation
    pub liquidation_threshold: u16,
    /// Collateral paid per unit of debt repaid (10500 = 105%)
    pub liquidation_bonus: u16,
    /// Protocol cut of the liquidation bonus
    #[serde(default)]
    pub liquidation_reserve_factor: u16,
    /// Protocol cut of borrow interest
    #[serde(default)]
    pub reserve_factor: u16,
    /// Borrow rate at zero utilization
    pub base_borrow_rate: u64,
    /// Borrow rate slope below target utilization
    pub borrow_rate_slope_low: u64,
    /// Borrow rate slope above target utilization
    pub borrow_rate_slope_high: u64,
    /// Supply rate slope below target (informational, not used in accrual)
    #[serde(default)]
    pub supply_rate_slope_low: u64,
    /// Supply rate slope above target (informational, not used in accrual)
    #[serde(default)]
    pub supply_rate_slope_high: u64,
    /// Kink of the borrow rate curve
    pub target_utilization: u64,
    /// Fee charged on new borrows, in [`MasterConstants::origination_fee_scale`] units
    #[serde(default)]
    pub origination_fee: u64,
    /// On-chain dust threshold, carried as listed
    #[serde(default)]
    pub dust: u64,
    /// Maximum total supply (0 = uncapped)
    #[serde(default)]
    pub max_total_supply: u64,
    /// Maximum total borrow (0 = uncapped)
    #[serde(default)]
    pub borrow_cap: u64,
}

impl AssetConfig {
    /// 10^decimals.
    pub fn unit(&self) -> U256 {
        crate::math::pow10(self.decimals)
    }

    pub fn collateral_factor(&self) -> U256 {
        U256::from(self.collateral_factor)
    }

    pub fn liquidation_threshold(&self) -> U256 {
        U256::from(self.liquidation_threshold)
    }

    pub fn liquidation_bonus(&self) -> U256 {
        U256::from(self.liquidation_bonus)
    }

    pub fn reserve_factor(&self) -> U256 {
        U256::from(self.reserve_factor)
    }

    pub fn base_borrow_rate(&self) -> U256 {
        U256::from(self.base_borrow_rate)
    }

    pub fn borrow_rate_slope_low(&self) -> U256 {
        U256::from(self.borrow_rate_slope_low)
    }

    pub fn borrow_rate_slope_high(&self) -> U256 {
        U256::from(self.borrow_rate_slope_high)
    }

    pub fn target_utilization(&self) -> U256 {
        U256::from(self.target_utilization)
    }

    /// Check ratios are consistent with the pool's coefficient scale.
    pub fn validate(&self, constants: &MasterConstants) -> Result<(), String> {
        if self.decimals > MAX_DECIMALS {
            return Err(format!(
                "decimals {} above maximum {}",
                self.decimals, MAX_DECIMALS
            ));
        }
        let scale = constants.coefficient_scale;
        if u64::from(self.collateral_factor) > scale
            || u64::from(self.liquidation_threshold) > scale
            || u64::from(self.reserve_factor) > scale
            || u64::from(self.liquidation_reserve_factor) > scale
        {
            return Err(format!("ratio exceeds coefficient scale {}", scale));
        }
        if self.collateral_factor > self.liquidation_threshold {
            return Err(format!(
                "collateral factor {} above liquidation threshold {}",
                self.collateral_factor, self.liquidation_threshold
            ));
        }
        if u64::from(self.liquidation_bonus) < scale {
            return Err(format!(
                "liquidation bonus {} below coefficient scale {}",
                self.liquidation_bonus, scale
            ));
        }
        if self.target_utilization > constants.factor_scale {
            return Err(format!(
                "target utilization {} above factor scale",
                self.target_utilization
            ));
        }
        Ok(())
    }
}
