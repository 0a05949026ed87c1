//! Liquidation and health engine.
//!
//! Given prices, accrual state and an account's principals, computes the
//! account's collateral and debt worth, decides whether it can be liquidated,
//! sizes a liquidation the way the pool contract will accept it, and predicts
//! the health effect of a hypothetical balance change.
//!
//! All computations are pure: the engine only borrows immutable inputs and can
//! be shared across threads.

use alloy::primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::{debug, instrument};

use crate::asset::{AssetData, AssetDataMap, AssetId, Balance, BalanceKind, PriceMap, Principals};
use crate::config::{AssetConfig, PoolConfig};
use crate::error::RiskError;
use crate::math::{self, mul_div, ratio_f64};

/// Aggregate worth of an account, at price scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthParams {
    /// Worth of all supplied assets
    pub total_supply: U256,
    /// Worth of all borrowed assets
    pub total_debt: U256,
    /// Supplied worth weighted by liquidation threshold
    pub total_limit: U256,
    /// Supplied worth weighted by collateral factor
    pub total_borrow_limit: U256,
    /// `total_limit < total_debt`
    pub is_liquidatable: bool,
}

/// Outcome of a liquidation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationResult {
    NotLiquidable {
        total_debt: U256,
        total_collateral: U256,
    },
    Liquidable {
        total_debt: U256,
        total_collateral: U256,
        /// Asset the liquidator repays
        loan_asset: AssetId,
        /// Asset the liquidator receives
        collateral_asset: AssetId,
        /// Amount of `loan_asset` to repay, in its native units
        liquidation_amount: U256,
        /// Minimum `collateral_asset` the liquidator accepts, in its native units
        min_collateral_amount: U256,
        /// Collateral cannot cover the debt plus bonus
        bad_debt: bool,
    },
}

impl LiquidationResult {
    pub fn is_liquidable(&self) -> bool {
        matches!(self, Self::Liquidable { .. })
    }

    pub fn total_debt(&self) -> U256 {
        match self {
            Self::NotLiquidable { total_debt, .. } | Self::Liquidable { total_debt, .. } => {
                *total_debt
            }
        }
    }

    pub fn total_collateral(&self) -> U256 {
        match self {
            Self::NotLiquidable {
                total_collateral, ..
            }
            | Self::Liquidable {
                total_collateral, ..
            } => *total_collateral,
        }
    }
}

/// Kind of a hypothetical balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthOperation {
    Borrow,
    Repay,
    Supply,
    Withdraw,
}

/// A hypothetical change of one asset's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub operation: HealthOperation,
    pub asset: AssetId,
    /// Amount in the asset's native units
    pub amount: U256,
}

/// Bad debt: even seizing all collateral cannot cover the debt plus bonus.
///
/// `total_supply * bonus_scale < total_debt * liquidation_bonus`
pub fn is_bad_debt(
    total_supply: U256,
    total_debt: U256,
    liquidation_bonus: U256,
    coefficient_scale: U256,
) -> bool {
    total_supply * coefficient_scale < total_debt * liquidation_bonus
}

/// The largest single leg on one side of the account.
#[derive(Debug, Clone, Copy)]
struct Leg {
    asset: AssetId,
    worth: U256,
}

impl Leg {
    fn track(slot: &mut Option<Leg>, asset: AssetId, worth: U256) {
        match slot {
            Some(leg) if leg.worth >= worth => {}
            _ => *slot = Some(Leg { asset, worth }),
        }
    }
}

/// Running totals while walking an account.
#[derive(Debug, Default)]
struct Totals {
    supply: U256,
    debt: U256,
    limit: U256,
    borrow_limit: U256,
    top_collateral: Option<Leg>,
    top_debt: Option<Leg>,
}

impl Totals {
    fn into_params(self) -> HealthParams {
        HealthParams {
            total_supply: self.supply,
            total_debt: self.debt,
            total_limit: self.limit,
            total_borrow_limit: self.borrow_limit,
            is_liquidatable: self.limit < self.debt,
        }
    }
}

/// Risk engine over one snapshot of pool state and prices.
#[derive(Debug, Clone)]
pub struct RiskEngine<'a> {
    pool: &'a PoolConfig,
    assets_data: Cow<'a, AssetDataMap>,
    prices: &'a PriceMap,
}

impl<'a> RiskEngine<'a> {
    /// Create an engine over accrual state as given.
    pub fn new(pool: &'a PoolConfig, assets_data: &'a AssetDataMap, prices: &'a PriceMap) -> Self {
        Self {
            pool,
            assets_data: Cow::Borrowed(assets_data),
            prices,
        }
    }

    /// Create an engine over accrual state advanced to `now`.
    pub fn at_time(
        pool: &'a PoolConfig,
        assets_data: &AssetDataMap,
        prices: &'a PriceMap,
        now: u64,
    ) -> Self {
        let accrued = assets_data
            .iter()
            .map(|(id, data)| {
                let data = match pool.asset(id) {
                    Some(config) => data.accrued(config, &pool.constants, now),
                    None => data.clone(),
                };
                (*id, data)
            })
            .collect();
        Self {
            pool,
            assets_data: Cow::Owned(accrued),
            prices,
        }
    }

    pub fn pool(&self) -> &PoolConfig {
        self.pool
    }

    fn config(&self, asset: &AssetId) -> Result<&'a AssetConfig, RiskError> {
        self.pool.require(asset)
    }

    fn data(&self, asset: &AssetId) -> Result<&AssetData, RiskError> {
        self.assets_data
            .get(asset)
            .ok_or(RiskError::MissingAssetData(*asset))
    }

    fn price(&self, asset: &AssetId) -> Result<U256, RiskError> {
        let price = *self.prices.get(asset).ok_or(RiskError::MissingPrice(*asset))?;
        if price.is_zero() {
            return Err(RiskError::ZeroPrice(*asset));
        }
        Ok(price)
    }

    /// Present value of a principal of `asset`.
    pub fn balance(&self, asset: &AssetId, principal: I256) -> Result<Balance, RiskError> {
        if principal.is_zero() {
            return Ok(Balance::ZERO);
        }
        self.config(asset)?;
        Ok(self.data(asset)?.present_value(principal, &self.pool.constants))
    }

    /// Worth of `amount` native units of `asset`: `amount * price / 10^decimals`.
    pub fn worth(&self, asset: &AssetId, amount: U256) -> Result<U256, RiskError> {
        let config = self.config(asset)?;
        Ok(mul_div(amount, self.price(asset)?, config.unit()))
    }

    /// Add a balance of `asset` to the running totals.
    fn accumulate(
        &self,
        totals: &mut Totals,
        asset: AssetId,
        balance: Balance,
    ) -> Result<(), RiskError> {
        if balance.kind == BalanceKind::None {
            return Ok(());
        }
        let config = self.config(&asset)?;
        let worth = self.worth(&asset, balance.amount)?;
        let coefficient = self.pool.constants.coefficient();

        match balance.kind {
            BalanceKind::Supply => {
                totals.supply += worth;
                totals.limit += mul_div(worth, config.liquidation_threshold(), coefficient);
                totals.borrow_limit += mul_div(worth, config.collateral_factor(), coefficient);
                Leg::track(&mut totals.top_collateral, asset, worth);
            }
            BalanceKind::Borrow => {
                totals.debt += worth;
                Leg::track(&mut totals.top_debt, asset, worth);
            }
            BalanceKind::None => {}
        }
        Ok(())
    }

    fn totals(&self, principals: &Principals, skip: Option<&AssetId>) -> Result<Totals, RiskError> {
        let mut totals = Totals::default();
        for (asset, principal) in principals {
            if principal.is_zero() || Some(asset) == skip {
                continue;
            }
            let balance = self.balance(asset, *principal)?;
            self.accumulate(&mut totals, *asset, balance)?;
        }
        Ok(totals)
    }

    /// Aggregate worth and liquidability of an account.
    pub fn health_params(&self, principals: &Principals) -> Result<HealthParams, RiskError> {
        Ok(self.totals(principals, None)?.into_params())
    }

    /// Health factor `1 - debt / limit`, clamped to `[0, 1]`.
    ///
    /// An account with no liquidation limit reports 1.
    pub fn health_factor(&self, principals: &Principals) -> Result<f64, RiskError> {
        let params = self.health_params(principals)?;
        Ok(health_factor(params.total_debt, params.total_limit))
    }

    /// Decide whether an account is liquidable and size the liquidation.
    ///
    /// Only the dominant collateral and dominant debt legs are targeted. The
    /// repay amount is bounded by half the dominant collateral (or all of it
    /// below the worth threshold, or for bad debt) net of the liquidation
    /// bonus, and by the dominant debt itself.
    #[instrument(skip_all, fields(pool = %self.pool.name))]
    pub fn liquidation_data(
        &self,
        principals: &Principals,
    ) -> Result<LiquidationResult, RiskError> {
        let totals = self.totals(principals, None)?;

        if totals.limit >= totals.debt {
            return Ok(LiquidationResult::NotLiquidable {
                total_debt: totals.debt,
                total_collateral: totals.supply,
            });
        }

        let loan = totals.top_debt.ok_or(RiskError::NoCollateral)?;
        let collateral = totals.top_collateral.ok_or(RiskError::NoCollateral)?;

        let constants = &self.pool.constants;
        let coefficient = constants.coefficient();
        let loan_config = self.config(&loan.asset)?;
        let collateral_config = self.config(&collateral.asset)?;
        let loan_price = self.price(&loan.asset)?;
        let collateral_price = self.price(&collateral.asset)?;
        let loan_unit = loan_config.unit();
        let collateral_unit = collateral_config.unit();
        let bonus = collateral_config.liquidation_bonus();

        let bad_debt = is_bad_debt(totals.supply, totals.debt, bonus, coefficient);

        let collateral_cap = if bad_debt {
            collateral.worth
        } else {
            math::max(
                collateral.worth / U256::from(2u64),
                math::min(collateral.worth, constants.worth_threshold()),
            )
        };

        let by_collateral = collateral_cap * loan_unit * coefficient / bonus / loan_price;
        let by_debt = loan.worth * loan_unit / loan_price;
        let liquidation_amount =
            math::min(by_collateral, by_debt).saturating_sub(constants.amount_margin());

        let min_collateral_amount = liquidation_amount * loan_price * bonus / coefficient
            * collateral_unit
            / loan_unit
            / collateral_price;
        let min_collateral_amount =
            min_collateral_amount * constants.haircut_pct() / U256::from(100u64);

        debug!(
            loan_asset = %loan.asset,
            collateral_asset = %collateral.asset,
            total_debt = %totals.debt,
            total_limit = %totals.limit,
            liquidation_amount = %liquidation_amount,
            min_collateral_amount = %min_collateral_amount,
            bad_debt,
            "Position is liquidable"
        );

        Ok(LiquidationResult::Liquidable {
            total_debt: totals.debt,
            total_collateral: totals.supply,
            loan_asset: loan.asset,
            collateral_asset: collateral.asset,
            liquidation_amount,
            min_collateral_amount,
            bad_debt,
        })
    }

    /// Health factor after applying `change` to the account.
    pub fn predict_health_factor(
        &self,
        principals: &Principals,
        change: &BalanceChange,
    ) -> Result<f64, RiskError> {
        let mut totals = self.totals(principals, Some(&change.asset))?;

        let principal = principals.get(&change.asset).copied().unwrap_or(I256::ZERO);
        let current = if principal.is_zero() {
            Balance::ZERO
        } else {
            self.balance(&change.asset, principal)?
        };
        let current = current.signed().ok_or(RiskError::Overflow)?;
        let delta = I256::try_from(change.amount).map_err(|_| RiskError::Overflow)?;

        let updated = match change.operation {
            HealthOperation::Supply | HealthOperation::Repay => current.checked_add(delta),
            HealthOperation::Borrow | HealthOperation::Withdraw => current.checked_sub(delta),
        }
        .ok_or(RiskError::Overflow)?;

        self.config(&change.asset)?;
        self.accumulate(&mut totals, change.asset, Balance::from_signed(updated))?;
        Ok(health_factor(totals.debt, totals.limit))
    }

    /// Amount of `asset` the account can still borrow, in native units.
    ///
    /// Bounded by the collateral-factor borrow limit and by pool liquidity.
    /// The origination fee is added to the debt, so the limit covers
    /// `amount * (1 + fee)`.
    pub fn available_to_borrow(
        &self,
        principals: &Principals,
        asset: &AssetId,
    ) -> Result<U256, RiskError> {
        let params = self.health_params(principals)?;
        let config = self.config(asset)?;
        let headroom = params.total_borrow_limit.saturating_sub(params.total_debt);
        let by_limit = mul_div(headroom, config.unit(), self.price(asset)?);

        let fee_scale = self.pool.constants.origination_fee();
        let with_fee = fee_scale + U256::from(config.origination_fee);
        let by_limit = mul_div(by_limit, fee_scale, with_fee);
        Ok(math::min(by_limit, self.data(asset)?.balance))
    }

    /// Largest withdrawal of `asset` that keeps debt within the borrow limit.
    pub fn max_withdraw_amount(
        &self,
        principals: &Principals,
        asset: &AssetId,
    ) -> Result<U256, RiskError> {
        let principal = principals.get(asset).copied().unwrap_or(I256::ZERO);
        let balance = self.balance(asset, principal)?;
        if balance.kind != BalanceKind::Supply {
            return Ok(U256::ZERO);
        }

        let params = self.health_params(principals)?;
        let config = self.config(asset)?;
        let liquidity = self.data(asset)?.balance;

        let amount = if params.total_debt.is_zero() || config.collateral_factor == 0 {
            balance.amount
        } else {
            let headroom = params.total_borrow_limit.saturating_sub(params.total_debt);
            let coefficient = self.pool.constants.coefficient();
            let worth = mul_div(headroom, coefficient, config.collateral_factor());
            math::min(balance.amount, mul_div(worth, config.unit(), self.price(asset)?))
        };
        Ok(math::min(amount, liquidity))
    }
}

/// `clamp(1 - debt / limit, 0, 1)`; exactly 1 when `limit` is zero.
pub fn health_factor(total_debt: U256, total_limit: U256) -> f64 {
    if total_limit.is_zero() {
        return 1.0;
    }
    (1.0 - ratio_f64(total_debt, total_limit)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{sample_config, PoolAsset};

    const FACTOR: u64 = 1_000_000_000_000;
    const PRICE: u64 = 1_000_000_000;

    fn i(v: i64) -> I256 {
        I256::try_from(v).unwrap()
    }

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    fn flat_state() -> AssetData {
        AssetData {
            s_rate: u(FACTOR),
            b_rate: u(FACTOR),
            total_supply: u(1_000_000_000_000),
            total_borrow: u(0),
            last_accrual: 1_700_000_000,
            balance: u(1_000_000_000_000),
        }
    }

    /// Two zero-decimal assets priced at 1.0, so principal equals worth / 1e9.
    struct Fixture {
        pool: PoolConfig,
        data: AssetDataMap,
        prices: PriceMap,
        a: AssetId,
        b: AssetId,
    }

    fn fixture() -> Fixture {
        let pool = PoolConfig::new(
            "test",
            vec![
                PoolAsset::new("A", sample_config(0)),
                PoolAsset::new("B", sample_config(0)),
            ],
        );
        let a = pool.assets[0].id();
        let b = pool.assets[1].id();
        let data = [(a, flat_state()), (b, flat_state())].into_iter().collect();
        let prices = [(a, u(PRICE)), (b, u(PRICE))].into_iter().collect();
        Fixture {
            pool,
            data,
            prices,
            a,
            b,
        }
    }

    #[test]
    fn test_health_params_totals() {
        let f = fixture();
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let principals: Principals = [(f.a, i(1_000)), (f.b, i(-500))].into_iter().collect();

        let params = engine.health_params(&principals).unwrap();
        assert_eq!(params.total_supply, u(1_000 * PRICE));
        assert_eq!(params.total_debt, u(500 * PRICE));
        assert_eq!(params.total_limit, u(850 * PRICE));
        assert_eq!(params.total_borrow_limit, u(800 * PRICE));
        assert!(!params.is_liquidatable);
    }

    #[test]
    fn test_liquidable_example() {
        // A supplied worth 900, B borrowed worth 1000: limit 765 < 1000.
        let f = fixture();
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let principals: Principals = [(f.a, i(900)), (f.b, i(-1_000))].into_iter().collect();

        let params = engine.health_params(&principals).unwrap();
        assert_eq!(params.total_limit, u(765 * PRICE));
        assert!(params.is_liquidatable);

        match engine.liquidation_data(&principals).unwrap() {
            LiquidationResult::Liquidable {
                loan_asset,
                collateral_asset,
                liquidation_amount,
                min_collateral_amount,
                bad_debt,
                total_debt,
                total_collateral,
            } => {
                assert_eq!(loan_asset, f.b);
                assert_eq!(collateral_asset, f.a);
                assert_eq!(total_debt, u(1_000 * PRICE));
                assert_eq!(total_collateral, u(900 * PRICE));
                // 900 * 10000 < 1000 * 10500
                assert!(bad_debt);
                // Full collateral / 1.05 = 857.14 -> 857, minus margin 5
                assert_eq!(liquidation_amount, u(852));
                assert!(liquidation_amount <= u(1_000));
                // 852 * 1.05 = 894.6 -> 894, * 0.97 = 867.18 -> 867
                assert_eq!(min_collateral_amount, u(867));
            }
            other => panic!("expected liquidable, got {:?}", other),
        }
    }

    #[test]
    fn test_half_collateral_cap_without_bad_debt() {
        let f = fixture();
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        // limit 0.85 * 1100 = 935 < 1000, supply 1100 >= 1000 * 1.05
        let principals: Principals = [(f.a, i(1_100)), (f.b, i(-1_000))].into_iter().collect();

        match engine.liquidation_data(&principals).unwrap() {
            LiquidationResult::Liquidable {
                liquidation_amount,
                bad_debt,
                ..
            } => {
                assert!(!bad_debt);
                // 550 / 1.05 = 523.8 -> 523, minus 5
                assert_eq!(liquidation_amount, u(518));
            }
            other => panic!("expected liquidable, got {:?}", other),
        }
    }

    #[test]
    fn test_whole_collateral_below_worth_threshold() {
        let mut f = fixture();
        f.prices.insert(f.a, u(1_000_000));
        f.prices.insert(f.b, u(1_000_000));
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        // Collateral worth 9e7 is under the 1e8 threshold; limit 7.65e7 < 8e7,
        // and 9e7 >= 8e7 * 1.05 so the debt is not bad.
        let principals: Principals = [(f.a, i(90)), (f.b, i(-80))].into_iter().collect();

        match engine.liquidation_data(&principals).unwrap() {
            LiquidationResult::Liquidable {
                liquidation_amount,
                min_collateral_amount,
                bad_debt,
                total_collateral,
                ..
            } => {
                assert!(!bad_debt);
                assert_eq!(total_collateral, u(90_000_000));
                // Whole collateral: 9e7 / 1.05 / 1e6 = 85.7 -> 85, capped by debt 80,
                // minus 5. Half of it would have allowed only 42 - 5.
                assert_eq!(liquidation_amount, u(75));
                // 75 * 1.05 = 78.75 -> 78, * 0.97 = 75.66 -> 75
                assert_eq!(min_collateral_amount, u(75));
            }
            other => panic!("expected liquidable, got {:?}", other),
        }
    }

    #[test]
    fn test_liquidable_example_with_distinct_prices() {
        // A +1000 at 0.9 is worth 900; B -900 at ~1.111 is worth ~1000.
        let mut f = fixture();
        let b_price = 1_111_111_111u64;
        f.prices.insert(f.a, u(900_000_000));
        f.prices.insert(f.b, u(b_price));
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let principals: Principals = [(f.a, i(1_000)), (f.b, i(-900))].into_iter().collect();

        let params = engine.health_params(&principals).unwrap();
        assert_eq!(params.total_supply, u(900 * PRICE));
        assert_eq!(params.total_debt, u(900 * b_price));
        assert_eq!(params.total_limit, u(765 * PRICE));

        match engine.liquidation_data(&principals).unwrap() {
            LiquidationResult::Liquidable {
                loan_asset,
                collateral_asset,
                liquidation_amount,
                min_collateral_amount,
                bad_debt,
                ..
            } => {
                assert_eq!(loan_asset, f.b);
                assert_eq!(collateral_asset, f.a);
                assert!(bad_debt);
                // 9e11 / 1.05 = 857142857142, / b_price = 771.4 -> 771, minus 5
                assert_eq!(liquidation_amount, u(766));
                // 766 * b_price * 1.05 = 893666666577, / 0.9e9 = 992.96 -> 992,
                // * 0.97 = 962.24 -> 962
                assert_eq!(min_collateral_amount, u(962));
            }
            other => panic!("expected liquidable, got {:?}", other),
        }
    }

    #[test]
    fn test_liquidability_flips_with_price() {
        let mut f = fixture();
        let principals: Principals = [(f.a, i(900)), (f.b, i(-1_000))].into_iter().collect();
        assert!(RiskEngine::new(&f.pool, &f.data, &f.prices)
            .liquidation_data(&principals)
            .unwrap()
            .is_liquidable());

        // Collateral price up 40%: limit 900 * 1.4 * 0.85 = 1071 > 1000.
        f.prices.insert(f.a, u(PRICE * 14 / 10));
        let result = RiskEngine::new(&f.pool, &f.data, &f.prices)
            .liquidation_data(&principals)
            .unwrap();
        assert!(!result.is_liquidable());
        assert_eq!(result.total_debt(), u(1_000 * PRICE));
        assert_eq!(result.total_collateral(), u(1_260 * PRICE));
    }

    #[test]
    fn test_dominant_legs_selected() {
        let mut f = fixture();
        let c = AssetId::from_symbol("C");
        f.pool.assets.push(PoolAsset::new("C", sample_config(0)));
        f.data.insert(c, flat_state());
        f.prices.insert(c, u(PRICE));

        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let principals: Principals = [(f.a, i(300)), (c, i(600)), (f.b, i(-1_000))]
            .into_iter()
            .collect();

        match engine.liquidation_data(&principals).unwrap() {
            LiquidationResult::Liquidable {
                collateral_asset,
                loan_asset,
                ..
            } => {
                assert_eq!(collateral_asset, c);
                assert_eq!(loan_asset, f.b);
            }
            other => panic!("expected liquidable, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_price_for_held_asset_is_fatal() {
        let mut f = fixture();
        f.prices.remove(&f.b);
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);

        let principals: Principals = [(f.a, i(1_000)), (f.b, i(-10))].into_iter().collect();
        assert_eq!(
            engine.health_params(&principals),
            Err(RiskError::MissingPrice(f.b))
        );

        // Not held: absent from the iteration.
        let principals: Principals = [(f.a, i(1_000)), (f.b, I256::ZERO)].into_iter().collect();
        assert!(engine.health_params(&principals).is_ok());
    }

    #[test]
    fn test_unknown_asset_is_fatal() {
        let f = fixture();
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let other = AssetId::from_symbol("OTHER");
        let principals: Principals = [(other, i(1))].into_iter().collect();
        assert_eq!(
            engine.health_params(&principals),
            Err(RiskError::UnknownAsset(other))
        );
    }

    #[test]
    fn test_health_factor_bounds() {
        assert_eq!(health_factor(u(0), u(0)), 1.0);
        assert_eq!(health_factor(u(500), u(0)), 1.0);
        assert_eq!(health_factor(u(0), u(100)), 1.0);
        assert!((health_factor(u(50), u(100)) - 0.5).abs() < 1e-12);
        assert_eq!(health_factor(u(200), u(100)), 0.0);
    }

    #[test]
    fn test_predict_health_factor() {
        let f = fixture();
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let principals: Principals = [(f.a, i(1_000)), (f.b, i(-425))].into_iter().collect();

        // limit 850, debt 425 -> 0.5
        assert!((engine.health_factor(&principals).unwrap() - 0.5).abs() < 1e-9);

        let borrow = BalanceChange {
            operation: HealthOperation::Borrow,
            asset: f.b,
            amount: u(425),
        };
        assert_eq!(engine.predict_health_factor(&principals, &borrow).unwrap(), 0.0);

        let repay = BalanceChange {
            operation: HealthOperation::Repay,
            asset: f.b,
            amount: u(425),
        };
        assert_eq!(engine.predict_health_factor(&principals, &repay).unwrap(), 1.0);

        // Withdraw half the collateral: limit 425, debt 425 -> 0
        let withdraw = BalanceChange {
            operation: HealthOperation::Withdraw,
            asset: f.a,
            amount: u(500),
        };
        assert_eq!(engine.predict_health_factor(&principals, &withdraw).unwrap(), 0.0);

        // Supply more: limit 1700, debt 425 -> 0.75
        let supply = BalanceChange {
            operation: HealthOperation::Supply,
            asset: f.a,
            amount: u(1_000),
        };
        let hf = engine.predict_health_factor(&principals, &supply).unwrap();
        assert!((hf - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_predict_withdraw_everything_is_healthy_by_convention() {
        let f = fixture();
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let principals: Principals = [(f.a, i(1_000))].into_iter().collect();
        let withdraw = BalanceChange {
            operation: HealthOperation::Withdraw,
            asset: f.a,
            amount: u(1_000),
        };
        assert_eq!(engine.predict_health_factor(&principals, &withdraw).unwrap(), 1.0);
    }

    #[test]
    fn test_borrow_and_withdraw_limits() {
        let f = fixture();
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let principals: Principals = [(f.a, i(1_000)), (f.b, i(-400))].into_iter().collect();

        // borrow limit 800, debt 400
        assert_eq!(engine.available_to_borrow(&principals, &f.b).unwrap(), u(400));
        // headroom 400 / 0.8 = 500 of A
        assert_eq!(engine.max_withdraw_amount(&principals, &f.a).unwrap(), u(500));
        // B is borrowed, nothing to withdraw
        assert_eq!(engine.max_withdraw_amount(&principals, &f.b).unwrap(), U256::ZERO);

        let no_debt: Principals = [(f.a, i(1_000))].into_iter().collect();
        assert_eq!(engine.max_withdraw_amount(&no_debt, &f.a).unwrap(), u(1_000));
    }

    #[test]
    fn test_borrow_limit_covers_origination_fee() {
        let mut f = fixture();
        // 2.5% on the 1e9 fee scale
        f.pool.assets[1].config.origination_fee = 25_000_000;
        let engine = RiskEngine::new(&f.pool, &f.data, &f.prices);
        let principals: Principals = [(f.a, i(1_000)), (f.b, i(-400))].into_iter().collect();

        // 400 / 1.025 = 390.2 -> 390
        assert_eq!(engine.available_to_borrow(&principals, &f.b).unwrap(), u(390));
    }

    #[test]
    fn test_at_time_accrues_debt() {
        let f = fixture();
        let mut data = f.data.clone();
        for state in data.values_mut() {
            state.total_borrow = u(500_000_000_000);
        }
        let principals: Principals = [(f.a, i(1_000)), (f.b, i(-800))].into_iter().collect();

        let now = 1_700_000_000 + 365 * 24 * 3600;
        let stale = RiskEngine::new(&f.pool, &data, &f.prices).health_params(&principals).unwrap();
        let fresh = RiskEngine::at_time(&f.pool, &data, &f.prices, now)
            .health_params(&principals)
            .unwrap();
        assert!(fresh.total_debt > stale.total_debt);
    }
}
