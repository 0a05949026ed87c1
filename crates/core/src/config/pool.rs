//! Pool configuration: the versioned set of assets and scale constants.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::{AssetConfig, MasterConstants};
use crate::asset::AssetId;
use crate::error::RiskError;

/// An asset listed in a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAsset {
    /// Asset symbol (e.g. "TON", "USDT")
    pub symbol: String,
    /// Explicit identifier; derived from the symbol when absent
    #[serde(default)]
    pub id: Option<AssetId>,
    /// Risk and rate parameters
    #[serde(flatten)]
    pub config: AssetConfig,
}

impl PoolAsset {
    pub fn new(symbol: impl Into<String>, config: AssetConfig) -> Self {
        Self {
            symbol: symbol.into(),
            id: None,
            config,
        }
    }

    /// Resolved identifier.
    pub fn id(&self) -> AssetId {
        self.id.unwrap_or_else(|| AssetId::from_symbol(&self.symbol))
    }
}

/// Pool configuration file structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name (for logging/identification)
    pub name: String,
    /// Contract version these constants and assets belong to
    #[serde(default = "default_version")]
    pub version: u32,
    /// Scale constants
    #[serde(default)]
    pub constants: MasterConstants,
    /// Listed assets
    pub assets: Vec<PoolAsset>,
}

fn default_version() -> u32 {
    1
}

impl PoolConfig {
    pub fn new(name: impl Into<String>, assets: Vec<PoolAsset>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            constants: MasterConstants::default(),
            assets,
        }
    }

    /// Load from TOML content and validate.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse pool config: {}", e))?;
        config.validate()?;
        debug!(
            pool = %config.name,
            version = config.version,
            assets = config.assets.len(),
            "Loaded pool configuration"
        );
        Ok(config)
    }

    /// Load from file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Check constants, per-asset ratios and identifier uniqueness.
    pub fn validate(&self) -> Result<(), RiskError> {
        self.constants.validate().map_err(RiskError::InvalidConfig)?;

        let mut seen = std::collections::BTreeSet::new();
        for asset in &self.assets {
            if !seen.insert(asset.id()) {
                return Err(RiskError::InvalidConfig(format!(
                    "duplicate asset {} ({})",
                    asset.symbol,
                    asset.id()
                )));
            }
            asset
                .config
                .validate(&self.constants)
                .map_err(|e| RiskError::InvalidConfig(format!("{}: {}", asset.symbol, e)))?;
        }
        Ok(())
    }

    /// Configuration of an asset, if it belongs to this pool.
    pub fn asset(&self, id: &AssetId) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.id() == *id).map(|a| &a.config)
    }

    /// Configuration of an asset, failing if it is not listed.
    pub fn require(&self, id: &AssetId) -> Result<&AssetConfig, RiskError> {
        self.asset(id).ok_or(RiskError::UnknownAsset(*id))
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.asset(id).is_some()
    }

    /// Look up an asset by symbol.
    pub fn by_symbol(&self, symbol: &str) -> Option<&PoolAsset> {
        self.assets.iter().find(|a| a.symbol == symbol)
    }

    /// All asset identifiers in listing order.
    pub fn asset_ids(&self) -> impl Iterator<Item = AssetId> + '_ {
        self.assets.iter().map(PoolAsset::id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL_TOML: &str = r#"
name = "main"
version = 3

[constants]
liquidation_amount_margin = 5

[[assets]]
symbol = "TON"
decimals = 9
collateral_factor = 8000
liquidation_threshold = 8500
liquidation_bonus = 10500
reserve_factor = 1000
base_borrow_rate = 0
borrow_rate_slope_low = 1000
borrow_rate_slope_high = 10000
target_utilization = 800000000000

[[assets]]
symbol = "USDT"
id = "0x01"
decimals = 6
collateral_factor = 8500
liquidation_threshold = 9000
liquidation_bonus = 10300
base_borrow_rate = 10
borrow_rate_slope_low = 500
borrow_rate_slope_high = 20000
target_utilization = 900000000000
"#;

    #[test]
    fn test_parse_pool_config() {
        let pool = PoolConfig::from_toml(POOL_TOML).unwrap();
        assert_eq!(pool.name, "main");
        assert_eq!(pool.version, 3);
        assert_eq!(pool.assets.len(), 2);

        let ton = AssetId::from_symbol("TON");
        assert_eq!(pool.asset(&ton).unwrap().decimals, 9);

        let usdt: AssetId = "0x01".parse().unwrap();
        assert_eq!(pool.require(&usdt).unwrap().liquidation_bonus, 10300);
        assert_eq!(pool.by_symbol("USDT").unwrap().id(), usdt);
    }

    #[test]
    fn test_unknown_asset() {
        let pool = PoolConfig::from_toml(POOL_TOML).unwrap();
        let other = AssetId::from_symbol("DOGE");
        assert_eq!(pool.require(&other), Err(RiskError::UnknownAsset(other)));
        assert!(!pool.contains(&other));
    }

    #[test]
    fn test_duplicate_asset_rejected() {
        let duplicate = r#"
[[assets]]
symbol = "TON"
decimals = 9
collateral_factor = 1
liquidation_threshold = 1
liquidation_bonus = 10000
base_borrow_rate = 0
borrow_rate_slope_low = 0
borrow_rate_slope_high = 0
target_utilization = 0
"#;
        let toml = format!("{}{}", POOL_TOML, duplicate);
        assert!(PoolConfig::from_toml(&toml).is_err());
    }
}
