//! Collector configuration (TOML-loadable).

use alloy::primitives::U256;
use lendwatch_api::{FetchConfig, OracleNode, DEFAULT_MAX_CLOCK_SKEW_SECS};
use lendwatch_core::{AssetId, PoolConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use crate::classic::ClassicCollector;
use crate::collector::{Collector, DEFAULT_TTL_SECS};
use crate::pyth::PythCollector;
use crate::OracleError;

fn default_min_oracles() -> usize {
    3
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL_SECS
}

fn default_max_clock_skew_secs() -> u64 {
    DEFAULT_MAX_CLOCK_SKEW_SECS
}

/// Which price a classic collector reads for an asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceKind {
    #[default]
    Spot,
    /// Read at `asset_id + twap_offset`
    Twap,
}

/// Classic (signed quorum) collector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicConfig {
    /// Minimum number of distinct signing nodes
    #[serde(default = "default_min_oracles")]
    pub min_oracles: usize,

    /// Signing nodes
    pub nodes: Vec<OracleNode>,

    /// Endpoint groups, tried in order; endpoints within a group are merged
    pub endpoint_groups: Vec<Vec<String>>,

    #[serde(default)]
    pub price_kind: PriceKind,

    /// Identifier offset of TWAP prices
    #[serde(default)]
    pub twap_offset: U256,

    /// Maximum record age, and maximum spread of a selected record set
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How far ahead of the local clock a record may be timestamped
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,

    #[serde(default)]
    pub fetch: FetchConfig,
}

impl ClassicConfig {
    pub fn new(
        min_oracles: usize,
        nodes: Vec<OracleNode>,
        endpoint_groups: Vec<Vec<String>>,
    ) -> Self {
        Self {
            min_oracles,
            nodes,
            endpoint_groups,
            price_kind: PriceKind::default(),
            twap_offset: U256::ZERO,
            ttl_secs: default_ttl_secs(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
            fetch: FetchConfig::default(),
        }
    }

    pub fn with_price_kind(mut self, price_kind: PriceKind) -> Self {
        self.price_kind = price_kind;
        self
    }

    pub fn with_twap_offset(mut self, twap_offset: U256) -> Self {
        self.twap_offset = twap_offset;
        self
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_max_clock_skew_secs(mut self, max_clock_skew_secs: u64) -> Self {
        self.max_clock_skew_secs = max_clock_skew_secs;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// Upstream identifier of `asset` for the configured price kind.
    pub fn lookup_id(&self, asset: &AssetId) -> U256 {
        match self.price_kind {
            PriceKind::Spot => asset.0,
            PriceKind::Twap => asset.offset(self.twap_offset),
        }
    }

    /// Offset the bundle's ids are read at.
    pub fn id_offset(&self) -> U256 {
        match self.price_kind {
            PriceKind::Spot => U256::ZERO,
            PriceKind::Twap => self.twap_offset,
        }
    }

    pub fn validate(&self) -> Result<(), OracleError> {
        if self.min_oracles == 0 {
            return Err(OracleError::Config("min_oracles must be at least 1".to_string()));
        }
        if self.nodes.len() < self.min_oracles {
            return Err(OracleError::Config(format!(
                "{} nodes configured, quorum needs {}",
                self.nodes.len(),
                self.min_oracles
            )));
        }
        let ids: BTreeSet<u32> = self.nodes.iter().map(|n| n.id).collect();
        if ids.len() != self.nodes.len() {
            return Err(OracleError::Config("duplicate oracle node id".to_string()));
        }
        if self.endpoint_groups.is_empty() || self.endpoint_groups.iter().any(Vec::is_empty) {
            return Err(OracleError::Config("every endpoint group needs an endpoint".to_string()));
        }
        Ok(())
    }
}

/// Native 1:1 feed of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub asset: AssetId,
    pub feed: U256,
}

/// Asset priced as `feed price * base asset price / price scale`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFeedConfig {
    pub asset: AssetId,
    /// Feed quoting the asset in units of `base_asset`
    pub feed: U256,
    pub base_asset: AssetId,
}

/// Asset that takes another asset's price unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    pub asset: AssetId,
    pub base: AssetId,
}

/// Pyth collector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythConfig {
    /// Hermes endpoints, raced on every fetch
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub feeds: Vec<FeedConfig>,

    #[serde(default)]
    pub derived: Vec<DerivedFeedConfig>,

    #[serde(default)]
    pub references: Vec<ReferenceConfig>,

    /// Maximum publish-time spread of one price set
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How far ahead of the local clock a publish time may be
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,

    #[serde(default)]
    pub fetch: FetchConfig,
}

impl PythConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            feeds: Vec::new(),
            derived: Vec::new(),
            references: Vec::new(),
            ttl_secs: default_ttl_secs(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
            fetch: FetchConfig::default(),
        }
    }

    pub fn with_feed(mut self, asset: AssetId, feed: U256) -> Self {
        self.feeds.push(FeedConfig { asset, feed });
        self
    }

    pub fn with_derived(mut self, asset: AssetId, feed: U256, base_asset: AssetId) -> Self {
        self.derived.push(DerivedFeedConfig {
            asset,
            feed,
            base_asset,
        });
        self
    }

    pub fn with_reference(mut self, asset: AssetId, base: AssetId) -> Self {
        self.references.push(ReferenceConfig { asset, base });
        self
    }

    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_max_clock_skew_secs(mut self, max_clock_skew_secs: u64) -> Self {
        self.max_clock_skew_secs = max_clock_skew_secs;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }
}

/// Collector selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CollectorConfig {
    Classic(ClassicConfig),
    Pyth(PythConfig),
}

/// A pool together with the collector that prices it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub pool: PoolConfig,
    pub collector: CollectorConfig,
}

impl DeploymentConfig {
    /// Load from TOML content.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse deployment config: {}", e))?;
        config.pool.validate()?;
        Ok(config)
    }

    /// Load from file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    /// Build the configured collector over the live HTTP drivers.
    pub fn build_collector(self) -> Result<Box<dyn Collector>, OracleError> {
        let collector: Box<dyn Collector> = match self.collector {
            CollectorConfig::Classic(config) => {
                Box::new(ClassicCollector::from_config(self.pool, config)?)
            }
            CollectorConfig::Pyth(config) => {
                Box::new(PythCollector::from_config(self.pool, config)?)
            }
        };
        info!(
            pool = %collector.pool().name,
            collector = ?collector,
            "Built price collector"
        );
        Ok(collector)
    }
}
