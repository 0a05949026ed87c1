//! Pyth collector: prices from Hermes feeds, with derived and referenced assets.

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use lendwatch_api::{race, with_retry, PriceSource, PythDriver, SignedPriceRecord};
use lendwatch_core::math::mul_div;
use lendwatch_core::{unix_now, AssetId, PoolConfig, PriceMap};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::collector::{check_window, ensure_listed, Collector, PriceSet, Provenance};
use crate::config::PythConfig;
use crate::packing::pyth_bundle;
use crate::OracleError;

/// Asset quoted against another asset's feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Derivation {
    feed: U256,
    base_feed: U256,
}

/// Feed lookup tables resolved from a [`PythConfig`].
#[derive(Debug, Clone, Default)]
pub struct FeedTables {
    /// feed → asset priced 1:1 by it
    direct: BTreeMap<U256, AssetId>,
    asset_feed: BTreeMap<AssetId, U256>,
    /// feed → assets derived from it
    referred: BTreeMap<U256, BTreeSet<AssetId>>,
    derivations: BTreeMap<AssetId, Derivation>,
    /// asset → asset whose price it takes
    allowed_ref: BTreeMap<AssetId, AssetId>,
}

impl FeedTables {
    pub fn new(pool: &PoolConfig, config: &PythConfig) -> Result<Self, OracleError> {
        let invalid = |msg: String| OracleError::Config(msg);
        let listed = |asset: &AssetId| {
            if pool.contains(asset) {
                Ok(())
            } else {
                Err(invalid(format!("asset {} is not listed in pool {}", asset, pool.name)))
            }
        };

        let mut tables = Self::default();

        for entry in &config.feeds {
            listed(&entry.asset)?;
            if tables.direct.insert(entry.feed, entry.asset).is_some() {
                return Err(invalid(format!("feed {:#x} mapped twice", entry.feed)));
            }
            if tables.asset_feed.insert(entry.asset, entry.feed).is_some() {
                return Err(invalid(format!("asset {} has two feeds", entry.asset)));
            }
        }

        for entry in &config.derived {
            listed(&entry.asset)?;
            if tables.asset_feed.contains_key(&entry.asset) {
                return Err(invalid(format!("asset {} is both direct and derived", entry.asset)));
            }
            let base_feed = *tables.asset_feed.get(&entry.base_asset).ok_or_else(|| {
                invalid(format!(
                    "base asset {} of {} has no direct feed",
                    entry.base_asset, entry.asset
                ))
            })?;
            let derivation = Derivation {
                feed: entry.feed,
                base_feed,
            };
            if tables.derivations.insert(entry.asset, derivation).is_some() {
                return Err(invalid(format!("asset {} derived twice", entry.asset)));
            }
            tables.referred.entry(entry.feed).or_default().insert(entry.asset);
        }

        for entry in &config.references {
            listed(&entry.asset)?;
            if tables.is_priced(&entry.asset) {
                return Err(invalid(format!("asset {} has its own feed", entry.asset)));
            }
            if !tables.is_priced(&entry.base) {
                return Err(invalid(format!(
                    "reference base {} of {} has no feed",
                    entry.base, entry.asset
                )));
            }
            tables.allowed_ref.insert(entry.asset, entry.base);
        }

        Ok(tables)
    }

    fn is_priced(&self, asset: &AssetId) -> bool {
        self.asset_feed.contains_key(asset) || self.derivations.contains_key(asset)
    }

    fn resolve<'a>(&'a self, asset: &'a AssetId) -> &'a AssetId {
        self.allowed_ref.get(asset).unwrap_or(asset)
    }

    /// Feeds needed to price `assets`.
    ///
    /// Order and duplicates in `assets` do not matter. A derived asset needs
    /// its own feed and its base feed; assets with no feed are skipped.
    pub fn create_required_feeds_list(&self, assets: &[AssetId]) -> BTreeSet<U256> {
        let mut feeds = BTreeSet::new();
        for asset in assets {
            let target = self.resolve(asset);
            if let Some(feed) = self.asset_feed.get(target) {
                feeds.insert(*feed);
            } else if let Some(derivation) = self.derivations.get(target) {
                feeds.insert(derivation.feed);
                feeds.insert(derivation.base_feed);
            } else {
                warn!(asset = %asset, "No feed configured for asset");
            }
        }
        feeds
    }

    /// Price every asset in `assets` that `feed_prices` can price.
    fn price_assets(
        &self,
        assets: &BTreeSet<AssetId>,
        feed_prices: &BTreeMap<U256, U256>,
        price_scale: U256,
    ) -> PriceMap {
        let mut direct = PriceMap::new();
        for (feed, price) in feed_prices {
            if let Some(asset) = self.direct.get(feed) {
                direct.insert(*asset, *price);
            }
        }

        let mut derived = PriceMap::new();
        for (feed, price) in feed_prices {
            for asset in self.referred.get(feed).into_iter().flatten() {
                let Some(derivation) = self.derivations.get(asset) else {
                    continue;
                };
                if let Some(base) = feed_prices.get(&derivation.base_feed) {
                    derived.insert(*asset, mul_div(*price, *base, price_scale));
                }
            }
        }

        let mut prices = PriceMap::new();
        for asset in assets {
            let target = self.resolve(asset);
            if let Some(price) = direct.get(target).or_else(|| derived.get(target)) {
                prices.insert(*asset, *price);
            }
        }
        prices
    }
}

/// Collects Hermes updates for the feeds the requested assets need.
///
/// The last batch is cached and reused while it covers every required feed
/// with a fresh publish time.
#[derive(Debug)]
pub struct PythCollector<S = PythDriver> {
    pool: PoolConfig,
    config: PythConfig,
    tables: FeedTables,
    source: S,
    cache: Mutex<Vec<SignedPriceRecord>>,
}

impl PythCollector<PythDriver> {
    pub fn from_config(pool: PoolConfig, config: PythConfig) -> Result<Self, OracleError> {
        Self::new(pool, config, PythDriver::new())
    }
}

impl<S: PriceSource> PythCollector<S> {
    pub fn new(pool: PoolConfig, config: PythConfig, source: S) -> Result<Self, OracleError> {
        if config.endpoints.is_empty() {
            return Err(OracleError::Config("no Hermes endpoints configured".to_string()));
        }
        let tables = FeedTables::new(&pool, &config)?;
        Ok(Self {
            pool,
            config,
            tables,
            source,
            cache: Mutex::new(Vec::new()),
        })
    }

    pub fn tables(&self) -> &FeedTables {
        &self.tables
    }

    pub fn create_required_feeds_list(&self, assets: &[AssetId]) -> BTreeSet<U256> {
        self.tables.create_required_feeds_list(assets)
    }

    /// Records for `feeds`, from the cache when it covers them all.
    async fn records(
        &self,
        feeds: &BTreeSet<U256>,
    ) -> Result<Vec<SignedPriceRecord>, OracleError> {
        let mut cache = self.cache.lock().await;
        let now = unix_now();
        let (ttl, skew) = (self.config.ttl_secs, self.config.max_clock_skew_secs);
        let covered = feeds.iter().all(|feed| {
            cache
                .iter()
                .any(|r| r.prices.contains_key(feed) && r.is_fresh(now, ttl, skew))
        });
        if covered {
            debug!(feeds = feeds.len(), "Reusing cached feed update");
            return Ok(cache.clone());
        }

        let feed_list: Vec<U256> = feeds.iter().copied().collect();
        let feed_list = feed_list.as_slice();
        let fetched = with_retry(&self.config.fetch, || {
            race(&self.config.endpoints, |endpoint| self.source.fetch(endpoint, feed_list))
        })
        .await?;

        *cache = fetched.clone();
        Ok(fetched)
    }
}

#[async_trait]
impl<S: PriceSource> Collector for PythCollector<S> {
    fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    #[instrument(skip(self), fields(pool = %self.pool.name, source = self.source.name()))]
    async fn get_prices(&self, assets: &[AssetId]) -> Result<PriceSet, OracleError> {
        for asset in assets {
            ensure_listed(&self.pool, asset)?;
        }

        let feeds = self.create_required_feeds_list(assets);
        let records = self.records(&feeds).await?;

        let relevant: Vec<&SignedPriceRecord> = records
            .iter()
            .filter(|r| r.prices.keys().any(|feed| feeds.contains(feed)))
            .collect();
        let (min_publish_time, max_publish_time) =
            check_window(relevant.iter().copied(), self.config.ttl_secs)?;
        let now = unix_now();
        if max_publish_time > now.saturating_add(self.config.max_clock_skew_secs) {
            return Err(OracleError::FutureDated {
                publish_time: max_publish_time,
                now,
            });
        }

        let feed_prices: BTreeMap<U256, U256> = relevant
            .iter()
            .flat_map(|r| r.prices.iter())
            .filter(|(feed, _)| feeds.contains(*feed))
            .map(|(feed, price)| (*feed, *price))
            .collect();

        let requested: BTreeSet<AssetId> = assets.iter().copied().collect();
        let prices = self
            .tables
            .price_assets(&requested, &feed_prices, self.pool.constants.price());

        let missing: Vec<AssetId> = requested
            .iter()
            .filter(|asset| !prices.contains_key(*asset))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(OracleError::MissingPrices(missing));
        }

        let update: Bytes = relevant.first().map(|r| r.proof.clone()).unwrap_or_default();
        let bundle = pyth_bundle(&prices, min_publish_time, max_publish_time, &update)?;

        info!(
            assets = prices.len(),
            feeds = feeds.len(),
            min_publish_time = min_publish_time,
            max_publish_time = max_publish_time,
            "Collected Pyth prices"
        );

        Ok(PriceSet {
            prices,
            min_publish_time,
            max_publish_time,
            provenance: Provenance::Feeds(feeds.into_iter().collect()),
            bundle: Arc::new(bundle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packing::read_prices_chain;
    use crate::testing::{asset_config, pool, MockSource};
    use lendwatch_api::FetchConfig;
    use lendwatch_core::PoolAsset;
    use std::time::Duration;

    const EP1: &str = "https://hermes-a.example";
    const EP2: &str = "https://hermes-b.example";

    const PRICE_SCALE: u64 = 1_000_000_000;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    fn ton() -> AssetId {
        AssetId::from_symbol("TON")
    }

    fn usdt() -> AssetId {
        AssetId::from_symbol("USDT")
    }

    fn ts_ton() -> AssetId {
        AssetId::from_symbol("tsTON")
    }

    fn jusdt() -> AssetId {
        AssetId::from_symbol("jUSDT")
    }

    const TON_FEED: u64 = 0x11;
    const USDT_FEED: u64 = 0x22;
    const TS_TON_FEED: u64 = 0x33;

    /// TON, USDT, tsTON derived from TON, jUSDT referring to USDT.
    fn full_pool() -> PoolConfig {
        let mut pool = pool();
        pool.assets.push(PoolAsset::new("tsTON", asset_config(9)));
        pool.assets.push(PoolAsset::new("jUSDT", asset_config(6)));
        pool
    }

    fn config(endpoints: &[&str]) -> PythConfig {
        PythConfig::new(endpoints.iter().map(|e| e.to_string()).collect())
            .with_feed(ton(), u(TON_FEED))
            .with_feed(usdt(), u(USDT_FEED))
            .with_derived(ts_ton(), u(TS_TON_FEED), ton())
            .with_reference(jusdt(), usdt())
            .with_fetch(FetchConfig::default().with_retries(0).with_timeout_ms(200))
    }

    fn record(feed: u64, price: u64, timestamp: u64) -> SignedPriceRecord {
        SignedPriceRecord {
            oracle_id: 0,
            prices: BTreeMap::from([(u(feed), u(price))]),
            proof: Bytes::from_static(&[0x50, 0x4e, 0x41, 0x55]),
            public_key: None,
            timestamp,
            payload: Bytes::new(),
        }
    }

    fn batch(now: u64) -> Vec<SignedPriceRecord> {
        vec![
            record(TON_FEED, 3 * PRICE_SCALE, now),
            record(USDT_FEED, PRICE_SCALE, now - 1),
            // 1.05 TON per tsTON
            record(TS_TON_FEED, 1_050_000_000, now - 2),
        ]
    }

    fn collector(source: MockSource) -> PythCollector<MockSource> {
        PythCollector::new(full_pool(), config(&[EP1]), source).unwrap()
    }

    #[test]
    fn test_required_feeds_are_a_set() {
        let tables = FeedTables::new(&full_pool(), &config(&[EP1])).unwrap();

        let a = tables.create_required_feeds_list(&[ton(), ton(), usdt()]);
        let b = tables.create_required_feeds_list(&[usdt(), ton()]);
        assert_eq!(a, b);
        assert_eq!(a, BTreeSet::from([u(TON_FEED), u(USDT_FEED)]));

        let derived = tables.create_required_feeds_list(&[ts_ton()]);
        assert_eq!(derived, BTreeSet::from([u(TON_FEED), u(TS_TON_FEED)]));

        let referred = tables.create_required_feeds_list(&[jusdt()]);
        assert_eq!(referred, BTreeSet::from([u(USDT_FEED)]));

        assert!(tables.create_required_feeds_list(&[]).is_empty());
    }

    #[test]
    fn test_feed_table_validation() {
        let pool = full_pool();
        let base = || PythConfig::new(vec![EP1.to_string()]);

        let foreign = base().with_feed(AssetId::from_symbol("NOT"), u(1));
        assert!(matches!(FeedTables::new(&pool, &foreign), Err(OracleError::Config(_))));

        let duplicate = base().with_feed(ton(), u(1)).with_feed(usdt(), u(1));
        assert!(FeedTables::new(&pool, &duplicate).is_err());

        let orphan = base().with_derived(ts_ton(), u(3), ton());
        assert!(FeedTables::new(&pool, &orphan).is_err());

        let dangling = base().with_reference(jusdt(), usdt());
        assert!(FeedTables::new(&pool, &dangling).is_err());

        assert!(PythCollector::new(pool, PythConfig::new(vec![]), MockSource::new()).is_err());
    }

    #[tokio::test]
    async fn test_direct_derived_and_referenced_prices() {
        let now = unix_now();
        let collector = collector(MockSource::new().with_records(EP1, batch(now)));

        let set = collector
            .get_prices(&[ton(), usdt(), ts_ton(), jusdt()])
            .await
            .unwrap();
        assert_eq!(set.price(&ton()), Some(u(3 * PRICE_SCALE)));
        assert_eq!(set.price(&usdt()), Some(u(PRICE_SCALE)));
        assert_eq!(set.price(&ts_ton()), Some(u(3_150_000_000)));
        assert_eq!(set.price(&jusdt()), Some(u(PRICE_SCALE)));
        assert_eq!(set.min_publish_time, now - 2);
        assert_eq!(set.max_publish_time, now);
        assert_eq!(
            set.provenance,
            Provenance::Feeds(vec![u(TON_FEED), u(USDT_FEED), u(TS_TON_FEED)])
        );
    }

    #[tokio::test]
    async fn test_prices_limited_to_requested_assets() {
        let now = unix_now();
        let collector = collector(MockSource::new().with_records(EP1, batch(now)));

        // tsTON needs the TON feed, but TON itself was not asked for
        let set = collector.get_prices(&[ts_ton()]).await.unwrap();
        assert_eq!(set.prices.len(), 1);
        assert!(set.price(&ton()).is_none());

        let mut root = set.bundle.parse().unwrap();
        root.load_uint(64).unwrap();
        root.load_uint(64).unwrap();
        let packed = read_prices_chain(root.load_ref().unwrap()).unwrap();
        assert_eq!(packed, set.prices);
    }

    #[tokio::test]
    async fn test_window_wider_than_ttl_rejected() {
        let now = unix_now();
        let records = vec![
            record(TON_FEED, PRICE_SCALE, now),
            record(USDT_FEED, PRICE_SCALE, now - 100),
        ];
        let config = config(&[EP1]).with_ttl_secs(60);
        let source = MockSource::new().with_records(EP1, records);
        let collector = PythCollector::new(full_pool(), config, source).unwrap();

        assert!(matches!(
            collector.get_prices(&[ton(), usdt()]).await,
            Err(OracleError::WindowExceeded { spread: 100, ttl: 60 })
        ));
    }

    #[tokio::test]
    async fn test_missing_prices_reported() {
        let now = unix_now();
        let records = vec![
            record(USDT_FEED, PRICE_SCALE, now),
            record(TS_TON_FEED, 1_050_000_000, now),
        ];
        let collector = collector(MockSource::new().with_records(EP1, records));

        match collector.get_prices(&[usdt(), ts_ton(), ton()]).await {
            Err(OracleError::MissingPrices(missing)) => {
                let missing: BTreeSet<AssetId> = missing.into_iter().collect();
                assert_eq!(missing, BTreeSet::from([ton(), ts_ton()]));
            }
            other => panic!("expected missing prices, got {:?}", other.map(|s| s.prices)),
        }
    }

    #[tokio::test]
    async fn test_races_past_failing_endpoint() {
        let now = unix_now();
        let source = MockSource::new().with_failing(EP1).with_records(EP2, batch(now));
        let collector = PythCollector::new(full_pool(), config(&[EP1, EP2]), source).unwrap();

        let set = collector.get_prices(&[usdt()]).await.unwrap();
        assert_eq!(set.price(&usdt()), Some(u(PRICE_SCALE)));
    }

    #[tokio::test]
    async fn test_all_endpoints_failing() {
        let source = MockSource::new().with_failing(EP1).with_failing(EP2);
        let collector = PythCollector::new(full_pool(), config(&[EP1, EP2]), source).unwrap();

        assert!(matches!(
            collector.get_prices(&[usdt()]).await,
            Err(OracleError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_reused_for_covered_feeds() {
        let now = unix_now();
        let collector = collector(MockSource::new().with_records(EP1, batch(now)));

        collector.get_prices(&[ton(), usdt()]).await.unwrap();
        collector.get_prices(&[usdt()]).await.unwrap();
        assert_eq!(collector.source.calls(), 1);

        // tsTON needs a feed the cached batch does not carry
        collector.get_prices(&[ts_ton()]).await.unwrap();
        assert_eq!(collector.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_future_dated_update_rejected_and_not_cached() {
        let now = unix_now();
        let records = vec![
            record(TON_FEED, PRICE_SCALE, now + 3_600),
            record(USDT_FEED, PRICE_SCALE, now + 3_600),
        ];
        let collector = collector(MockSource::new().with_records(EP1, records));

        assert!(matches!(
            collector.get_prices(&[ton(), usdt()]).await,
            Err(OracleError::FutureDated { .. })
        ));
        collector.get_prices(&[ton(), usdt()]).await.unwrap_err();
        assert_eq!(collector.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_fetch() {
        let now = unix_now();
        let source = MockSource::new()
            .with_records(EP1, batch(now))
            .with_delay(Duration::from_millis(50));
        let collector = collector(source);

        let assets = [ton(), usdt()];
        let (first, second) =
            tokio::join!(collector.get_prices(&assets), collector.get_prices(&assets));
        first.unwrap();
        second.unwrap();
        assert_eq!(collector.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_foreign_asset_rejected() {
        let collector = collector(MockSource::new());
        assert!(matches!(
            collector.get_prices(&[AssetId::from_symbol("NOT")]).await,
            Err(OracleError::ForeignAsset { .. })
        ));
        assert_eq!(collector.source.calls(), 0);
    }
}
