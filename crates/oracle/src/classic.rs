//! Classic collector: median over a quorum of independently signed records.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures::future::join_all;
use lendwatch_api::{decode_payload, with_retry, ClassicDriver, PriceSource, SignedPriceRecord};
use lendwatch_core::{unix_now, AssetId, PoolConfig, PriceMap};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::collector::{check_window, ensure_listed, Collector, PriceSet, Provenance};
use crate::config::ClassicConfig;
use crate::packing::{classic_bundle, recover_signer, signing_hash, OracleProof};
use crate::OracleError;

/// Median of `values`; the floor of the mean of the two middle values when
/// the count is even.
pub fn median(values: &mut [U256]) -> Option<U256> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let (lo, hi) = (values[mid - 1], values[mid]);
        Some(lo + (hi - lo) / U256::from(2u64))
    }
}

/// Address that signed `record`.
///
/// The signature is checked over the record's raw payload, which must decode
/// to exactly the timestamp and prices the record reports.
fn payload_signer(record: &SignedPriceRecord) -> Option<Address> {
    let (timestamp, prices) = decode_payload(&record.payload).ok()?;
    if timestamp != record.timestamp || prices != record.prices {
        return None;
    }
    let hash = signing_hash(timestamp, &prices).ok()?;
    recover_signer(&record.proof, &hash)
}

/// Collects signed records from the configured nodes and aggregates them.
///
/// Records are fetched for every asset of the pool and cached; a later call
/// reuses the cache while it still holds a fresh quorum.
#[derive(Debug)]
pub struct ClassicCollector<S = ClassicDriver> {
    pool: PoolConfig,
    config: ClassicConfig,
    source: S,
    cache: Mutex<Vec<SignedPriceRecord>>,
}

impl ClassicCollector<ClassicDriver> {
    /// Collector over the live HTTP driver for the configured nodes.
    pub fn from_config(pool: PoolConfig, config: ClassicConfig) -> Result<Self, OracleError> {
        let driver = ClassicDriver::new(config.nodes.clone());
        Self::new(pool, config, driver)
    }
}

impl<S: PriceSource> ClassicCollector<S> {
    pub fn new(pool: PoolConfig, config: ClassicConfig, source: S) -> Result<Self, OracleError> {
        config.validate()?;
        Ok(Self {
            pool,
            config,
            source,
            cache: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ClassicConfig {
        &self.config
    }

    fn is_fresh(&self, record: &SignedPriceRecord, now: u64) -> bool {
        record.is_fresh(now, self.config.ttl_secs, self.config.max_clock_skew_secs)
    }

    /// Keep records from configured nodes that are fresh and correctly
    /// signed, one per node (the latest).
    fn usable_records(
        &self,
        records: Vec<SignedPriceRecord>,
        now: u64,
    ) -> Vec<SignedPriceRecord> {
        let mut by_node: BTreeMap<u32, SignedPriceRecord> = BTreeMap::new();

        for record in records {
            let Some(node) = self.config.nodes.iter().find(|n| n.id == record.oracle_id) else {
                warn!(oracle_id = record.oracle_id, "Dropping record from unknown oracle");
                continue;
            };
            if !self.is_fresh(&record, now) {
                debug!(
                    oracle_id = record.oracle_id,
                    timestamp = record.timestamp,
                    "Dropping stale or future-dated record"
                );
                continue;
            }
            if payload_signer(&record) != Some(node.address) {
                warn!(oracle_id = record.oracle_id, "Dropping record with invalid signature");
                continue;
            }

            match by_node.get(&record.oracle_id) {
                Some(existing) if existing.timestamp >= record.timestamp => {}
                _ => {
                    by_node.insert(record.oracle_id, record);
                }
            }
        }

        by_node.into_values().collect()
    }

    /// Fetch from the endpoint groups in order until one yields a quorum.
    async fn collect(&self) -> Result<Vec<SignedPriceRecord>, OracleError> {
        let ids: Vec<U256> = self
            .pool
            .asset_ids()
            .map(|asset| self.config.lookup_id(&asset))
            .collect();
        let ids = ids.as_slice();
        let mut best = 0;

        for (group, endpoints) in self.config.endpoint_groups.iter().enumerate() {
            let fetches = endpoints.iter().map(|endpoint| {
                with_retry(&self.config.fetch, move || self.source.fetch(endpoint, ids))
            });
            let results = join_all(fetches).await;

            let mut records = Vec::new();
            for (endpoint, result) in endpoints.iter().zip(results) {
                match result {
                    Ok(fetched) => records.extend(fetched),
                    Err(e) => warn!(endpoint = %endpoint, error = %e, "Endpoint failed"),
                }
            }

            let usable = self.usable_records(records, unix_now());
            if usable.len() >= self.config.min_oracles {
                debug!(group = group, records = usable.len(), "Endpoint group reached quorum");
                return Ok(usable);
            }
            warn!(
                group = group,
                records = usable.len(),
                required = self.config.min_oracles,
                "Endpoint group below quorum"
            );
            best = best.max(usable.len());
        }

        Err(OracleError::InsufficientOracles {
            available: best,
            required: self.config.min_oracles,
        })
    }

    /// Cached records if they still form a fresh quorum, otherwise a new fetch.
    async fn records(&self) -> Result<Vec<SignedPriceRecord>, OracleError> {
        let mut cache = self.cache.lock().await;
        let now = unix_now();
        let fresh: Vec<SignedPriceRecord> = cache
            .iter()
            .filter(|r| self.is_fresh(r, now))
            .cloned()
            .collect();
        if fresh.len() >= self.config.min_oracles {
            debug!(records = fresh.len(), "Reusing cached price records");
            return Ok(fresh);
        }

        let fetched = self.collect().await?;
        *cache = fetched.clone();
        Ok(fetched)
    }

    /// The `min_oracles` most recent records, ordered by oracle id.
    fn select(&self, mut records: Vec<SignedPriceRecord>) -> Vec<SignedPriceRecord> {
        records.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(a.oracle_id.cmp(&b.oracle_id))
        });
        records.truncate(self.config.min_oracles);
        records.sort_by_key(|r| r.oracle_id);
        records
    }

    fn aggregate(
        &self,
        assets: &[AssetId],
        records: &[SignedPriceRecord],
    ) -> Result<PriceSet, OracleError> {
        let (min_publish_time, max_publish_time) = check_window(records, self.config.ttl_secs)?;

        let mut prices = PriceMap::new();
        let mut used = BTreeSet::new();
        for asset in assets {
            let id = self.config.lookup_id(asset);
            let mut values: Vec<U256> = records.iter().filter_map(|r| r.price(&id)).collect();
            match median(&mut values) {
                Some(price) => {
                    prices.insert(*asset, price);
                    used.insert(id);
                }
                None => warn!(asset = %asset, "No oracle reports a price"),
            }
        }

        let proofs = records
            .iter()
            .map(|r| {
                OracleProof::new(r.oracle_id, r.proof.clone(), r.timestamp, &r.prices, &used)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let bundle = classic_bundle(&prices, &proofs)?;

        Ok(PriceSet {
            prices,
            min_publish_time,
            max_publish_time,
            provenance: Provenance::Oracles(
                records.iter().map(|r| (r.oracle_id, r.timestamp)).collect(),
            ),
            bundle: Arc::new(bundle),
        })
    }
}

#[async_trait]
impl<S: PriceSource> Collector for ClassicCollector<S> {
    fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    #[instrument(skip(self), fields(pool = %self.pool.name, source = self.source.name()))]
    async fn get_prices(&self, assets: &[AssetId]) -> Result<PriceSet, OracleError> {
        for asset in assets {
            ensure_listed(&self.pool, asset)?;
        }

        let records = self.select(self.records().await?);
        let set = self.aggregate(assets, &records)?;
        info!(
            assets = set.prices.len(),
            oracles = records.len(),
            min_publish_time = set.min_publish_time,
            max_publish_time = set.max_publish_time,
            "Collected classic prices"
        );
        Ok(set)
    }
}
