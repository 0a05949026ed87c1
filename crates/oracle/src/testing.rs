//! Test fixtures: a two-asset pool and an in-memory price source.

use alloy::primitives::{Bytes, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use lendwatch_api::{encode_payload, OracleNode, PriceSource, SignedPriceRecord, SourceError};
use lendwatch_core::{AssetConfig, PoolAsset, PoolConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::packing::signing_hash;

pub(crate) fn asset_config(decimals: u8) -> AssetConfig {
    toml::from_str(&format!(
        r#"
        decimals = {}
        collateral_factor = 8000
        liquidation_threshold = 8500
        liquidation_bonus = 10500
        base_borrow_rate = 0
        borrow_rate_slope_low = 1000
        borrow_rate_slope_high = 10000
        target_utilization = 800000000000
        "#,
        decimals
    ))
    .unwrap()
}

/// Pool listing TON and USDT.
pub(crate) fn pool() -> PoolConfig {
    PoolConfig::new(
        "main",
        vec![
            PoolAsset::new("TON", asset_config(9)),
            PoolAsset::new("USDT", asset_config(6)),
        ],
    )
}

/// A classic oracle node with its signing key.
pub(crate) struct TestNode {
    pub id: u32,
    pub signer: PrivateKeySigner,
}

impl TestNode {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            signer: PrivateKeySigner::random(),
        }
    }

    pub fn node(&self) -> OracleNode {
        OracleNode {
            id: self.id,
            address: self.signer.address(),
        }
    }

    /// A record signed the way a live node signs it.
    pub fn record(&self, timestamp: u64, prices: &[(U256, u64)]) -> SignedPriceRecord {
        let raw: BTreeMap<U256, u64> = prices.iter().copied().collect();
        let payload = encode_payload(timestamp as u32, &raw);
        let prices: BTreeMap<U256, U256> =
            raw.iter().map(|(id, p)| (*id, U256::from(*p))).collect();
        let hash = signing_hash(timestamp, &prices).unwrap();
        let signature = self.signer.sign_hash_sync(&hash).unwrap();
        SignedPriceRecord {
            oracle_id: self.id,
            prices,
            proof: Bytes::from(signature.as_bytes().to_vec()),
            public_key: Some(self.signer.address()),
            timestamp,
            payload: Bytes::from(payload),
        }
    }
}

/// In-memory price source keyed by endpoint.
#[derive(Debug, Default)]
pub(crate) struct MockSource {
    responses: Mutex<BTreeMap<String, Vec<SignedPriceRecord>>>,
    failing: Mutex<BTreeSet<String>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(self, endpoint: &str, records: Vec<SignedPriceRecord>) -> Self {
        self.set_records(endpoint, records);
        self
    }

    pub fn set_records(&self, endpoint: &str, records: Vec<SignedPriceRecord>) {
        self.responses.lock().unwrap().insert(endpoint.to_string(), records);
    }

    pub fn with_failing(self, endpoint: &str) -> Self {
        self.failing.lock().unwrap().insert(endpoint.to_string());
        self
    }

    /// Answer every fetch after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    /// Returns every stored record carrying at least one of `ids`.
    async fn fetch(
        &self,
        endpoint: &str,
        ids: &[U256],
    ) -> Result<Vec<SignedPriceRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.lock().unwrap().contains(endpoint) {
            return Err(SourceError::decode(format!("{} is down", endpoint)));
        }
        let responses = self.responses.lock().unwrap();
        let records = responses.get(endpoint).cloned().unwrap_or_default();
        Ok(records
            .into_iter()
            .filter(|r| ids.is_empty() || r.prices.keys().any(|k| ids.contains(k)))
            .collect())
    }
}
