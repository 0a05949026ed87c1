//! Signed price records and the source capability.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::SourceError;

/// Default tolerance for records timestamped ahead of the local clock.
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 10;

/// One attestation returned by a price source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPriceRecord {
    /// Oracle node identifier (0 for aggregator feeds)
    pub oracle_id: u32,
    /// Price per upstream identifier, at 10^9 scale
    pub prices: BTreeMap<U256, U256>,
    /// Node signature, or the opaque aggregator update
    pub proof: Bytes,
    /// Address the signature must recover to, when the source signs
    pub public_key: Option<Address>,
    /// Unix seconds the prices were published at
    pub timestamp: u64,
    /// Raw payload as received
    pub payload: Bytes,
}

impl SignedPriceRecord {
    pub fn price(&self, id: &U256) -> Option<U256> {
        self.prices.get(id).copied()
    }

    /// Whether the record is no older than `ttl` seconds at `now` and no
    /// more than `max_skew` seconds ahead of it.
    pub fn is_fresh(&self, now: u64, ttl: u64, max_skew: u64) -> bool {
        self.timestamp <= now.saturating_add(max_skew) && now.saturating_sub(self.timestamp) <= ttl
    }
}

/// Capability shared by all price source drivers.
#[async_trait]
pub trait PriceSource: Send + Sync + Debug {
    /// Short driver name for logging.
    fn name(&self) -> &'static str;

    /// Fetch the latest records from one endpoint.
    ///
    /// `ids` lists the upstream identifiers of interest. Drivers whose
    /// records are signed as a whole may return more.
    async fn fetch(
        &self,
        endpoint: &str,
        ids: &[U256],
    ) -> Result<Vec<SignedPriceRecord>, SourceError>;
}
