//! Pyth Hermes client.
//!
//! Fetches the latest update for a batch of feeds from
//! `{endpoint}/v2/updates/price/latest`. The binary update is passed through
//! untouched as the record proof; the parsed prices are rescaled to the pool's
//! 10^9 price scale.

use alloy::primitives::{Bytes, B256, U256};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::{PriceSource, SignedPriceRecord, SourceError};

/// Decimals of the pool price scale.
pub const PRICE_DECIMALS: u32 = 9;

#[derive(Debug, Deserialize)]
struct HermesResponse {
    binary: HermesBinary,
    #[serde(default)]
    parsed: Vec<HermesParsedUpdate>,
}

#[derive(Debug, Deserialize)]
struct HermesBinary {
    encoding: String,
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HermesParsedUpdate {
    id: String,
    price: HermesPrice,
}

#[derive(Debug, Deserialize)]
struct HermesPrice {
    price: String,
    expo: i32,
    publish_time: i64,
}

/// Rescale a Pyth `(price, expo)` pair to the pool price scale:
/// `price * 10^9 / 10^(-expo)`.
pub fn scale_price(price: i64, expo: i32) -> Result<U256, SourceError> {
    if price < 0 {
        return Err(SourceError::decode(format!("negative feed price {}", price)));
    }
    let ten = U256::from(10u64);
    let scaled = U256::from(price as u64) * ten.pow(U256::from(PRICE_DECIMALS));
    if expo <= 0 {
        Ok(scaled / ten.pow(U256::from(expo.unsigned_abs())))
    } else {
        Ok(scaled * ten.pow(U256::from(expo as u32)))
    }
}

fn parse_feed_id(id: &str) -> Result<U256, SourceError> {
    U256::from_str_radix(id.trim_start_matches("0x"), 16)
        .map_err(|e| SourceError::decode(format!("invalid feed id '{}': {}", id, e)))
}

fn parse_response(response: HermesResponse) -> Result<Vec<SignedPriceRecord>, SourceError> {
    if response.binary.encoding != "hex" {
        return Err(SourceError::decode(format!(
            "unexpected update encoding '{}'",
            response.binary.encoding
        )));
    }

    let mut update = Vec::new();
    for chunk in &response.binary.data {
        let bytes = hex::decode(chunk.trim_start_matches("0x"))
            .map_err(|e| SourceError::decode(format!("invalid update hex: {}", e)))?;
        update.extend_from_slice(&bytes);
    }
    let proof = Bytes::from(update);

    response
        .parsed
        .into_iter()
        .map(|feed| {
            let id = parse_feed_id(&feed.id)?;
            let raw: i64 = feed
                .price
                .price
                .parse()
                .map_err(|e| {
                    SourceError::decode(format!("invalid price for feed {}: {}", feed.id, e))
                })?;
            let price = scale_price(raw, feed.price.expo)?;
            let timestamp = u64::try_from(feed.price.publish_time).map_err(|_| {
                SourceError::decode(format!("negative publish time for feed {}", feed.id))
            })?;

            Ok(SignedPriceRecord {
                oracle_id: 0,
                prices: BTreeMap::from([(id, price)]),
                proof: proof.clone(),
                public_key: None,
                timestamp,
                payload: Bytes::new(),
            })
        })
        .collect()
}

/// Hermes HTTP client.
#[derive(Debug, Clone, Default)]
pub struct PythDriver {
    client: reqwest::Client,
}

impl PythDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PriceSource for PythDriver {
    fn name(&self) -> &'static str {
        "pyth"
    }

    /// One record per requested feed, all sharing the batch update as proof.
    #[instrument(skip(self, ids), fields(feeds = ids.len()))]
    async fn fetch(
        &self,
        endpoint: &str,
        ids: &[U256],
    ) -> Result<Vec<SignedPriceRecord>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v2/updates/price/latest", endpoint.trim_end_matches('/'));
        let mut query: Vec<(&str, String)> = ids
            .iter()
            .map(|id| ("ids[]", hex::encode(B256::from(*id))))
            .collect();
        query.push(("encoding", "hex".to_string()));
        query.push(("parsed", "true".to_string()));

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: HermesResponse = response.json().await?;
        let records = parse_response(body)?;

        debug!(records = records.len(), "Fetched Hermes price update");
        Ok(records)
    }
}
