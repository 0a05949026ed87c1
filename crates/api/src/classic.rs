//! Classic oracle node client.
//!
//! Each node publishes its latest signed price payload at
//! `{endpoint}/prices/{node_address}`:
//!
//! ```json
//! { "payload": "0x…", "signature": "0x…" }
//! ```
//!
//! Payload layout (big-endian):
//!
//! | field     | size         |
//! |-----------|--------------|
//! | timestamp | 4            |
//! | count     | 2            |
//! | entries   | count × 40   |
//!
//! where each entry is a 32-byte identifier followed by a `u64` price.
//!
//! The signature covers the hash of the signed price cell built from the
//! decoded payload, so a record is only as good as the payload it carries.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

use crate::{PriceSource, SignedPriceRecord, SourceError};

const HEADER_LEN: usize = 6;
const ENTRY_LEN: usize = 40;
const SIGNATURE_LEN: usize = 65;

/// A price-signing oracle node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleNode {
    /// Identifier committed to in the on-chain proof
    pub id: u32,
    /// Address the node signs with
    pub address: Address,
}

#[derive(Debug, Deserialize)]
struct NodeResponse {
    payload: String,
    signature: String,
}

/// Decode a node payload into `(timestamp, prices)`.
pub fn decode_payload(payload: &[u8]) -> Result<(u64, BTreeMap<U256, U256>), SourceError> {
    if payload.len() < HEADER_LEN {
        return Err(SourceError::decode(format!(
            "payload too short: {} bytes",
            payload.len()
        )));
    }
    let timestamp = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let count = u16::from_be_bytes([payload[4], payload[5]]) as usize;

    let body = &payload[HEADER_LEN..];
    if body.len() != count * ENTRY_LEN {
        return Err(SourceError::decode(format!(
            "payload declares {} entries but carries {} bytes",
            count,
            body.len()
        )));
    }

    let mut prices = BTreeMap::new();
    for entry in body.chunks_exact(ENTRY_LEN) {
        let id = U256::from_be_slice(&entry[..32]);
        let mut price = [0u8; 8];
        price.copy_from_slice(&entry[32..]);
        if prices.insert(id, U256::from(u64::from_be_bytes(price))).is_some() {
            return Err(SourceError::decode(format!("duplicate id {:#x} in payload", id)));
        }
    }
    Ok((u64::from(timestamp), prices))
}

/// Encode `(timestamp, prices)` in the node payload layout.
pub fn encode_payload(timestamp: u32, prices: &BTreeMap<U256, u64>) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + prices.len() * ENTRY_LEN);
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&(prices.len() as u16).to_be_bytes());
    for (id, price) in prices {
        out.extend_from_slice(&id.to_be_bytes::<32>());
        out.extend_from_slice(&price.to_be_bytes());
    }
    out
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, SourceError> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| SourceError::decode(format!("invalid {} hex: {}", field, e)))
}

/// Client for a set of classic oracle nodes.
#[derive(Clone)]
pub struct ClassicDriver {
    client: reqwest::Client,
    nodes: Vec<OracleNode>,
}

impl std::fmt::Debug for ClassicDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassicDriver")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl ClassicDriver {
    pub fn new(nodes: Vec<OracleNode>) -> Self {
        Self {
            client: reqwest::Client::new(),
            nodes,
        }
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn nodes(&self) -> &[OracleNode] {
        &self.nodes
    }

    /// Fetch and decode one node's latest payload.
    async fn fetch_node(
        &self,
        endpoint: &str,
        node: &OracleNode,
    ) -> Result<SignedPriceRecord, SourceError> {
        let url = format!("{}/prices/{}", endpoint.trim_end_matches('/'), node.address);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url,
                status: status.as_u16(),
            });
        }
        let body: NodeResponse = response.json().await?;

        let payload = decode_hex("payload", &body.payload)?;
        let signature = decode_hex("signature", &body.signature)?;
        if signature.len() != SIGNATURE_LEN {
            return Err(SourceError::decode(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                signature.len()
            )));
        }
        let (timestamp, prices) = decode_payload(&payload)?;

        Ok(SignedPriceRecord {
            oracle_id: node.id,
            prices,
            proof: Bytes::from(signature),
            public_key: Some(node.address),
            timestamp,
            payload: Bytes::from(payload),
        })
    }
}

#[async_trait]
impl PriceSource for ClassicDriver {
    fn name(&self) -> &'static str {
        "classic"
    }

    /// Query every node concurrently. Nodes that fail are dropped.
    #[instrument(skip(self, _ids), fields(nodes = self.nodes.len()))]
    async fn fetch(
        &self,
        endpoint: &str,
        _ids: &[U256],
    ) -> Result<Vec<SignedPriceRecord>, SourceError> {
        if self.nodes.is_empty() {
            return Err(SourceError::NoEndpoints);
        }

        let results = join_all(self.nodes.iter().map(|node| self.fetch_node(endpoint, node))).await;

        let mut records = Vec::with_capacity(results.len());
        for (node, result) in self.nodes.iter().zip(results) {
            match result {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    oracle_id = node.id,
                    node = %node.address,
                    error = %e,
                    "Dropping oracle node response"
                ),
            }
        }

        debug!(
            received = records.len(),
            requested = self.nodes.len(),
            "Fetched oracle node payloads"
        );
        Ok(records)
    }
}
