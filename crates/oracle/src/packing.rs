//! On-chain price bundle layouts.
//!
//! Classic bundle:
//!
//! ```text
//! root   = { ref prices, ref proofs }
//! prices = { asset_id:256, price:64, maybe_ref next }
//! proofs = { oracle_id:32, signature:520, ref signed, maybe_ref next }
//! signed = { timestamp:32, ref dict }
//! ```
//!
//! `signed` is what a node signs (its representation hash). Its dictionary is
//! a balanced merkle tree over the node's prices, pruned down to the ids the
//! bundle actually uses; pruning keeps the signed hash intact.
//!
//! Pyth bundle:
//!
//! ```text
//! root = { min_publish_time:64, max_publish_time:64, ref prices, ref update }
//! ```
//!
//! where `update` is the opaque Hermes update in snake encoding.

use alloy::primitives::{Address, Bytes, PrimitiveSignature, B256, U256};
use lendwatch_api::OracleNode;
use lendwatch_core::{AssetId, PriceMap};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cell::{snake_from_bytes, Cell, CellBuilder, CellError};
use crate::classic::median;
use crate::OracleError;

pub const ASSET_ID_BITS: usize = 256;
pub const PRICE_BITS: usize = 64;
pub const TIMESTAMP_BITS: usize = 32;
pub const PUBLISH_TIME_BITS: usize = 64;
pub const ORACLE_ID_BITS: usize = 32;
pub const SIGNATURE_BITS: usize = 520;

const SIGNATURE_BYTES: usize = SIGNATURE_BITS / 8;

/// Balanced merkle dictionary over `id → price`.
///
/// Leaves are `{0, id:256, price:64}`, forks are `{1, ref left, ref right}`.
/// An empty map is the empty cell.
pub fn price_dict(prices: &BTreeMap<U256, U256>) -> Result<Arc<Cell>, CellError> {
    let entries: Vec<(U256, U256)> = prices.iter().map(|(k, v)| (*k, *v)).collect();
    if entries.is_empty() {
        return Ok(Arc::new(Cell::empty()));
    }
    dict_node(&entries)
}

fn dict_node(entries: &[(U256, U256)]) -> Result<Arc<Cell>, CellError> {
    let mut builder = CellBuilder::new();
    if let [(id, price)] = entries {
        builder
            .store_bit(false)?
            .store_u256(*id, ASSET_ID_BITS)?
            .store_u256(*price, PRICE_BITS)?;
    } else {
        let (left, right) = entries.split_at(entries.len() / 2);
        builder
            .store_bit(true)?
            .store_ref(dict_node(left)?)?
            .store_ref(dict_node(right)?)?;
    }
    Ok(Arc::new(builder.build()))
}

/// Entries revealed by a (possibly pruned) dictionary.
pub fn dict_entries(dict: &Cell) -> Result<BTreeMap<U256, U256>, CellError> {
    let mut out = BTreeMap::new();
    if dict.bit_len() == 0 && dict.refs().is_empty() {
        return Ok(out);
    }
    collect_entries(dict, &mut out)?;
    Ok(out)
}

fn collect_entries(cell: &Cell, out: &mut BTreeMap<U256, U256>) -> Result<(), CellError> {
    if cell.is_pruned() {
        return Ok(());
    }
    let mut slice = cell.parse()?;
    if slice.load_bit()? {
        collect_entries(slice.load_ref()?, out)?;
        collect_entries(slice.load_ref()?, out)?;
    } else {
        let id = slice.load_u256(ASSET_ID_BITS)?;
        let price = slice.load_u256(PRICE_BITS)?;
        out.insert(id, price);
    }
    Ok(())
}

/// Replace every branch holding none of `keep` with a pruned cell.
pub fn prune_dict(dict: &Arc<Cell>, keep: &BTreeSet<U256>) -> Result<Arc<Cell>, CellError> {
    let (pruned, kept) = prune_node(dict, keep)?;
    if kept {
        Ok(pruned)
    } else {
        Ok(Arc::new(Cell::pruned(dict.hash())))
    }
}

fn prune_node(cell: &Arc<Cell>, keep: &BTreeSet<U256>) -> Result<(Arc<Cell>, bool), CellError> {
    if cell.is_pruned() || cell.bit_len() == 0 {
        return Ok((cell.clone(), false));
    }
    let mut slice = cell.parse()?;
    if !slice.load_bit()? {
        let id = slice.load_u256(ASSET_ID_BITS)?;
        return Ok((cell.clone(), keep.contains(&id)));
    }

    let (left, left_kept) = prune_node(slice.load_ref()?, keep)?;
    let (right, right_kept) = prune_node(slice.load_ref()?, keep)?;
    if !left_kept && !right_kept {
        return Ok((cell.clone(), false));
    }

    let branch = |node: Arc<Cell>, kept: bool| {
        if kept {
            node
        } else {
            Arc::new(Cell::pruned(node.hash()))
        }
    };
    let mut builder = CellBuilder::new();
    builder
        .store_bit(true)?
        .store_ref(branch(left, left_kept))?
        .store_ref(branch(right, right_kept))?;
    Ok((Arc::new(builder.build()), true))
}

/// The cell a node signs: `{timestamp:32, ref dict}`.
pub fn signed_price_cell(timestamp: u64, dict: Arc<Cell>) -> Result<Cell, CellError> {
    let mut builder = CellBuilder::new();
    builder
        .store_uint(timestamp, TIMESTAMP_BITS)?
        .store_ref(dict)?;
    Ok(builder.build())
}

/// Hash a node signs for a payload of `(timestamp, prices)`.
pub fn signing_hash(timestamp: u64, prices: &BTreeMap<U256, U256>) -> Result<B256, CellError> {
    Ok(signed_price_cell(timestamp, price_dict(prices)?)?.hash())
}

/// Address that produced a 65-byte `signature` over `hash`.
pub fn recover_signer(signature: &[u8], hash: &B256) -> Option<Address> {
    let signature = PrimitiveSignature::try_from(signature).ok()?;
    signature.recover_address_from_prehash(hash).ok()
}

/// Right-folded `{asset_id:256, price:64, maybe_ref next}` chain.
pub fn prices_chain(prices: &PriceMap) -> Result<Arc<Cell>, CellError> {
    let mut next: Option<Arc<Cell>> = None;
    for (asset, price) in prices.iter().rev() {
        let mut builder = CellBuilder::new();
        builder
            .store_u256(asset.0, ASSET_ID_BITS)?
            .store_u256(*price, PRICE_BITS)?
            .store_maybe_ref(next.take())?;
        next = Some(Arc::new(builder.build()));
    }
    Ok(next.unwrap_or_else(|| Arc::new(Cell::empty())))
}

/// Read a prices chain back into a map.
pub fn read_prices_chain(chain: &Cell) -> Result<PriceMap, CellError> {
    let mut prices = PriceMap::new();
    if chain.bit_len() == 0 && chain.refs().is_empty() {
        return Ok(prices);
    }
    let mut current = chain;
    loop {
        let mut slice = current.parse()?;
        let asset = AssetId(slice.load_u256(ASSET_ID_BITS)?);
        let price = slice.load_u256(PRICE_BITS)?;
        prices.insert(asset, price);
        match slice.load_maybe_ref()? {
            Some(next) => current = next.as_ref(),
            None => return Ok(prices),
        }
    }
}

/// One node's contribution to a classic bundle.
#[derive(Debug, Clone)]
pub struct OracleProof {
    pub oracle_id: u32,
    pub signature: Bytes,
    /// Signed cell with the dictionary pruned to the used ids
    pub signed_cell: Arc<Cell>,
}

impl OracleProof {
    /// Build a proof revealing only `used` out of the node's full price set.
    pub fn new(
        oracle_id: u32,
        signature: Bytes,
        timestamp: u64,
        prices: &BTreeMap<U256, U256>,
        used: &BTreeSet<U256>,
    ) -> Result<Self, CellError> {
        let dict = prune_dict(&price_dict(prices)?, used)?;
        Ok(Self {
            oracle_id,
            signature,
            signed_cell: Arc::new(signed_price_cell(timestamp, dict)?),
        })
    }
}

/// Right-folded `{oracle_id:32, signature:520, ref signed, maybe_ref next}` chain.
pub fn proofs_chain(proofs: &[OracleProof]) -> Result<Arc<Cell>, CellError> {
    let mut next: Option<Arc<Cell>> = None;
    for proof in proofs.iter().rev() {
        if proof.signature.len() != SIGNATURE_BYTES {
            return Err(CellError::ValueTooWide(SIGNATURE_BITS));
        }
        let mut builder = CellBuilder::new();
        builder
            .store_uint(u64::from(proof.oracle_id), ORACLE_ID_BITS)?
            .store_bytes(&proof.signature)?
            .store_ref(proof.signed_cell.clone())?
            .store_maybe_ref(next.take())?;
        next = Some(Arc::new(builder.build()));
    }
    Ok(next.unwrap_or_else(|| Arc::new(Cell::empty())))
}

pub fn classic_bundle(prices: &PriceMap, proofs: &[OracleProof]) -> Result<Cell, CellError> {
    let mut builder = CellBuilder::new();
    builder
        .store_ref(prices_chain(prices)?)?
        .store_ref(proofs_chain(proofs)?)?;
    Ok(builder.build())
}

pub fn pyth_bundle(
    prices: &PriceMap,
    min_publish_time: u64,
    max_publish_time: u64,
    update: &[u8],
) -> Result<Cell, CellError> {
    let mut builder = CellBuilder::new();
    builder
        .store_uint(min_publish_time, PUBLISH_TIME_BITS)?
        .store_uint(max_publish_time, PUBLISH_TIME_BITS)?
        .store_ref(prices_chain(prices)?)?
        .store_ref(Arc::new(snake_from_bytes(update)?))?;
    Ok(builder.build())
}

/// A classic bundle that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBundle {
    pub prices: PriceMap,
    /// `(oracle_id, timestamp)` of every signer, in bundle order
    pub signers: Vec<(u32, u64)>,
}

/// Check a classic bundle the way the pool contract does.
///
/// Every proof must be signed by its configured node, oracle ids must be
/// distinct, at least `min_oracles` must sign, and every packed price must be
/// the median of the prices the proofs reveal for `asset + id_offset`.
/// Proofs that do not carry an asset do not take part in its median.
pub fn verify_classic_bundle(
    bundle: &Cell,
    nodes: &[OracleNode],
    min_oracles: usize,
    id_offset: U256,
) -> Result<VerifiedBundle, OracleError> {
    let invalid = |msg: String| OracleError::InvalidBundle(msg);

    let mut root = bundle.parse()?;
    let prices = read_prices_chain(root.load_ref()?)?;
    let proofs_root = root.load_ref()?;

    let mut signers = Vec::new();
    let mut revealed: Vec<BTreeMap<U256, U256>> = Vec::new();
    let mut seen = BTreeSet::new();

    let mut next = (proofs_root.bit_len() > 0).then_some(proofs_root.as_ref());
    while let Some(cell) = next {
        let mut slice = cell.parse()?;
        let oracle_id = slice.load_uint(ORACLE_ID_BITS)? as u32;
        let signature = slice.load_bytes(SIGNATURE_BYTES)?;
        let signed = slice.load_ref()?;
        next = slice.load_maybe_ref()?.map(|c| c.as_ref());

        if !seen.insert(oracle_id) {
            return Err(invalid(format!("oracle {} signs twice", oracle_id)));
        }
        let node = nodes
            .iter()
            .find(|n| n.id == oracle_id)
            .ok_or_else(|| invalid(format!("unknown oracle {}", oracle_id)))?;
        if recover_signer(&signature, &signed.hash()) != Some(node.address) {
            return Err(OracleError::InvalidSignature { oracle_id });
        }

        let mut signed_slice = signed.parse()?;
        let timestamp = signed_slice.load_uint(TIMESTAMP_BITS)?;
        revealed.push(dict_entries(signed_slice.load_ref()?)?);
        signers.push((oracle_id, timestamp));
    }

    if signers.len() < min_oracles {
        return Err(OracleError::InsufficientOracles {
            available: signers.len(),
            required: min_oracles,
        });
    }

    for (asset, price) in &prices {
        let id = asset.offset(id_offset);
        let mut values: Vec<U256> = revealed.iter().filter_map(|e| e.get(&id).copied()).collect();
        if values.is_empty() {
            return Err(invalid(format!("no proof reveals {}", asset)));
        }
        if median(&mut values) != Some(*price) {
            return Err(invalid(format!("price of {} is not the signed median", asset)));
        }
    }

    Ok(VerifiedBundle { prices, signers })
}
