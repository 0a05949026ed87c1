//! Bit-level cell codec.
//!
//! A cell holds up to 1023 data bits and up to four references to child
//! cells. Cells are immutable once built and carry their representation hash:
//!
//! ```text
//! hash = keccak256(kind | refs | bit_len (u16 BE) | data | child hashes…)
//! ```
//!
//! A pruned cell stands in for a subtree that has been cut away. It stores
//! only the hash of the cell it replaces and reports that hash as its own, so
//! pruning a branch never changes the hash of any ancestor.

use alloy::primitives::{keccak256, B256, U256};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const MAX_BITS: usize = 1023;
pub const MAX_REFS: usize = 4;

/// Bytes that fit in one snake segment.
const SNAKE_SEGMENT_BYTES: usize = MAX_BITS / 8;

/// Nesting limit when decoding untrusted bytes.
const MAX_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("cell data exceeds 1023 bits")]
    BitOverflow,
    #[error("cell has more than 4 references")]
    RefOverflow,
    #[error("value does not fit in {0} bits")]
    ValueTooWide(usize),
    #[error("read past end of cell data")]
    Underflow,
    #[error("no more references to read")]
    NoMoreRefs,
    #[error("cannot read data of a pruned cell")]
    Pruned,
    #[error("malformed cell bytes: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Ordinary,
    Pruned,
}

impl CellKind {
    fn tag(self) -> u8 {
        match self {
            Self::Ordinary => 0,
            Self::Pruned => 1,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    kind: CellKind,
    data: Vec<u8>,
    bit_len: usize,
    refs: SmallVec<[Arc<Cell>; MAX_REFS]>,
    hash: B256,
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("kind", &self.kind)
            .field("bits", &self.bit_len)
            .field("refs", &self.refs.len())
            .field("hash", &self.hash)
            .finish()
    }
}

impl Cell {
    /// A cell with no data and no references.
    pub fn empty() -> Self {
        Self::ordinary(Vec::new(), 0, SmallVec::new())
    }

    fn ordinary(data: Vec<u8>, bit_len: usize, refs: SmallVec<[Arc<Cell>; MAX_REFS]>) -> Self {
        let mut preimage = Vec::with_capacity(4 + data.len() + refs.len() * 32);
        preimage.push(CellKind::Ordinary.tag());
        preimage.push(refs.len() as u8);
        preimage.extend_from_slice(&(bit_len as u16).to_be_bytes());
        preimage.extend_from_slice(&data);
        for r in &refs {
            preimage.extend_from_slice(r.hash.as_slice());
        }
        Self {
            kind: CellKind::Ordinary,
            hash: keccak256(&preimage),
            data,
            bit_len,
            refs,
        }
    }

    /// A placeholder for a cut-away cell with hash `hash`.
    pub fn pruned(hash: B256) -> Self {
        Self {
            kind: CellKind::Pruned,
            data: hash.to_vec(),
            bit_len: 256,
            refs: SmallVec::new(),
            hash,
        }
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn is_pruned(&self) -> bool {
        self.kind == CellKind::Pruned
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    /// Start reading this cell.
    pub fn parse(&self) -> Result<CellSlice<'_>, CellError> {
        if self.is_pruned() {
            return Err(CellError::Pruned);
        }
        Ok(CellSlice {
            cell: self,
            bit_pos: 0,
            ref_pos: 0,
        })
    }

    fn bit(&self, index: usize) -> bool {
        self.data[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Serialize the cell tree depth-first.
    ///
    /// Per cell: `kind u8 | refs u8 | bit_len u16 BE | data | children…`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.kind.tag());
        out.push(self.refs.len() as u8);
        out.extend_from_slice(&(self.bit_len as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        for r in &self.refs {
            r.write_to(out);
        }
    }

    /// Deserialize bytes produced by [`Cell::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CellError> {
        let mut pos = 0;
        let cell = Self::read_from(bytes, &mut pos, 0)?;
        if pos != bytes.len() {
            return Err(CellError::Decode(format!(
                "{} trailing bytes",
                bytes.len() - pos
            )));
        }
        Ok(cell)
    }

    fn read_from(bytes: &[u8], pos: &mut usize, depth: usize) -> Result<Self, CellError> {
        if depth > MAX_DEPTH {
            return Err(CellError::Decode("cell tree too deep".to_string()));
        }
        let header = bytes
            .get(*pos..*pos + 4)
            .ok_or_else(|| CellError::Decode("truncated cell header".to_string()))?;
        let (tag, ref_count) = (header[0], header[1] as usize);
        let bit_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        *pos += 4;

        if bit_len > MAX_BITS {
            return Err(CellError::BitOverflow);
        }
        if ref_count > MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        let data_len = bit_len.div_ceil(8);
        let data = bytes
            .get(*pos..*pos + data_len)
            .ok_or_else(|| CellError::Decode("truncated cell data".to_string()))?
            .to_vec();
        *pos += data_len;

        match tag {
            0 => {
                if bit_len % 8 != 0 {
                    let unused = 8 - bit_len % 8;
                    if data[data_len - 1] & ((1u8 << unused) - 1) != 0 {
                        return Err(CellError::Decode("non-zero padding bits".to_string()));
                    }
                }
                let mut refs = SmallVec::new();
                for _ in 0..ref_count {
                    refs.push(Arc::new(Self::read_from(bytes, pos, depth + 1)?));
                }
                Ok(Self::ordinary(data, bit_len, refs))
            }
            1 => {
                if bit_len != 256 || ref_count != 0 {
                    return Err(CellError::Decode("malformed pruned cell".to_string()));
                }
                Ok(Self::pruned(B256::from_slice(&data)))
            }
            other => Err(CellError::Decode(format!("unknown cell kind {}", other))),
        }
    }
}

/// Incremental cell writer.
#[derive(Debug, Default, Clone)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: SmallVec<[Arc<Cell>; MAX_REFS]>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits_left(&self) -> usize {
        MAX_BITS - self.bit_len
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CellError> {
        if self.bit_len == MAX_BITS {
            return Err(CellError::BitOverflow);
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// Store the low `bits` bits of `value`, most significant first.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, CellError> {
        if bits > 64 || (bits < 64 && value >> bits != 0) {
            return Err(CellError::ValueTooWide(bits));
        }
        self.ensure_bits(bits)?;
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    pub fn store_u256(&mut self, value: U256, bits: usize) -> Result<&mut Self, CellError> {
        if bits > 256 || value.bit_len() > bits {
            return Err(CellError::ValueTooWide(bits));
        }
        self.ensure_bits(bits)?;
        for i in (0..bits).rev() {
            self.store_bit(value.bit(i))?;
        }
        Ok(self)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        self.ensure_bits(bytes.len() * 8)?;
        for byte in bytes {
            self.store_uint(u64::from(*byte), 8)?;
        }
        Ok(self)
    }

    pub fn store_ref(&mut self, cell: Arc<Cell>) -> Result<&mut Self, CellError> {
        if self.refs.len() == MAX_REFS {
            return Err(CellError::RefOverflow);
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// Store a presence bit, then the reference if present.
    pub fn store_maybe_ref(&mut self, cell: Option<Arc<Cell>>) -> Result<&mut Self, CellError> {
        match cell {
            Some(cell) => {
                self.store_bit(true)?;
                self.store_ref(cell)
            }
            None => self.store_bit(false),
        }
    }

    fn ensure_bits(&self, bits: usize) -> Result<(), CellError> {
        if bits > self.bits_left() {
            return Err(CellError::BitOverflow);
        }
        Ok(())
    }

    pub fn build(&self) -> Cell {
        Cell::ordinary(self.data.clone(), self.bit_len, self.refs.clone())
    }
}

/// Sequential reader over a cell's data and references.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs.len() - self.ref_pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        if self.bit_pos >= self.cell.bit_len {
            return Err(CellError::Underflow);
        }
        let bit = self.cell.bit(self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64, CellError> {
        if bits > 64 {
            return Err(CellError::ValueTooWide(bits));
        }
        if bits > self.remaining_bits() {
            return Err(CellError::Underflow);
        }
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.load_bit()?);
        }
        Ok(value)
    }

    pub fn load_u256(&mut self, bits: usize) -> Result<U256, CellError> {
        if bits > 256 {
            return Err(CellError::ValueTooWide(bits));
        }
        if bits > self.remaining_bits() {
            return Err(CellError::Underflow);
        }
        let mut value = U256::ZERO;
        for _ in 0..bits {
            value = (value << 1) | U256::from(u8::from(self.load_bit()?));
        }
        Ok(value)
    }

    pub fn load_bytes(&mut self, len: usize) -> Result<Vec<u8>, CellError> {
        if len * 8 > self.remaining_bits() {
            return Err(CellError::Underflow);
        }
        (0..len).map(|_| self.load_uint(8).map(|b| b as u8)).collect()
    }

    pub fn load_ref(&mut self) -> Result<&'a Arc<Cell>, CellError> {
        let cell = self.cell.refs.get(self.ref_pos).ok_or(CellError::NoMoreRefs)?;
        self.ref_pos += 1;
        Ok(cell)
    }

    pub fn load_maybe_ref(&mut self) -> Result<Option<&'a Arc<Cell>>, CellError> {
        if self.load_bit()? {
            self.load_ref().map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Split `bytes` over a right-folded chain of cells.
pub fn snake_from_bytes(bytes: &[u8]) -> Result<Cell, CellError> {
    let mut next: Option<Arc<Cell>> = None;
    let chunks: Vec<&[u8]> = bytes.chunks(SNAKE_SEGMENT_BYTES).collect();
    for chunk in chunks.iter().rev() {
        let mut builder = CellBuilder::new();
        builder.store_bytes(chunk)?;
        if let Some(tail) = next.take() {
            builder.store_ref(tail)?;
        }
        next = Some(Arc::new(builder.build()));
    }
    Ok(match next {
        Some(head) => Arc::try_unwrap(head).unwrap_or_else(|shared| (*shared).clone()),
        None => Cell::empty(),
    })
}

/// Concatenate the bytes of a snake chain.
pub fn snake_to_bytes(cell: &Cell) -> Result<Vec<u8>, CellError> {
    let mut out = Vec::new();
    let mut current = cell;
    loop {
        let mut slice = current.parse()?;
        if slice.remaining_bits() % 8 != 0 {
            return Err(CellError::Decode("snake segment is not byte aligned".to_string()));
        }
        out.extend(slice.load_bytes(slice.remaining_bits() / 8)?);
        match slice.remaining_refs() {
            0 => return Ok(out),
            1 => current = slice.load_ref()?.as_ref(),
            _ => return Err(CellError::Decode("snake segment has several refs".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: u64) -> Arc<Cell> {
        let mut b = CellBuilder::new();
        b.store_uint(value, 64).unwrap();
        Arc::new(b.build())
    }

    #[test]
    fn test_store_and_load() {
        let mut b = CellBuilder::new();
        b.store_bit(true)
            .unwrap()
            .store_uint(0x2a, 7)
            .unwrap()
            .store_u256(U256::MAX, 256)
            .unwrap()
            .store_bytes(&[0xde, 0xad])
            .unwrap()
            .store_maybe_ref(Some(leaf(9)))
            .unwrap();
        let cell = b.build();
        assert_eq!(cell.bit_len(), 1 + 7 + 256 + 16 + 1);

        let mut s = cell.parse().unwrap();
        assert!(s.load_bit().unwrap());
        assert_eq!(s.load_uint(7).unwrap(), 0x2a);
        assert_eq!(s.load_u256(256).unwrap(), U256::MAX);
        assert_eq!(s.load_bytes(2).unwrap(), vec![0xde, 0xad]);
        let child = s.load_maybe_ref().unwrap().unwrap();
        assert_eq!(child.parse().unwrap().load_uint(64).unwrap(), 9);
        assert!(s.is_empty());
        assert_eq!(s.load_bit(), Err(CellError::Underflow));
    }

    #[test]
    fn test_capacity_limits() {
        let mut b = CellBuilder::new();
        assert_eq!(b.store_uint(4, 2).unwrap_err(), CellError::ValueTooWide(2));
        b.store_bytes(&[0u8; 127]).unwrap();
        b.store_uint(0, 7).unwrap();
        assert_eq!(b.bits_left(), 0);
        assert_eq!(b.store_bit(false).unwrap_err(), CellError::BitOverflow);

        let mut b = CellBuilder::new();
        for i in 0..4 {
            b.store_ref(leaf(i)).unwrap();
        }
        assert_eq!(b.store_ref(leaf(5)).unwrap_err(), CellError::RefOverflow);
    }

    #[test]
    fn test_hash_depends_on_content() {
        let mut a = CellBuilder::new();
        a.store_uint(1, 8).unwrap();
        let mut b = CellBuilder::new();
        b.store_uint(1, 9).unwrap();
        assert_ne!(a.build().hash(), b.build().hash());

        let mut c = CellBuilder::new();
        c.store_uint(1, 8).unwrap();
        assert_eq!(a.build().hash(), c.build().hash());
    }

    #[test]
    fn test_pruned_cell_keeps_parent_hash() {
        let child = leaf(77);
        let mut full = CellBuilder::new();
        full.store_uint(1, 4).unwrap().store_ref(child.clone()).unwrap();

        let mut pruned = CellBuilder::new();
        pruned
            .store_uint(1, 4)
            .unwrap()
            .store_ref(Arc::new(Cell::pruned(child.hash())))
            .unwrap();

        assert_eq!(full.build().hash(), pruned.build().hash());
        assert_eq!(Cell::pruned(child.hash()).parse().unwrap_err(), CellError::Pruned);
    }

    #[test]
    fn test_bytes_roundtrip_preserves_hash() {
        let mut b = CellBuilder::new();
        b.store_uint(5, 3)
            .unwrap()
            .store_ref(leaf(1))
            .unwrap()
            .store_ref(Arc::new(Cell::pruned(leaf(2).hash())))
            .unwrap();
        let cell = b.build();

        let decoded = Cell::from_bytes(&cell.to_bytes()).unwrap();
        assert_eq!(decoded.hash(), cell.hash());
        assert_eq!(decoded, cell);
        assert!(decoded.refs()[1].is_pruned());
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(Cell::from_bytes(&[]).is_err());
        assert!(Cell::from_bytes(&[7, 0, 0, 0]).is_err());
        let mut bytes = Cell::empty().to_bytes();
        bytes.push(0);
        assert!(Cell::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_snake() {
        let bytes: Vec<u8> = (0..400u32).map(|i| (i % 251) as u8).collect();
        let cell = snake_from_bytes(&bytes).unwrap();
        assert_eq!(cell.refs().len(), 1);
        assert_eq!(snake_to_bytes(&cell).unwrap(), bytes);

        let empty = snake_from_bytes(&[]).unwrap();
        assert_eq!(snake_to_bytes(&empty).unwrap(), Vec::<u8>::new());
    }
}
