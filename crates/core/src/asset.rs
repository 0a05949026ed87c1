//! Asset identifiers, account principals, balances and accrual state.

use alloy::primitives::{keccak256, B256, I256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 256-bit asset identifier.
///
/// Written in config files either as `0x`-prefixed hex or as a symbol, in which
/// case the identifier is `keccak256(symbol)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(pub U256);

impl AssetId {
    /// Derive an identifier from an asset symbol.
    pub fn from_symbol(symbol: &str) -> Self {
        Self(U256::from_be_bytes(keccak256(symbol.as_bytes()).0))
    }

    /// Identifier shifted by `offset` (used to address TWAP prices).
    pub fn offset(&self, offset: U256) -> U256 {
        self.0.wrapping_add(offset)
    }

    pub fn as_b256(&self) -> B256 {
        B256::from(self.0)
    }
}

impl From<U256> for AssetId {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl FromStr for AssetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty asset id".to_string());
        }
        match s.strip_prefix("0x") {
            Some(hex) => U256::from_str_radix(hex, 16)
                .map(Self)
                .map_err(|e| format!("invalid asset id '{}': {}", s, e)),
            None => Ok(Self::from_symbol(s)),
        }
    }
}

impl TryFrom<String> for AssetId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_b256())
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.as_b256().to_string();
        write!(f, "AssetId({}..{})", &hex[..10], &hex[hex.len() - 4..])
    }
}

/// Signed principal per asset. Positive = supplied, negative = borrowed.
pub type Principals = BTreeMap<AssetId, I256>;

/// Asset prices at the pool's price scale.
pub type PriceMap = BTreeMap<AssetId, U256>;

/// Accrual state per asset.
pub type AssetDataMap = BTreeMap<AssetId, AssetData>;

/// Kind of a present-value balance, determined by the principal's sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceKind {
    Supply,
    Borrow,
    None,
}

/// Present value of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Amount in asset units (always non-negative)
    pub amount: U256,
    /// Supply or borrow, or none for a zero principal
    pub kind: BalanceKind,
}

impl Balance {
    pub const ZERO: Balance = Balance {
        amount: U256::ZERO,
        kind: BalanceKind::None,
    };

    pub fn supply(amount: U256) -> Self {
        Self {
            amount,
            kind: BalanceKind::Supply,
        }
    }

    pub fn borrow(amount: U256) -> Self {
        Self {
            amount,
            kind: BalanceKind::Borrow,
        }
    }

    /// Signed view of the balance (supply positive, borrow negative).
    pub fn signed(&self) -> Option<I256> {
        let amount = I256::try_from(self.amount).ok()?;
        Some(match self.kind {
            BalanceKind::Supply => amount,
            BalanceKind::Borrow => -amount,
            BalanceKind::None => I256::ZERO,
        })
    }

    /// Balance from a signed amount.
    pub fn from_signed(value: I256) -> Self {
        if value.is_zero() {
            Self::ZERO
        } else if value.is_negative() {
            Self::borrow(value.unsigned_abs())
        } else {
            Self::supply(value.unsigned_abs())
        }
    }
}

/// Accrual state of one asset, as stored by the pool contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetData {
    /// Supply accrual index (factor scale)
    pub s_rate: U256,
    /// Borrow accrual index (factor scale)
    pub b_rate: U256,
    /// Total supplied principal
    pub total_supply: U256,
    /// Total borrowed principal
    pub total_borrow: U256,
    /// Unix timestamp of the last accrual
    pub last_accrual: u64,
    /// Liquidity held by the pool for this asset
    #[serde(default)]
    pub balance: U256,
}
