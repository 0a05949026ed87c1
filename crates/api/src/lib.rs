//! Price source drivers.
//!
//! This crate provides HTTP clients for the two kinds of upstream price
//! sources a lending pool accepts:
//! - Classic oracle nodes: signed compact price payloads, one per node
//! - Pyth Hermes: aggregated feed updates with an opaque binary proof
//!
//! plus the retry and endpoint-racing policy shared by both.

mod classic;
mod error;
mod policy;
mod pyth;
mod record;

pub use classic::{decode_payload, encode_payload, ClassicDriver, OracleNode};
pub use error::SourceError;
pub use policy::{race, with_retry, FetchConfig};
pub use pyth::{scale_price, PythDriver, PRICE_DECIMALS};
pub use record::{PriceSource, SignedPriceRecord, DEFAULT_MAX_CLOCK_SKEW_SECS};
