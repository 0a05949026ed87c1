//! Price collection for lending pools.
//!
//! Two collectors share the [`Collector`] capability:
//! - [`ClassicCollector`]: median over a quorum of signed node records
//! - [`PythCollector`]: Hermes feeds with derived and referenced assets
//!
//! Both return a [`PriceSet`] carrying the packed bundle the pool contract
//! verifies.

pub mod cell;
mod classic;
mod collector;
pub mod config;
mod error;
pub mod packing;
mod pyth;

#[cfg(test)]
mod testing;

pub use classic::{median, ClassicCollector};
pub use collector::{
    check_window, liquidation_assets, supply_withdraw_assets, Collector, PriceSet, Provenance,
    DEFAULT_TTL_SECS,
};
pub use config::{
    ClassicConfig, CollectorConfig, DeploymentConfig, DerivedFeedConfig, FeedConfig, PriceKind,
    PythConfig, ReferenceConfig,
};
pub use error::OracleError;
pub use pyth::{FeedTables, PythCollector};
