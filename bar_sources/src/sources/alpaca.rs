//! Alpaca market-data REST API (crypto bars), used as a third-party tier.

mod params;
mod response;
mod source;

pub use params::alpaca_timeframe;
pub use source::{AlpacaConfig, AlpacaSource};
