//! Market — a tradable pair on a venue.

use crate::currency::CurrencyPair;
use crate::{Amount, Price};
use serde_json::Value;

/// Min/max/step limits for one dimension (price, amount, or cost).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Limits<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketLimits {
    pub price: Limits<Price>,
    pub amount: Limits<Amount>,
    pub cost: Limits<Price>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketPrecision {
    /// Decimal digits, e.g. 2 for a price tick of 0.01.
    pub price: Option<u32>,
    pub amount: Option<u32>,
}

/// One tradable pair, as loaded by `load_markets`.
#[derive(Debug, Clone)]
pub struct Market {
    /// Venue-native market id, e.g. "BTCUSDT".
    pub venue_id: String,
    /// Canonical "BASE/QUOTE" symbol, unique within a venue.
    pub symbol: CurrencyPair,
    pub base: String,
    pub quote: String,
    pub active: bool,
    pub precision: MarketPrecision,
    pub limits: MarketLimits,
    pub price_tick: Option<Price>,
    pub amount_step: Option<Amount>,
    /// Opaque venue passthrough.
    pub info: Value,
}

impl Market {
    pub fn new(venue_id: impl Into<String>, symbol: CurrencyPair, info: Value) -> Self {
        let base = symbol.base.as_str().to_owned();
        let quote = symbol.quote.as_str().to_owned();
        Self {
            venue_id: venue_id.into(),
            symbol,
            base,
            quote,
            active: true,
            precision: MarketPrecision::default(),
            limits: MarketLimits::default(),
            price_tick: None,
            amount_step: None,
            info,
        }
    }
}
