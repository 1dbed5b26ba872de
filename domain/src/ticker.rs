//! Ticker — 24h snapshot for one symbol.

use crate::currency::CurrencyPair;
use crate::{DateTime, Price};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Default)]
pub struct Ticker {
    pub symbol: Option<CurrencyPair>,
    pub last: Option<Price>,
    pub bid: Option<Price>,
    pub bid_volume: Option<Decimal>,
    pub ask: Option<Price>,
    pub ask_volume: Option<Decimal>,
    pub high: Option<Price>,
    pub low: Option<Price>,
    pub open: Option<Price>,
    pub close: Option<Price>,
    pub base_volume: Option<Decimal>,
    pub quote_volume: Option<Decimal>,
    pub change: Option<Price>,
    pub percentage: Option<Decimal>,
    pub vwap: Option<Price>,
    pub timestamp_ms: Option<i64>,
}

impl Ticker {
    /// ISO-8601 datetime with millisecond precision and a `Z` suffix.
    pub fn datetime(&self) -> Option<String> {
        self.timestamp_ms.map(|ms| {
            let dt = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
                .unwrap_or_default();
            dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
        })
    }

    /// Derives `open` from `close - change`, or `change` from `close - open`,
    /// when the venue only gave one of the pair.
    pub fn fill_derived_fields(&mut self) {
        match (self.open, self.change, self.close) {
            (None, Some(change), Some(close)) => self.open = Some(close - change),
            (Some(open), None, Some(close)) => self.change = Some(close - open),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn derives_open_from_close_and_change() {
        let mut t = Ticker {
            change: Some(dec!(5)),
            close: Some(dec!(105)),
            ..Default::default()
        };
        t.fill_derived_fields();
        assert_eq!(t.open, Some(dec!(100)));
    }

    #[test]
    fn derives_change_from_open_and_close() {
        let mut t = Ticker {
            open: Some(dec!(100)),
            close: Some(dec!(105)),
            ..Default::default()
        };
        t.fill_derived_fields();
        assert_eq!(t.change, Some(dec!(5)));
    }

    #[test]
    fn leaves_both_alone_when_already_present() {
        let mut t = Ticker {
            open: Some(dec!(100)),
            change: Some(dec!(1)),
            close: Some(dec!(105)),
            ..Default::default()
        };
        t.fill_derived_fields();
        assert_eq!(t.open, Some(dec!(100)));
        assert_eq!(t.change, Some(dec!(1)));
    }
}
