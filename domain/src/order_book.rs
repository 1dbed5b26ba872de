//! OrderBook — normalized depth snapshot/delta.

use crate::currency::CurrencyPair;
use crate::{Amount, DateTime, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBookEventType {
    Snapshot,
    Delta,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: Price,
    pub amount: Amount,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum OrderBookError {
    /// A level had non-positive amount in a context where that isn't a deletion marker.
    NonPositiveAmount,
    /// Top-of-book is crossed: `bids[0].price >= asks[0].price`.
    Crossed,
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub symbol: CurrencyPair,
    /// Sorted strictly descending by price.
    pub bids: Vec<Level>,
    /// Sorted strictly ascending by price.
    pub asks: Vec<Level>,
    pub timestamp: Option<DateTime>,
    /// Monotonic sequence number, when the venue provides one.
    pub nonce: Option<u64>,
    pub event_type: OrderBookEventType,
}

impl OrderBook {
    pub fn new(symbol: CurrencyPair, event_type: OrderBookEventType) -> Self {
        Self {
            symbol,
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: None,
            nonce: None,
            event_type,
        }
    }

    /// Builds a book from raw (price, signed_count_as_amount, ...) venue
    /// levels: zero-amount levels are removal markers and MUST NOT appear
    /// in the result; positive price delta with
    /// a negative raw amount still yields a positive canonical amount,
    /// signed only to distinguish bid/ask when count would otherwise be
    /// ambiguous. Levels are bucketed by sign of their contribution: this
    /// helper takes already-classified (side, price, amount) triples —
    /// venue parsers do the raw-tuple interpretation.
    pub fn from_levels(
        symbol: CurrencyPair,
        bids: Vec<Level>,
        asks: Vec<Level>,
        event_type: OrderBookEventType,
    ) -> Result<Self, OrderBookError> {
        for level in bids.iter().chain(asks.iter()) {
            if level.amount <= Amount::ZERO {
                return Err(OrderBookError::NonPositiveAmount);
            }
        }

        let mut book = Self::new(symbol, event_type);
        book.bids = bids;
        book.asks = asks;
        book.bids.sort_by(|a, b| b.price.cmp(&a.price));
        book.asks.sort_by(|a, b| a.price.cmp(&b.price));

        if let (Some(top_bid), Some(top_ask)) = (book.bids.first(), book.asks.first()) {
            if top_bid.price >= top_ask.price {
                return Err(OrderBookError::Crossed);
            }
        }

        Ok(book)
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair() -> CurrencyPair {
        CurrencyPair::new("BTC", "USDT")
    }

    /// Tuples [[30000,1,2.5],[29999,0,1.0],[30001,1,-1.5]]
    /// (price, count, signed amount) — the second tuple (count=0) is
    /// discarded before it ever reaches `OrderBook`, the first becomes a
    /// bid, the third an ask with its amount made positive by the parser.
    #[test]
    fn snapshot_scenario_from_venue_tuples() {
        let bids = vec![Level { price: dec!(30000), amount: dec!(2.5) }];
        let asks = vec![Level { price: dec!(30001), amount: dec!(1.5) }];
        let book = OrderBook::from_levels(pair(), bids, asks, OrderBookEventType::Snapshot)
            .expect("in test");
        assert_eq!(book.bids, vec![Level { price: dec!(30000), amount: dec!(2.5) }]);
        assert_eq!(book.asks, vec![Level { price: dec!(30001), amount: dec!(1.5) }]);
    }

    #[test]
    fn rejects_zero_amount_level() {
        let bids = vec![Level { price: dec!(1), amount: dec!(0) }];
        let result = OrderBook::from_levels(pair(), bids, vec![], OrderBookEventType::Snapshot);
        assert_eq!(result.unwrap_err(), OrderBookError::NonPositiveAmount);
    }

    #[test]
    fn rejects_crossed_book() {
        let bids = vec![Level { price: dec!(100), amount: dec!(1) }];
        let asks = vec![Level { price: dec!(99), amount: dec!(1) }];
        let result = OrderBook::from_levels(pair(), bids, asks, OrderBookEventType::Snapshot);
        assert_eq!(result.unwrap_err(), OrderBookError::Crossed);
    }

    #[test]
    fn sorts_bids_descending_and_asks_ascending() {
        let bids = vec![
            Level { price: dec!(99), amount: dec!(1) },
            Level { price: dec!(100), amount: dec!(1) },
        ];
        let asks = vec![
            Level { price: dec!(103), amount: dec!(1) },
            Level { price: dec!(101), amount: dec!(1) },
        ];
        let book = OrderBook::from_levels(pair(), bids, asks, OrderBookEventType::Snapshot)
            .expect("in test");
        assert_eq!(book.bids[0].price, dec!(100));
        assert_eq!(book.bids[1].price, dec!(99));
        assert_eq!(book.asks[0].price, dec!(101));
        assert_eq!(book.asks[1].price, dec!(103));
    }
}
