//! Trade — a public print or a private fill.

use crate::currency::CurrencyPair;
use crate::{Amount, DateTime, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A public trade (a print on the tape) or, when `order_id`/`fee` are
/// present, one of the caller's own fills against an order.
#[derive(Debug, Clone)]
pub struct Trade {
    pub venue_id: String,
    pub symbol: CurrencyPair,
    pub side: TradeSide,
    pub price: Price,
    pub amount: Amount,
    pub timestamp: DateTime,
    /// Set only for the caller's own fills, never for public prints.
    pub order_id: Option<String>,
    pub fee: Option<Amount>,
    pub fee_currency: Option<String>,
    /// Whether this fill added liquidity; set only for the caller's own fills.
    pub is_maker: Option<bool>,
}

impl Trade {
    pub fn cost(&self) -> Price {
        self.price * self.amount
    }

    pub fn is_own_fill(&self) -> bool {
        self.order_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn public_trade() -> Trade {
        Trade {
            venue_id: "123456".into(),
            symbol: CurrencyPair::new("BTC", "USDT"),
            side: TradeSide::Buy,
            price: dec!(30000),
            amount: dec!(0.5),
            timestamp: chrono::DateTime::from_timestamp_millis(0).unwrap(),
            order_id: None,
            fee: None,
            fee_currency: None,
            is_maker: None,
        }
    }

    #[test]
    fn cost_is_price_times_amount() {
        assert_eq!(public_trade().cost(), dec!(15000));
    }

    #[test]
    fn public_trade_is_not_own_fill() {
        assert!(!public_trade().is_own_fill());
    }

    #[test]
    fn fill_with_order_id_is_own_fill() {
        let mut trade = public_trade();
        trade.order_id = Some("o-1".into());
        assert!(trade.is_own_fill());
    }
}
